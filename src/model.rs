use crate::error::LockingError;
use crate::Result;
use std::fmt;
use std::str::FromStr;

/// Census Bureau-designated regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CensusRegion {
    Northeast,
    Midwest,
    South,
    West,
}

impl CensusRegion {
    pub const ALL: [CensusRegion; 4] = [
        CensusRegion::Northeast,
        CensusRegion::Midwest,
        CensusRegion::South,
        CensusRegion::West,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CensusRegion::Northeast => "NORTHEAST",
            CensusRegion::Midwest => "MIDWEST",
            CensusRegion::South => "SOUTH",
            CensusRegion::West => "WEST",
        }
    }
}

impl fmt::Display for CensusRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CensusRegion {
    type Err = LockingError;

    fn from_str(s: &str) -> Result<Self> {
        CensusRegion::ALL
            .iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| LockingError::Validation(format!("unknown census region `{}`", s)))
    }
}

/// Columns of the `state` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    Name,
    Code,
    Abbr,
    CensusRegion,
}

impl Column {
    pub const ALL: [Column; 5] = [
        Column::Id,
        Column::Name,
        Column::Code,
        Column::Abbr,
        Column::CensusRegion,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::Name => "name",
            Column::Code => "code",
            Column::Abbr => "abbr",
            Column::CensusRegion => "census_region",
        }
    }

    pub fn max_len(&self) -> usize {
        match self {
            Column::Id | Column::Code => 2,
            Column::Name => 24,
            Column::Abbr => 6,
            Column::CensusRegion => 9,
        }
    }

    pub fn is_unique(&self) -> bool {
        !matches!(self, Column::CensusRegion)
    }
}

impl FromStr for Column {
    type Err = LockingError;

    fn from_str(s: &str) -> Result<Self> {
        Column::ALL
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| LockingError::Validation(format!("unknown column `{}`", s)))
    }
}

/// A state of the United States, keyed by its 2-letter postal abbreviation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub id: String,
    pub name: String,
    /// ANSI 2-digit code
    pub code: String,
    /// AP Stylebook abbreviation
    pub abbr: String,
    pub census_region: CensusRegion,
}

impl State {
    pub fn new(
        id: &str,
        name: &str,
        code: &str,
        abbr: &str,
        census_region: CensusRegion,
    ) -> State {
        State {
            id: id.to_owned(),
            name: name.to_owned(),
            code: code.to_owned(),
            abbr: abbr.to_owned(),
            census_region,
        }
    }

    pub fn get(&self, column: Column) -> String {
        match column {
            Column::Id => self.id.clone(),
            Column::Name => self.name.clone(),
            Column::Code => self.code.clone(),
            Column::Abbr => self.abbr.clone(),
            Column::CensusRegion => self.census_region.as_str().to_owned(),
        }
    }

    pub fn set(&mut self, column: Column, value: &str) -> Result<()> {
        match column {
            Column::Id => self.id = value.to_owned(),
            Column::Name => self.name = value.to_owned(),
            Column::Code => self.code = value.to_owned(),
            Column::Abbr => self.abbr = value.to_owned(),
            Column::CensusRegion => self.census_region = value.parse()?,
        }
        Ok(())
    }

    /// Builds a row from `(column, value)` pairs; every column must be present.
    pub fn from_columns(values: &[(Column, String)]) -> Result<State> {
        let lookup = |column: Column| {
            values
                .iter()
                .find(|(c, _)| *c == column)
                .map(|(_, v)| v.as_str())
                .ok_or_else(|| {
                    LockingError::Validation(format!("missing value for `{}`", column.name()))
                })
        };
        let state = State::new(
            lookup(Column::Id)?,
            lookup(Column::Name)?,
            lookup(Column::Code)?,
            lookup(Column::Abbr)?,
            lookup(Column::CensusRegion)?.parse()?,
        );
        state.validate()?;
        Ok(state)
    }

    pub fn validate(&self) -> Result<()> {
        for column in Column::ALL.iter() {
            let value = self.get(*column);
            if value.is_empty() || value.chars().count() > column.max_len() {
                return Err(LockingError::Validation(format!(
                    "invalid value `{}` for column `{}`",
                    value,
                    column.name()
                )));
            }
        }
        Ok(())
    }
}

/// Predicate selecting rows of the `state` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    All,
    Id(String),
    CensusRegion(CensusRegion),
    Column(Column, String),
}

impl RowFilter {
    pub fn matches(&self, state: &State) -> bool {
        match self {
            RowFilter::All => true,
            RowFilter::Id(id) => state.id == *id,
            RowFilter::CensusRegion(region) => state.census_region == *region,
            RowFilter::Column(column, value) => state.get(*column) == *value,
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            RowFilter::All => "1 = 1".to_owned(),
            RowFilter::Id(id) => format!("s.id = '{}'", escape(id)),
            RowFilter::CensusRegion(region) => format!("s.census_region = '{}'", region),
            RowFilter::Column(column, value) => {
                format!("s.{} = '{}'", column.name(), escape(value))
            }
        }
    }
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// Target of a locking read: a predicate and an optional row limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRef {
    pub filter: RowFilter,
    pub limit: Option<usize>,
}

impl RowRef {
    pub fn id(id: &str) -> RowRef {
        RowRef {
            filter: RowFilter::Id(id.to_owned()),
            limit: None,
        }
    }

    pub fn region(region: CensusRegion) -> RowRef {
        RowRef {
            filter: RowFilter::CensusRegion(region),
            limit: None,
        }
    }

    pub fn all() -> RowRef {
        RowRef {
            filter: RowFilter::All,
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> RowRef {
        self.limit = Some(limit);
        self
    }
}
