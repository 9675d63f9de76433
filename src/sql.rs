//! The SQL subset used by fixture scripts, parsed with `sqlparser`.
//!
//! ```sql
//! -- comment
//! INSERT INTO state (id, name, code, abbr, census_region) VALUES ('AL', 'Alabama', '01', 'Ala.', 'SOUTH');
//! UPDATE state SET name = 'x' WHERE id = 'AL';
//! DELETE FROM state WHERE census_region = 'WEST';
//! ```

use crate::error::LockingError;
use crate::model::{Column, RowFilter};
use crate::Result;
use sqlparser::ast::{
    Assignment, BinaryOperator, Expr, Ident, ObjectName, SetExpr, Statement as SqlStatement,
    TableFactor, TableWithJoins, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

pub const TABLE_NAME: &str = "state";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Insert {
        columns: Vec<Column>,
        rows: Vec<Vec<String>>,
    },
    Update {
        assignments: Vec<(Column, String)>,
        filter: RowFilter,
    },
    Delete {
        filter: RowFilter,
    },
}

fn invalid(statement: &str, message: &str) -> LockingError {
    LockingError::Sql {
        statement: statement.trim().to_owned(),
        message: message.to_owned(),
    }
}

fn parse(text: &str) -> Result<Vec<SqlStatement>> {
    Parser::parse_sql(&GenericDialect {}, text).map_err(|e| invalid(text, &e.to_string()))
}

fn table(text: &str, name: &ObjectName) -> Result<()> {
    match name.0.as_slice() {
        [ident] if ident.value.eq_ignore_ascii_case(TABLE_NAME) => Ok(()),
        _ => Err(invalid(text, &format!("unknown table `{}`", name))),
    }
}

fn relation(text: &str, table_with_joins: &TableWithJoins) -> Result<()> {
    if !table_with_joins.joins.is_empty() {
        return Err(invalid(text, "joins are not supported"));
    }
    match &table_with_joins.relation {
        TableFactor::Table { name, .. } => table(text, name),
        other => Err(invalid(text, &format!("unsupported table `{}`", other))),
    }
}

fn column(ident: &Ident) -> Result<Column> {
    ident.value.parse()
}

fn literal(text: &str, expr: &Expr) -> Result<String> {
    match expr {
        Expr::Value(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Expr::Value(Value::Number(n, false)) => Ok(n.clone()),
        other => Err(invalid(text, &format!("expected a literal, found `{}`", other))),
    }
}

fn filter(text: &str, selection: Option<&Expr>) -> Result<RowFilter> {
    let (left, right) = match selection {
        None => return Ok(RowFilter::All),
        Some(Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        }) => (left, right),
        Some(other) => {
            return Err(invalid(
                text,
                &format!("expected `column = literal`, found `{}`", other),
            ))
        }
    };
    let column = match left.as_ref() {
        Expr::Identifier(ident) => column(ident)?,
        other => return Err(invalid(text, &format!("expected a column, found `{}`", other))),
    };
    let value = literal(text, right)?;
    Ok(match column {
        Column::Id => RowFilter::Id(value),
        Column::CensusRegion => RowFilter::CensusRegion(value.parse()?),
        other => RowFilter::Column(other, value),
    })
}

fn assignment(text: &str, assignment: &Assignment) -> Result<(Column, String)> {
    match assignment.id.as_slice() {
        [ident] => Ok((column(ident)?, literal(text, &assignment.value)?)),
        _ => Err(invalid(text, "expected a single column per assignment")),
    }
}

fn convert(text: &str, statement: &SqlStatement) -> Result<Statement> {
    match statement {
        SqlStatement::Insert {
            table_name,
            columns,
            source: Some(source),
            ..
        } => {
            table(text, table_name)?;
            let columns = columns.iter().map(column).collect::<Result<Vec<_>>>()?;
            let values = match source.body.as_ref() {
                SetExpr::Values(values) => values,
                other => return Err(invalid(text, &format!("expected VALUES, found `{}`", other))),
            };
            let rows = values
                .rows
                .iter()
                .map(|row| row.iter().map(|e| literal(text, e)).collect())
                .collect::<Result<Vec<Vec<String>>>>()?;
            if rows.iter().any(|r| r.len() != columns.len()) {
                return Err(invalid(text, "column count does not match value count"));
            }
            Ok(Statement::Insert { columns, rows })
        }
        SqlStatement::Update {
            table,
            assignments,
            from: None,
            selection,
            ..
        } => {
            relation(text, table)?;
            let assignments = assignments
                .iter()
                .map(|a| assignment(text, a))
                .collect::<Result<Vec<_>>>()?;
            Ok(Statement::Update {
                assignments,
                filter: filter(text, selection.as_ref())?,
            })
        }
        SqlStatement::Delete {
            tables,
            from,
            using: None,
            selection,
            ..
        } if tables.is_empty() => match from.as_slice() {
            [target] => {
                relation(text, target)?;
                Ok(Statement::Delete {
                    filter: filter(text, selection.as_ref())?,
                })
            }
            _ => Err(invalid(text, "expected a single table")),
        },
        other => Err(invalid(text, &format!("unsupported statement `{}`", other))),
    }
}

pub fn parse_statement(sql: &str) -> Result<Statement> {
    match parse(sql)?.as_slice() {
        [statement] => convert(sql, statement),
        statements => Err(invalid(
            sql,
            &format!("expected one statement, found {}", statements.len()),
        )),
    }
}

/// Parses a `;`-separated script. Empty statements are skipped.
pub fn parse_script(text: &str) -> Result<Vec<Statement>> {
    parse(text)?.iter().map(|s| convert(text, s)).collect()
}

#[cfg(test)]
mod tests {
    use crate::error::LockingError;
    use crate::model::{CensusRegion, Column, RowFilter};
    use crate::sql::{parse_script, parse_statement, Statement};

    #[test]
    fn test_insert() {
        let statement = parse_statement(
            "INSERT INTO state (id, name, code, abbr, census_region) \
             VALUES ('HI', 'Hawai''i', '15', 'Hawaii', 'WEST'), ('AK', 'Alaska', 02, 'Alaska', 'WEST');",
        )
        .unwrap();
        match statement {
            Statement::Insert { columns, rows } => {
                assert_eq!(columns, Column::ALL.to_vec());
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0][1], "Hawai'i");
                assert_eq!(rows[1][2], "02");
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_script() {
        let script = "-- purge first\n\
                      DELETE FROM state;\n\
                      delete from STATE where census_region = 'south';;\n\
                      UPDATE state SET name = 'A', abbr = 'B' WHERE id = 'AL' -- trailing\n";
        let statements = parse_script(script).unwrap();
        assert_eq!(
            statements,
            vec![
                Statement::Delete {
                    filter: RowFilter::All
                },
                Statement::Delete {
                    filter: RowFilter::CensusRegion(CensusRegion::South)
                },
                Statement::Update {
                    assignments: vec![(Column::Name, "A".into()), (Column::Abbr, "B".into())],
                    filter: RowFilter::Id("AL".into()),
                },
            ]
        );
    }

    #[test]
    fn test_quoted_identifiers() {
        assert_eq!(
            parse_statement("DELETE FROM \"state\" WHERE \"id\" = 'AL'").unwrap(),
            Statement::Delete {
                filter: RowFilter::Id("AL".into())
            }
        );
        assert_eq!(
            parse_statement("UPDATE \"state\" SET \"abbr\" = 'Ala.'").unwrap(),
            Statement::Update {
                assignments: vec![(Column::Abbr, "Ala.".into())],
                filter: RowFilter::All,
            }
        );
    }

    #[test]
    fn test_errors() {
        for sql in [
            "SELECT * FROM state",
            "DELETE FROM city",
            "DELETE FROM \"city\"",
            "INSERT INTO state (id, name) VALUES ('AL')",
            "DELETE FROM state WHERE color = 'red'",
            "DELETE FROM state WHERE id > 'AL'",
            "UPDATE state SET name = 'unterminated",
            "DELETE FROM state WHERE id = 'AL' AND",
            "DELETE FROM state; DELETE FROM state",
        ]
        .iter()
        {
            match parse_statement(sql) {
                Err(LockingError::Sql { .. }) | Err(LockingError::Validation(_)) => {}
                other => panic!("{}: {:?}", sql, other),
            }
        }
    }
}
