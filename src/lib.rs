#[macro_use]
extern crate log;

pub use context::LockingContext;

pub mod acquirer;
mod cancel;
pub mod classify;
mod context;
pub mod engine;
pub mod error;
pub mod fixture;
pub mod harness;
pub mod model;
pub mod options;
pub mod repository;
pub mod service;
pub mod sql;
pub mod transactions;

pub type Result<T> = std::result::Result<T, error::LockingError>;
