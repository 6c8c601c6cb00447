//! Persistence layer — libSQL-backed document store and run log.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{DocumentReader, RunLog, StoredDocument};
