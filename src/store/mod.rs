//! Persistence layer — libSQL-backed storage for action records and
//! classified email exemplars.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{ActionStore, ExemplarStore, StoredExemplar};
