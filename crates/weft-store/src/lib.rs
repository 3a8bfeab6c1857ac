//! Weft Store - concrete repositories for the weft coordinator
//!
//! Provides:
//! - `MemoryRepository`: in-process collections with snapshot savepoints
//! - `SqliteRepository`: rusqlite-backed JSON records with native savepoints
//! - Embedded migrations for the SQLite schema
//! - Factory opening the repositories named in a `DbConfig`

pub mod errors;
pub mod factory;
pub mod memory;
pub mod migrations;
pub mod records;
pub mod sqlite;

pub use errors::Result;
pub use factory::{open_all, open_db, open_repository};
pub use memory::MemoryRepository;
pub use sqlite::{SqliteRepository, SqliteTransaction};
