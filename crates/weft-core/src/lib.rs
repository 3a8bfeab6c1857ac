//! Weft Core - cross-repository transactions over a model-driven query API
//!
//! This crate provides:
//! - Explicit model schema descriptors and a model registry
//! - `Scope`, the query or mutation unit dispatched to repositories
//! - The repository capability contract every storage backend implements
//! - Model to repository resolution (`RepositoryMapper`)
//! - The `Transaction` coordinator: lazy enlistment, savepoint stack,
//!   sequential commit and aggregated rollback
//! - Error, logging and configuration facilities

pub mod config;
pub mod context;
pub mod db;
pub mod errors;
pub mod logging_facility;
pub mod mapper;
pub mod model;
pub mod query;
pub mod repository;
pub mod transaction;

// Used by the logging macros
pub use weft_core_types as core_types;

// Re-export commonly used types
pub use config::DbConfig;
pub use context::Context;
pub use db::{Db, DbBuilder};
pub use errors::{
    ErrorKind, RepositoryError, RepositoryErrorKind, RepositoryResult, Result, WeftError,
};
pub use mapper::RepositoryMapper;
pub use model::{Model, ModelRegistry, ModelStruct, Record};
pub use query::{FilterField, FilterOperator, Pagination, Scope, SortField};
pub use repository::{IsolationLevel, Repository, RepositoryTransaction, TxOptions};
pub use transaction::{ParticipantInfo, Savepoint, Transaction, TransactionState};
