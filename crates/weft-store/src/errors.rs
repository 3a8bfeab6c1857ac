//! Error helpers for weft-store
//!
//! Maps driver and serialization failures into the repository error taxonomy

use rusqlite::ErrorCode;
use weft_core::context::Context;
use weft_core::errors::{RepositoryError, RepositoryErrorKind};

/// Result type alias using RepositoryError
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Create a database error from rusqlite::Error
pub fn from_rusqlite(err: rusqlite::Error) -> RepositoryError {
    let kind = match &err {
        rusqlite::Error::QueryReturnedNoRows => RepositoryErrorKind::NotFound,
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation => RepositoryErrorKind::Constraint,
            ErrorCode::ReadOnly => RepositoryErrorKind::ReadOnly,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => RepositoryErrorKind::Conflict,
            _ => RepositoryErrorKind::Storage,
        },
        _ => RepositoryErrorKind::Storage,
    };
    RepositoryError::new(kind, err.to_string()).with_source(err)
}

/// Create an error for a stored body that no longer decodes
pub fn from_serde_json(err: serde_json::Error) -> RepositoryError {
    RepositoryError::storage(format!("corrupt record body: {}", err)).with_source(err)
}

/// Create a migration error
pub fn migration_error(migration_id: &str, err: rusqlite::Error) -> RepositoryError {
    RepositoryError::storage(format!("migration {} failed: {}", migration_id, err)).with_source(err)
}

/// Create an error for a write inside a read-only transaction
pub fn read_only(op: &str) -> RepositoryError {
    RepositoryError::new(
        RepositoryErrorKind::ReadOnly,
        format!("{} rejected: transaction is read-only", op),
    )
}

/// Create a duplicate primary key error
pub fn duplicate_key(collection: &str, key: &str) -> RepositoryError {
    RepositoryError::new(
        RepositoryErrorKind::Constraint,
        format!("duplicate primary key {} in '{}'", key, collection),
    )
}

/// Create an error for a rollback to an unknown savepoint
pub fn savepoint_not_found(name: &str) -> RepositoryError {
    RepositoryError::not_found(format!("no such savepoint: {}", name))
}

/// Create an error for a get that matched nothing
pub fn record_not_found(collection: &str) -> RepositoryError {
    RepositoryError::not_found(format!("no record in '{}' matches the scope", collection))
}

/// Create an error for a sub-transaction used after commit or rollback
pub fn finished(op: &str) -> RepositoryError {
    RepositoryError::new(
        RepositoryErrorKind::InvalidInput,
        format!("{} on a finished sub-transaction", op),
    )
}

/// Fail fast when the caller's context is already done
pub fn check_context(ctx: &Context, op: &str) -> Result<()> {
    match ctx.err(op) {
        Some(err) => Err(RepositoryError::new(RepositoryErrorKind::Cancelled, err.to_string())),
        None => Ok(()),
    }
}
