//! Repository capability contract
//!
//! Every storage backend implements `Repository` (connection level) and
//! `RepositoryTransaction` (one open sub-transaction). The coordinator only
//! calls these traits; it never inspects backend state.
//!
//! # Savepoint contract
//!
//! Native savepoints must be monotonic:
//!
//! - opening a newer savepoint never invalidates an older one on the same
//!   sub-transaction;
//! - `rollback_savepoint(name)` undoes everything after `name`, keeps
//!   `name` open and discards savepoints opened after it.
//!
//! The coordinator relies on this to issue `savepoint` only to participants
//! enlisted since the previous checkpoint.

use async_trait::async_trait;
use serde::Deserialize;

use crate::context::Context;
use crate::errors::{RepositoryError, RepositoryResult};
use crate::query::Scope;

/// Isolation requested from every participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Whatever the backend uses by default
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
}

/// Options passed to `Repository::begin`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
}

impl TxOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }
}

/// A storage backend
#[async_trait]
pub trait Repository: Send + Sync {
    /// Identity used by the mapper, in logs and in error messages
    fn id(&self) -> &str;

    /// Open a sub-transaction
    async fn begin(
        &self,
        ctx: &Context,
        options: &TxOptions,
    ) -> RepositoryResult<Box<dyn RepositoryTransaction>>;

    /// Release backend resources at database shutdown
    async fn close(&self, _ctx: &Context) -> RepositoryResult<()> {
        Ok(())
    }
}

/// An open sub-transaction on one repository
///
/// Not shared between tasks; the owning `Transaction` serializes calls.
#[async_trait]
pub trait RepositoryTransaction: Send {
    async fn commit(&mut self, ctx: &Context) -> RepositoryResult<()>;

    async fn rollback(&mut self, ctx: &Context) -> RepositoryResult<()>;

    async fn savepoint(&mut self, ctx: &Context, name: &str) -> RepositoryResult<()>;

    async fn rollback_savepoint(&mut self, ctx: &Context, name: &str) -> RepositoryResult<()>;

    /// Store `scope.values()`; the backend may fill generated primary keys
    async fn insert(&mut self, ctx: &Context, scope: &mut Scope) -> RepositoryResult<()>;

    /// Apply the first value's fields to every record matching the filters
    async fn update(&mut self, ctx: &Context, scope: &Scope) -> RepositoryResult<u64>;

    async fn delete(&mut self, ctx: &Context, scope: &Scope) -> RepositoryResult<u64>;

    /// Load exactly one record into `scope.values()`
    async fn get(&mut self, ctx: &Context, scope: &mut Scope) -> RepositoryResult<()>;

    async fn list(&mut self, ctx: &Context, scope: &mut Scope) -> RepositoryResult<()>;

    async fn count(&mut self, ctx: &Context, scope: &Scope) -> RepositoryResult<i64>;

    /// Optional capability
    async fn exists(&mut self, _ctx: &Context, _scope: &Scope) -> RepositoryResult<bool> {
        Err(RepositoryError::unsupported("exists"))
    }
}
