//! SQLite repository
//!
//! All collections share one `records` table holding JSON bodies. A
//! sub-transaction owns the connection until it finishes, so transactions
//! on the same repository run one after another.

#![allow(clippy::result_large_err)]

mod query;
mod transaction;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::debug;
use weft_core::context::Context;
use weft_core::errors::{RepositoryError, RepositoryResult};
use weft_core::repository::{IsolationLevel, Repository, RepositoryTransaction, TxOptions};

use crate::errors::{check_context, from_rusqlite, Result};
use crate::migrations::apply_migrations;

pub use transaction::SqliteTransaction;

/// Repository backed by one SQLite connection
pub struct SqliteRepository {
    id: String,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteRepository {
    /// Open (creating if needed) the database file at `path`
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the file can't be opened or migrated.
    pub fn open(id: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(from_rusqlite)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(from_rusqlite)?;
        Self::from_connection(id, conn)
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    ///
    /// See `open`.
    pub fn open_in_memory(id: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(from_rusqlite)?;
        Self::from_connection(id, conn)
    }

    /// Wrap an existing connection, applying pending migrations
    ///
    /// # Errors
    ///
    /// See `open`.
    pub fn from_connection(id: impl Into<String>, mut conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(from_rusqlite)?;
        apply_migrations(&mut conn)?;
        Ok(Self {
            id: id.into(),
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }
}

impl std::fmt::Debug for SqliteRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRepository").field("id", &self.id).finish()
    }
}

fn begin_statement(options: &TxOptions) -> &'static str {
    match options.isolation {
        IsolationLevel::Serializable if !options.read_only => "BEGIN IMMEDIATE",
        _ => "BEGIN DEFERRED",
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin(
        &self,
        ctx: &Context,
        options: &TxOptions,
    ) -> RepositoryResult<Box<dyn RepositoryTransaction>> {
        check_context(ctx, "begin")?;
        let guard = Arc::clone(&self.conn).lock_owned().await;
        let conn = guard.as_ref().ok_or_else(|| {
            RepositoryError::storage(format!("repository '{}' is closed", self.id))
        })?;

        if options.read_only {
            conn.execute_batch("PRAGMA query_only = ON;")
                .map_err(from_rusqlite)?;
        }
        if let Err(e) = conn.execute_batch(begin_statement(options)) {
            conn.execute_batch("PRAGMA query_only = OFF;").ok();
            return Err(from_rusqlite(e));
        }
        debug!(repository = %self.id, statement = begin_statement(options), "sqlite sub-transaction opened");

        Ok(Box::new(SqliteTransaction::new(guard, options.read_only)))
    }

    async fn close(&self, _ctx: &Context) -> RepositoryResult<()> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| from_rusqlite(e))?;
        }
        Ok(())
    }
}
