#![allow(clippy::result_large_err)]

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;
use tracing::warn;
use weft_core::context::Context;
use weft_core::errors::{RepositoryError, RepositoryErrorKind, RepositoryResult};
use weft_core::model::Record;
use weft_core::query::Scope;
use weft_core::repository::RepositoryTransaction;

use super::query::{order_by, where_clause, window};
use crate::errors::{
    check_context, duplicate_key, finished, from_rusqlite, from_serde_json, read_only,
    record_not_found, savepoint_not_found, Result,
};
use crate::records::{ensure_primary, key_of, merge_patch, update_patch};

/// An open SQLite transaction holding the repository connection
pub struct SqliteTransaction {
    guard: OwnedMutexGuard<Option<Connection>>,
    read_only: bool,
    finished: bool,
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn decode(body: &str) -> Result<Record> {
    serde_json::from_str(body).map_err(from_serde_json)
}

impl SqliteTransaction {
    pub(super) fn new(guard: OwnedMutexGuard<Option<Connection>>, read_only: bool) -> Self {
        Self {
            guard,
            read_only,
            finished: false,
        }
    }

    fn conn(&self, ctx: &Context, op: &str) -> Result<&Connection> {
        if self.finished {
            return Err(finished(op));
        }
        check_context(ctx, op)?;
        self.guard
            .as_ref()
            .ok_or_else(|| RepositoryError::storage("connection closed"))
    }

    fn writable(&self, ctx: &Context, op: &str) -> Result<&Connection> {
        let conn = self.conn(ctx, op)?;
        if self.read_only {
            return Err(read_only(op));
        }
        Ok(conn)
    }

    /// End the transaction with `statement`, restoring connection defaults
    fn finish(&mut self, statement: &str) -> Result<()> {
        if self.finished {
            return Err(finished(statement));
        }
        self.finished = true;
        let conn = self
            .guard
            .as_ref()
            .ok_or_else(|| RepositoryError::storage("connection closed"))?;

        let result = conn.execute_batch(statement).map_err(from_rusqlite);
        if result.is_err() && !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK").ok();
        }
        if self.read_only {
            conn.execute_batch("PRAGMA query_only = OFF;").ok();
        }
        result
    }

    fn select(&self, conn: &Connection, scope: &Scope) -> Result<Vec<Record>> {
        let filter = where_clause(scope);
        let order = order_by(scope);
        let limit = window(scope.pagination());
        let sql = format!(
            "SELECT body FROM records WHERE {}{}{}",
            filter.sql, order.sql, limit.sql
        );
        let params = filter
            .params
            .iter()
            .chain(order.params.iter())
            .chain(limit.params.iter());

        let mut stmt = conn.prepare(&sql).map_err(from_rusqlite)?;
        let bodies = stmt
            .query_map(params_from_iter(params), |row| row.get::<_, String>(0))
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;
        bodies.iter().map(|body| decode(body)).collect()
    }
}

#[async_trait]
impl RepositoryTransaction for SqliteTransaction {
    async fn commit(&mut self, ctx: &Context) -> RepositoryResult<()> {
        check_context(ctx, "commit")?;
        self.finish("COMMIT")
    }

    async fn rollback(&mut self, _ctx: &Context) -> RepositoryResult<()> {
        self.finish("ROLLBACK")
    }

    async fn savepoint(&mut self, ctx: &Context, name: &str) -> RepositoryResult<()> {
        let conn = self.conn(ctx, "savepoint")?;
        conn.execute_batch(&format!("SAVEPOINT {}", quote(name)))
            .map_err(from_rusqlite)
    }

    async fn rollback_savepoint(&mut self, ctx: &Context, name: &str) -> RepositoryResult<()> {
        let conn = self.conn(ctx, "rollback_savepoint")?;
        conn.execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", quote(name)))
            .map_err(|e| match from_rusqlite(e) {
                err if err.message().contains("no such savepoint") => savepoint_not_found(name),
                err => err,
            })
    }

    async fn insert(&mut self, ctx: &Context, scope: &mut Scope) -> RepositoryResult<()> {
        let conn = self.writable(ctx, "insert")?;
        let model = Arc::clone(scope.model());

        for record in scope.values_mut().iter_mut() {
            let key = ensure_primary(&model, record, || {
                conn.query_row(
                    "SELECT COALESCE(MAX(CAST(key AS INTEGER)), 0) + 1
                     FROM records WHERE collection = ?1",
                    [model.collection()],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(from_rusqlite)
            })?;
            let body = Value::Object(record.clone()).to_string();
            conn.execute(
                "INSERT INTO records (collection, key, body) VALUES (?1, ?2, ?3)",
                rusqlite::params![model.collection(), key_of(&key), body],
            )
            .map_err(|e| match from_rusqlite(e) {
                err if err.kind() == RepositoryErrorKind::Constraint => {
                    duplicate_key(model.collection(), &key_of(&key))
                }
                err => err,
            })?;
        }
        Ok(())
    }

    async fn update(&mut self, ctx: &Context, scope: &Scope) -> RepositoryResult<u64> {
        let conn = self.writable(ctx, "update")?;
        let model = scope.model();
        let patch = update_patch(model.collection(), scope.values())?;

        let filter = where_clause(scope);
        let mut stmt = conn
            .prepare(&format!("SELECT seq, body FROM records WHERE {}", filter.sql))
            .map_err(from_rusqlite)?;
        let rows = stmt
            .query_map(params_from_iter(filter.params.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;

        for (seq, body) in &rows {
            let mut record = decode(body)?;
            merge_patch(model, &mut record, patch);
            conn.execute(
                "UPDATE records SET body = ?1 WHERE seq = ?2",
                rusqlite::params![Value::Object(record).to_string(), seq],
            )
            .map_err(from_rusqlite)?;
        }
        Ok(rows.len() as u64)
    }

    async fn delete(&mut self, ctx: &Context, scope: &Scope) -> RepositoryResult<u64> {
        let conn = self.writable(ctx, "delete")?;
        let filter = where_clause(scope);
        let removed = conn
            .execute(
                &format!("DELETE FROM records WHERE {}", filter.sql),
                params_from_iter(filter.params.iter()),
            )
            .map_err(from_rusqlite)?;
        Ok(removed as u64)
    }

    async fn get(&mut self, ctx: &Context, scope: &mut Scope) -> RepositoryResult<()> {
        let conn = self.conn(ctx, "get")?;
        let found = self.select(conn, scope)?;
        let record = found
            .first()
            .ok_or_else(|| record_not_found(scope.model().collection()))?;
        let projected = scope.project(record);
        scope.set_values(vec![projected]);
        Ok(())
    }

    async fn list(&mut self, ctx: &Context, scope: &mut Scope) -> RepositoryResult<()> {
        let conn = self.conn(ctx, "list")?;
        let found = self.select(conn, scope)?;
        let projected = found.iter().map(|r| scope.project(r)).collect();
        scope.set_values(projected);
        Ok(())
    }

    async fn count(&mut self, ctx: &Context, scope: &Scope) -> RepositoryResult<i64> {
        let conn = self.conn(ctx, "count")?;
        let filter = where_clause(scope);
        conn.query_row(
            &format!("SELECT COUNT(*) FROM records WHERE {}", filter.sql),
            params_from_iter(filter.params.iter()),
            |row| row.get(0),
        )
        .map_err(from_rusqlite)
    }

    async fn exists(&mut self, ctx: &Context, scope: &Scope) -> RepositoryResult<bool> {
        let conn = self.conn(ctx, "exists")?;
        let filter = where_clause(scope);
        let hit = conn
            .query_row(
                &format!("SELECT 1 FROM records WHERE {} LIMIT 1", filter.sql),
                params_from_iter(filter.params.iter()),
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(from_rusqlite)?;
        Ok(hit.is_some())
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(conn) = self.guard.as_ref() {
            if !conn.is_autocommit() {
                warn!("sqlite sub-transaction dropped while open, rolling back");
                conn.execute_batch("ROLLBACK").ok();
            }
            if self.read_only {
                conn.execute_batch("PRAGMA query_only = OFF;").ok();
            }
        }
    }
}
