//! In-process repository
//!
//! Committed state lives behind a mutex shared by every sub-transaction.
//! A sub-transaction copies a collection the first time it touches it and
//! publishes its copies on commit; a collection written concurrently since
//! the copy was taken fails the commit with `Conflict`. Savepoints are
//! clones of the working copies.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use weft_core::context::Context;
use weft_core::errors::{RepositoryError, RepositoryErrorKind, RepositoryResult};
use weft_core::model::Record;
use weft_core::query::Scope;
use weft_core::repository::{Repository, RepositoryTransaction, TxOptions};

use crate::errors::{
    check_context, duplicate_key, finished, read_only, record_not_found, savepoint_not_found,
    Result,
};
use crate::records::{ensure_primary, key_of, merge_patch, update_patch};

#[derive(Debug, Default)]
struct Table {
    version: u64,
    rows: Vec<Record>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Table>,
    closed: bool,
}

/// Repository keeping every collection in memory
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    id: String,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRepository {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Committed rows of `collection`, in insertion order
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the state lock is poisoned.
    pub fn rows(&self, collection: &str) -> Result<Vec<Record>> {
        let state = lock(&self.state)?;
        Ok(state
            .tables
            .get(collection)
            .map(|t| t.rows.clone())
            .unwrap_or_default())
    }
}

fn lock(state: &Mutex<MemoryState>) -> Result<MutexGuard<'_, MemoryState>> {
    state
        .lock()
        .map_err(|_| RepositoryError::storage("memory repository lock poisoned"))
}

#[async_trait]
impl Repository for MemoryRepository {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin(
        &self,
        ctx: &Context,
        options: &TxOptions,
    ) -> RepositoryResult<Box<dyn RepositoryTransaction>> {
        check_context(ctx, "begin")?;
        if lock(&self.state)?.closed {
            return Err(RepositoryError::storage(format!(
                "repository '{}' is closed",
                self.id
            )));
        }
        debug!(repository = %self.id, read_only = options.read_only, "memory sub-transaction opened");
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            read_only: options.read_only,
            work: WorkingSet::default(),
            savepoints: Vec::new(),
            finished: false,
        }))
    }

    async fn close(&self, _ctx: &Context) -> RepositoryResult<()> {
        let mut state = lock(&self.state)?;
        state.closed = true;
        Ok(())
    }
}

/// Private copy of one collection
#[derive(Debug, Clone)]
struct Copy {
    base_version: u64,
    rows: Vec<Record>,
}

#[derive(Debug, Clone, Default)]
struct WorkingSet {
    copies: BTreeMap<String, Copy>,
    written: BTreeSet<String>,
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    read_only: bool,
    work: WorkingSet,
    savepoints: Vec<(String, WorkingSet)>,
    finished: bool,
}

impl MemoryTransaction {
    fn check(&self, ctx: &Context, op: &str) -> Result<()> {
        if self.finished {
            return Err(finished(op));
        }
        check_context(ctx, op)
    }

    fn check_write(&self, ctx: &Context, op: &str) -> Result<()> {
        self.check(ctx, op)?;
        if self.read_only {
            return Err(read_only(op));
        }
        Ok(())
    }

    /// Working copy of `collection`, taken from committed state on first use
    fn rows(&mut self, collection: &str) -> Result<&mut Vec<Record>> {
        if !self.work.copies.contains_key(collection) {
            let state = lock(&self.state)?;
            let copy = match state.tables.get(collection) {
                Some(table) => Copy {
                    base_version: table.version,
                    rows: table.rows.clone(),
                },
                None => Copy {
                    base_version: 0,
                    rows: Vec::new(),
                },
            };
            drop(state);
            self.work.copies.insert(collection.to_string(), copy);
        }
        self.work
            .copies
            .get_mut(collection)
            .map(|copy| &mut copy.rows)
            .ok_or_else(|| RepositoryError::storage("working copy vanished"))
    }

    fn rows_for_write(&mut self, collection: &str) -> Result<&mut Vec<Record>> {
        self.work.written.insert(collection.to_string());
        self.rows(collection)
    }

    fn matching(&mut self, scope: &Scope) -> Result<Vec<Record>> {
        let rows = self.rows(scope.model().collection())?;
        Ok(rows.iter().filter(|r| scope.matches(r)).cloned().collect())
    }
}

#[async_trait]
impl RepositoryTransaction for MemoryTransaction {
    async fn commit(&mut self, ctx: &Context) -> RepositoryResult<()> {
        self.check(ctx, "commit")?;
        self.finished = true;
        let work = std::mem::take(&mut self.work);
        self.savepoints.clear();

        let mut state = lock(&self.state)?;
        for collection in &work.written {
            let current = state.tables.get(collection).map_or(0, |t| t.version);
            let base = work.copies.get(collection).map_or(0, |c| c.base_version);
            if current != base {
                return Err(RepositoryError::new(
                    RepositoryErrorKind::Conflict,
                    format!("'{}' was modified by a concurrent transaction", collection),
                ));
            }
        }
        for collection in work.written {
            if let Some(copy) = work.copies.get(&collection) {
                let table = state.tables.entry(collection).or_default();
                table.rows = copy.rows.clone();
                table.version += 1;
            }
        }
        Ok(())
    }

    async fn rollback(&mut self, _ctx: &Context) -> RepositoryResult<()> {
        if self.finished {
            return Err(finished("rollback"));
        }
        self.finished = true;
        self.work = WorkingSet::default();
        self.savepoints.clear();
        Ok(())
    }

    async fn savepoint(&mut self, ctx: &Context, name: &str) -> RepositoryResult<()> {
        self.check(ctx, "savepoint")?;
        self.savepoints.push((name.to_string(), self.work.clone()));
        Ok(())
    }

    async fn rollback_savepoint(&mut self, ctx: &Context, name: &str) -> RepositoryResult<()> {
        self.check(ctx, "rollback_savepoint")?;
        let index = self
            .savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| savepoint_not_found(name))?;
        self.savepoints.truncate(index + 1);
        self.work = self.savepoints[index].1.clone();
        Ok(())
    }

    async fn insert(&mut self, ctx: &Context, scope: &mut Scope) -> RepositoryResult<()> {
        self.check_write(ctx, "insert")?;
        let model = Arc::clone(scope.model());
        let primary = model.primary().name.clone();
        let rows = self.rows_for_write(model.collection())?;

        let mut staged: Vec<Record> = Vec::with_capacity(scope.values().len());
        for record in scope.values_mut().iter_mut() {
            let key = ensure_primary(&model, record, || {
                let max = rows
                    .iter()
                    .chain(staged.iter())
                    .filter_map(|r| r.get(&primary).and_then(Value::as_i64))
                    .max()
                    .unwrap_or(0);
                Ok(max + 1)
            })?;
            let taken = |r: &Record| r.get(&primary) == Some(&key);
            if rows.iter().any(taken) || staged.iter().any(taken) {
                return Err(duplicate_key(model.collection(), &key_of(&key)));
            }
            staged.push(record.clone());
        }
        rows.extend(staged);
        Ok(())
    }

    async fn update(&mut self, ctx: &Context, scope: &Scope) -> RepositoryResult<u64> {
        self.check_write(ctx, "update")?;
        let model = scope.model();
        let patch = update_patch(model.collection(), scope.values())?;
        let rows = self.rows_for_write(model.collection())?;

        let mut changed = 0;
        for row in rows.iter_mut().filter(|r| scope.matches(r)) {
            merge_patch(model, row, patch);
            changed += 1;
        }
        Ok(changed)
    }

    async fn delete(&mut self, ctx: &Context, scope: &Scope) -> RepositoryResult<u64> {
        self.check_write(ctx, "delete")?;
        let rows = self.rows_for_write(scope.model().collection())?;
        let before = rows.len();
        rows.retain(|r| !scope.matches(r));
        Ok((before - rows.len()) as u64)
    }

    async fn get(&mut self, ctx: &Context, scope: &mut Scope) -> RepositoryResult<()> {
        self.check(ctx, "get")?;
        let found = scope.apply_window(self.matching(scope)?);
        let record = found
            .first()
            .ok_or_else(|| record_not_found(scope.model().collection()))?;
        let projected = scope.project(record);
        scope.set_values(vec![projected]);
        Ok(())
    }

    async fn list(&mut self, ctx: &Context, scope: &mut Scope) -> RepositoryResult<()> {
        self.check(ctx, "list")?;
        let found = scope.apply_window(self.matching(scope)?);
        let projected = found.iter().map(|r| scope.project(r)).collect();
        scope.set_values(projected);
        Ok(())
    }

    async fn count(&mut self, ctx: &Context, scope: &Scope) -> RepositoryResult<i64> {
        self.check(ctx, "count")?;
        Ok(self.matching(scope)?.len() as i64)
    }

    async fn exists(&mut self, ctx: &Context, scope: &Scope) -> RepositoryResult<bool> {
        self.check(ctx, "exists")?;
        let collection = scope.model().collection().to_string();
        Ok(self.rows(&collection)?.iter().any(|r| scope.matches(r)))
    }
}
