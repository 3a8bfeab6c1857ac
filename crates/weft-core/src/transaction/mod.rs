//! Cross-repository transaction coordinator
//!
//! A `Transaction` spans every repository its scopes resolve to. Each
//! repository is enlisted lazily on first use and keeps one sub-transaction
//! for the rest of the transaction. Savepoints are tracked here as snapshots
//! of the participant set; a native savepoint is only opened on the
//! participants enlisted since the previous checkpoint (see the savepoint
//! contract on `crate::repository`).
//!
//! Commit is sequential in enlistment order. There is no two-phase commit:
//! a failure part way through leaves earlier participants committed and is
//! reported as an error.

pub mod participant;
pub mod savepoint;

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};
use weft_core_types::TransactionId;

use crate::context::Context;
use crate::db::Db;
use crate::errors::{RepositoryResult, Result, WeftError};
use crate::model::RelationKind;
use crate::query::{FilterField, FilterOperator, Scope};
use crate::repository::{Repository, TxOptions};
use crate::{log_op_end, log_op_error, log_op_start};

pub use participant::{ParticipantId, ParticipantInfo};
pub use savepoint::{Enlistment, Savepoint};

use participant::Participant;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lifecycle state; `Committed` and `RolledBack` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionState::Active => "active",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy)]
enum ReadOp {
    Get,
    List,
}

impl ReadOp {
    fn name(self) -> &'static str {
        match self {
            ReadOp::Get => "get",
            ReadOp::List => "list",
        }
    }
}

/// One logical transaction over any number of repositories
///
/// Not meant for concurrent use; every method takes `&mut self`.
pub struct Transaction {
    id: TransactionId,
    ctx: Context,
    db: Db,
    options: TxOptions,
    state: TransactionState,
    participants: Vec<Participant>,
    savepoints: Vec<Savepoint>,
    next_participant: u64,
}

impl Transaction {
    /// Open a transaction with no participants and an empty savepoint stack
    ///
    /// `options` falls back to the database default.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInTransaction` if `ctx` already belongs to a
    /// transaction, `DatabaseClosed` after `Db::close`, and the context
    /// error if `ctx` is done.
    pub async fn begin(ctx: &Context, db: &Db, options: Option<TxOptions>) -> Result<Self> {
        let id = TransactionId::new();
        log_op_start!("transaction.begin", tx_id = %id, request_id = %ctx.request_id());
        let start = Instant::now();

        let result = Self::begin_impl(id.clone(), ctx, db, options);
        match result {
            Ok(tx) => {
                log_op_end!(
                    "transaction.begin",
                    duration_ms = start.elapsed().as_millis() as u64,
                    tx_id = %id
                );
                Ok(tx)
            }
            Err(e) => {
                log_op_error!(
                    "transaction.begin",
                    e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    tx_id = %id
                );
                Err(e)
            }
        }
    }

    fn begin_impl(
        id: TransactionId,
        ctx: &Context,
        db: &Db,
        options: Option<TxOptions>,
    ) -> Result<Self> {
        if let Some(active) = ctx.transaction_id() {
            return Err(WeftError::AlreadyInTransaction {
                tx_id: active.to_string(),
            });
        }
        if db.is_closed() {
            return Err(WeftError::DatabaseClosed);
        }
        if let Some(err) = ctx.err("transaction.begin") {
            return Err(err);
        }

        Ok(Self {
            ctx: ctx.with_transaction(id.clone()),
            id,
            db: db.clone(),
            options: options.unwrap_or_else(|| db.transaction_options()),
            state: TransactionState::Active,
            participants: Vec::new(),
            savepoints: Vec::new(),
            next_participant: 0,
        })
    }

    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Context carrying this transaction's marker
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn options(&self) -> &TxOptions {
        &self.options
    }

    /// Enlisted participants in enlistment order
    pub fn participants(&self) -> Vec<ParticipantInfo> {
        self.participants.iter().map(Participant::info).collect()
    }

    /// Savepoint stack, oldest first
    pub fn savepoints(&self) -> &[Savepoint] {
        &self.savepoints
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            state => Err(WeftError::TransactionClosed {
                tx_id: self.id.to_string(),
                state: state.to_string(),
            }),
        }
    }

    // ---------- dispatch ----------

    /// Resolve the scope's repository, enlisting it on first use
    async fn target(
        &mut self,
        op: &'static str,
        scope: &Scope,
    ) -> Result<(&Context, &mut Participant)> {
        self.ensure_active()?;
        let repository = self
            .db
            .mapper()
            .get_repository_by_model_struct(scope.model())?;

        let found = self
            .participants
            .iter()
            .position(|p| p.repository.id() == repository.id());
        let index = match found {
            Some(index) => index,
            None => self.enlist(repository).await?,
        };

        let participant = &mut self.participants[index];
        debug!(
            tx_id = %self.id,
            scope_id = %scope.id(),
            model = scope.model().collection(),
            repository = participant.repository.id(),
            op,
            "{} dispatch",
            scope
        );
        Ok((&self.ctx, participant))
    }

    async fn enlist(&mut self, repository: Arc<dyn Repository>) -> Result<usize> {
        let handle = call(
            &self.ctx,
            repository.id(),
            "begin",
            repository.begin(&self.ctx, &self.options),
        )
        .await?;

        let id = ParticipantId(self.next_participant);
        self.next_participant += 1;
        debug!(
            tx_id = %self.id,
            repository = repository.id(),
            participant = %id,
            participants = self.participants.len() + 1,
            "participant enlisted"
        );
        self.participants.push(Participant {
            id,
            repository,
            handle,
        });
        Ok(self.participants.len() - 1)
    }

    /// Store `scope.values()` in the scope's repository
    ///
    /// # Errors
    ///
    /// Returns `TransactionClosed` on a finished transaction,
    /// `RepositoryNotRegistered` for an unmapped model and any backend or
    /// context error.
    pub async fn insert(&mut self, scope: &mut Scope) -> Result<()> {
        let (ctx, participant) = self.target("insert", scope).await?;
        let repository = participant.repository.clone();
        call(ctx, repository.id(), "insert", participant.handle.insert(ctx, scope)).await
    }

    /// # Errors
    ///
    /// See `insert`.
    pub async fn update(&mut self, scope: &Scope) -> Result<u64> {
        let (ctx, participant) = self.target("update", scope).await?;
        let repository = participant.repository.clone();
        call(ctx, repository.id(), "update", participant.handle.update(ctx, scope)).await
    }

    /// # Errors
    ///
    /// See `insert`.
    pub async fn delete(&mut self, scope: &Scope) -> Result<u64> {
        let (ctx, participant) = self.target("delete", scope).await?;
        let repository = participant.repository.clone();
        call(ctx, repository.id(), "delete", participant.handle.delete(ctx, scope)).await
    }

    /// # Errors
    ///
    /// See `insert`.
    pub async fn count(&mut self, scope: &Scope) -> Result<i64> {
        let (ctx, participant) = self.target("count", scope).await?;
        let repository = participant.repository.clone();
        call(ctx, repository.id(), "count", participant.handle.count(ctx, scope)).await
    }

    /// # Errors
    ///
    /// Returns `NotImplemented` if the repository lacks the capability;
    /// otherwise see `insert`.
    pub async fn exists(&mut self, scope: &Scope) -> Result<bool> {
        let (ctx, participant) = self.target("exists", scope).await?;
        let repository = participant.repository.clone();
        call(ctx, repository.id(), "exists", participant.handle.exists(ctx, scope)).await
    }

    /// Load one record, then every included relation
    ///
    /// # Errors
    ///
    /// See `insert`; errors from included scopes are returned as well.
    pub async fn get(&mut self, scope: &mut Scope) -> Result<()> {
        self.read(scope, ReadOp::Get).await
    }

    /// Load matching records, then every included relation
    ///
    /// # Errors
    ///
    /// See `get`.
    pub async fn list(&mut self, scope: &mut Scope) -> Result<()> {
        self.read(scope, ReadOp::List).await
    }

    fn read<'a>(&'a mut self, scope: &'a mut Scope, op: ReadOp) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (ctx, participant) = self.target(op.name(), scope).await?;
            let repository = participant.repository.clone();
            match op {
                ReadOp::Get => {
                    call(ctx, repository.id(), "get", participant.handle.get(ctx, scope)).await?
                }
                ReadOp::List => {
                    call(ctx, repository.id(), "list", participant.handle.list(ctx, scope)).await?
                }
            }

            let constraints: Vec<Option<FilterField>> = scope
                .included()
                .iter()
                .map(|included| relation_filter(scope, included.relation.kind, &included.relation.foreign_key, &included.scope))
                .collect();

            for (included, constraint) in scope.included_mut().iter_mut().zip(constraints) {
                match constraint {
                    Some(filter) => {
                        included.scope.add_filter(filter)?;
                        self.read(&mut included.scope, ReadOp::List).await?;
                    }
                    None => included.scope.set_values(Vec::new()),
                }
            }
            Ok(())
        })
    }

    // ---------- savepoints ----------

    /// Push a named checkpoint
    ///
    /// Only participants enlisted since the previous checkpoint receive a
    /// native savepoint; the pushed record holds the full participant set.
    ///
    /// # Errors
    ///
    /// Returns `TransactionClosed`, `InvalidInput` for an empty name, or the
    /// first backend error (the checkpoint is then not pushed).
    pub async fn savepoint(&mut self, name: &str) -> Result<()> {
        log_op_start!("transaction.savepoint", tx_id = %self.id, savepoint = name);
        let start = Instant::now();

        match self.savepoint_impl(name).await {
            Ok(()) => {
                log_op_end!(
                    "transaction.savepoint",
                    duration_ms = start.elapsed().as_millis() as u64,
                    tx_id = %self.id,
                    savepoint = name,
                    stack_depth = self.savepoints.len()
                );
                Ok(())
            }
            Err(e) => {
                log_op_error!(
                    "transaction.savepoint",
                    e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    tx_id = %self.id,
                    savepoint = name
                );
                Err(e)
            }
        }
    }

    async fn savepoint_impl(&mut self, name: &str) -> Result<()> {
        self.ensure_active()?;
        if name.is_empty() {
            return Err(WeftError::invalid_input("savepoint name is empty"));
        }

        let previous: HashSet<ParticipantId> = self
            .savepoints
            .last()
            .map(|top| top.participants.iter().map(|e| e.id).collect())
            .unwrap_or_default();

        let mut delta = Vec::new();
        for participant in self
            .participants
            .iter_mut()
            .filter(|p| !previous.contains(&p.id))
        {
            let repository = participant.repository.clone();
            call(
                &self.ctx,
                repository.id(),
                "savepoint",
                participant.handle.savepoint(&self.ctx, name),
            )
            .await?;
            delta.push(participant.id);
        }

        self.savepoints.push(Savepoint {
            name: name.to_string(),
            participants: self
                .participants
                .iter()
                .map(|p| Enlistment {
                    id: p.id,
                    repository: p.repository.id().to_string(),
                })
                .collect(),
            delta,
        });
        Ok(())
    }

    /// Roll back to the most recent checkpoint named `name`
    ///
    /// Participants enlisted after the checkpoint are rolled back entirely
    /// and leave the transaction. Participants that received the native
    /// savepoint get `rollback_savepoint(name)`. Newer checkpoints are
    /// dropped; the target stays on top and can be rolled back to again.
    ///
    /// # Errors
    ///
    /// Returns `TransactionClosed`, `SavepointNotFound`, or the first backend
    /// error. On a backend error the failing participant stays enlisted. The
    /// stack is left untouched unless some participant was already rolled
    /// out, in which case it is truncated to the target as on success.
    pub async fn rollback_savepoint(&mut self, name: &str) -> Result<()> {
        log_op_start!("transaction.rollback_savepoint", tx_id = %self.id, savepoint = name);
        let start = Instant::now();

        match self.rollback_savepoint_impl(name).await {
            Ok(()) => {
                log_op_end!(
                    "transaction.rollback_savepoint",
                    duration_ms = start.elapsed().as_millis() as u64,
                    tx_id = %self.id,
                    savepoint = name,
                    stack_depth = self.savepoints.len(),
                    participants = self.participants.len()
                );
                Ok(())
            }
            Err(e) => {
                log_op_error!(
                    "transaction.rollback_savepoint",
                    e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    tx_id = %self.id,
                    savepoint = name
                );
                Err(e)
            }
        }
    }

    async fn rollback_savepoint_impl(&mut self, name: &str) -> Result<()> {
        self.ensure_active()?;
        let position = self
            .savepoints
            .iter()
            .rposition(|s| s.name == name)
            .ok_or_else(|| WeftError::SavepointNotFound {
                name: name.to_string(),
            })?;
        let mut rolled_out = false;
        let result = self.rewind_to(position, &mut rolled_out).await;

        // Newer checkpoints may list participants that are gone now
        if result.is_ok() || rolled_out {
            self.savepoints.truncate(position + 1);
        }
        result
    }

    async fn rewind_to(&mut self, position: usize, rolled_out: &mut bool) -> Result<()> {
        let target = &self.savepoints[position];

        // Enlisted after the checkpoint: no native savepoint covers them
        loop {
            let found = self
                .participants
                .iter()
                .position(|p| !target.contains(p.id));
            let index = match found {
                Some(index) => index,
                None => break,
            };
            let participant = &mut self.participants[index];
            let repository = participant.repository.clone();
            call(
                &self.ctx,
                repository.id(),
                "rollback",
                participant.handle.rollback(&self.ctx),
            )
            .await?;
            let removed = self.participants.remove(index);
            *rolled_out = true;
            debug!(
                tx_id = %self.id,
                repository = removed.repository.id(),
                participant = %removed.id,
                savepoint = %target.name,
                "participant rolled out"
            );
        }

        for participant in self
            .participants
            .iter_mut()
            .filter(|p| target.in_delta(p.id))
        {
            let repository = participant.repository.clone();
            call(
                &self.ctx,
                repository.id(),
                "rollback_savepoint",
                participant.handle.rollback_savepoint(&self.ctx, &target.name),
            )
            .await?;
        }
        Ok(())
    }

    // ---------- completion ----------

    /// Commit every participant in enlistment order
    ///
    /// After the first failure the remaining participants are rolled back
    /// instead. The transaction ends `Committed` only if every participant
    /// committed, otherwise `RolledBack`.
    ///
    /// # Errors
    ///
    /// Returns `TransactionClosed`, or every per-participant failure
    /// aggregated into one error.
    pub async fn commit(&mut self) -> Result<()> {
        log_op_start!(
            "transaction.commit",
            tx_id = %self.id,
            participants = self.participants.len()
        );
        let start = Instant::now();

        match self.commit_impl().await {
            Ok(()) => {
                log_op_end!(
                    "transaction.commit",
                    duration_ms = start.elapsed().as_millis() as u64,
                    tx_id = %self.id
                );
                Ok(())
            }
            Err(e) => {
                log_op_error!(
                    "transaction.commit",
                    e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    tx_id = %self.id
                );
                Err(e)
            }
        }
    }

    async fn commit_impl(&mut self) -> Result<()> {
        self.ensure_active()?;

        let mut errors = Vec::new();
        for mut participant in std::mem::take(&mut self.participants) {
            let repository = participant.repository.clone();
            let result = if errors.is_empty() {
                call(&self.ctx, repository.id(), "commit", participant.handle.commit(&self.ctx)).await
            } else {
                call(&self.ctx, repository.id(), "rollback", participant.handle.rollback(&self.ctx)).await
            };
            if let Err(e) = result {
                errors.push(e);
            }
        }
        self.savepoints.clear();
        self.ctx.end_transaction();

        match WeftError::aggregate("commit", errors) {
            None => {
                self.state = TransactionState::Committed;
                Ok(())
            }
            Some(err) => {
                self.state = TransactionState::RolledBack;
                Err(err)
            }
        }
    }

    /// Roll back every participant
    ///
    /// Every participant is attempted; the transaction ends `RolledBack`
    /// regardless of failures.
    ///
    /// # Errors
    ///
    /// Returns `TransactionClosed`, or every per-participant failure
    /// aggregated into one error.
    pub async fn rollback(&mut self) -> Result<()> {
        log_op_start!(
            "transaction.rollback",
            tx_id = %self.id,
            participants = self.participants.len()
        );
        let start = Instant::now();

        match self.rollback_impl().await {
            Ok(()) => {
                log_op_end!(
                    "transaction.rollback",
                    duration_ms = start.elapsed().as_millis() as u64,
                    tx_id = %self.id
                );
                Ok(())
            }
            Err(e) => {
                log_op_error!(
                    "transaction.rollback",
                    e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    tx_id = %self.id
                );
                Err(e)
            }
        }
    }

    async fn rollback_impl(&mut self) -> Result<()> {
        self.ensure_active()?;

        let mut errors = Vec::new();
        for mut participant in std::mem::take(&mut self.participants) {
            let repository = participant.repository.clone();
            if let Err(e) = call(
                &self.ctx,
                repository.id(),
                "rollback",
                participant.handle.rollback(&self.ctx),
            )
            .await
            {
                errors.push(e);
            }
        }
        self.savepoints.clear();
        self.ctx.end_transaction();
        self.state = TransactionState::RolledBack;

        match WeftError::aggregate("rollback", errors) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            warn!(
                tx_id = %self.id,
                participants = self.participants.len(),
                "transaction dropped while active; sub-transactions are abandoned"
            );
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("participants", &self.participants())
            .field("savepoints", &self.savepoints)
            .finish()
    }
}

/// Run one backend call under the context, tagging failures with the
/// repository and operation
async fn call<T>(
    ctx: &Context,
    repository: &str,
    op: &'static str,
    fut: impl Future<Output = RepositoryResult<T>>,
) -> Result<T> {
    ctx.run(op, async move {
        fut.await
            .map_err(|e| WeftError::backend(repository, op, e))
    })
    .await
}

/// Filter tying an included scope to the keys found in the root results
///
/// `None` when the root results carry no keys, so nothing can match.
fn relation_filter(
    root: &Scope,
    kind: RelationKind,
    foreign_key: &str,
    related: &Scope,
) -> Option<FilterField> {
    let (field, keys): (String, Vec<Value>) = match kind {
        RelationKind::BelongsTo => (
            related.model().primary().name.clone(),
            root.field_values(foreign_key),
        ),
        RelationKind::HasOne | RelationKind::HasMany => (
            foreign_key.to_string(),
            root.field_values(&root.model().primary().name),
        ),
    };
    (!keys.is_empty()).then(|| FilterField::new(field, FilterOperator::In, keys))
}
