//! Database handle
//!
//! `Db` bundles the model registry, the repository mapper and default
//! transaction options. It is built once, cloned freely and shut down
//! explicitly with `close`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::config::DbConfig;
use crate::context::Context;
use crate::errors::{Result, WeftError};
use crate::mapper::RepositoryMapper;
use crate::model::ModelRegistry;
use crate::query::Scope;
use crate::repository::{Repository, TxOptions};
use crate::transaction::Transaction;
use crate::{log_op_end, log_op_error, log_op_start};

struct DbInner {
    registry: ModelRegistry,
    mapper: RepositoryMapper,
    options: TxOptions,
    closed: AtomicBool,
}

/// Shared entry point for transactions
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

impl Db {
    pub fn builder() -> DbBuilder {
        DbBuilder::default()
    }

    /// Build a handle from configuration
    ///
    /// Models declared in `config` are added to `registry`; `repositories`
    /// must contain every repository the configuration names.
    ///
    /// # Errors
    ///
    /// Returns `Config` for repositories missing from `repositories`, plus
    /// any model registration or mapping error.
    pub fn from_config(
        config: &DbConfig,
        mut registry: ModelRegistry,
        repositories: impl IntoIterator<Item = Arc<dyn Repository>>,
    ) -> Result<Self> {
        config.validate()?;
        for model in &config.models {
            registry.register(model.to_model_struct()?)?;
        }

        let repositories: Vec<Arc<dyn Repository>> = repositories.into_iter().collect();
        for name in config.repositories.keys() {
            if !repositories.iter().any(|r| r.id() == name) {
                return Err(WeftError::Config {
                    reason: format!("repository '{}' is configured but was not provided", name),
                });
            }
        }

        let mut builder = Db::builder()
            .registry(registry)
            .transaction_options(config.transaction);
        if config.disallow_default_repository {
            builder = builder.disallow_default_repository();
        }
        for repository in repositories {
            builder = builder.repository(repository);
        }
        if let Some(name) = &config.default_repository {
            builder = builder.default_repository(name);
        }
        for (repository, models) in config.repository_models() {
            builder = builder.repository_models(repository, models);
        }
        builder.build()
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.inner.registry
    }

    pub fn mapper(&self) -> &RepositoryMapper {
        &self.inner.mapper
    }

    /// Options used when `begin` gets `None`
    pub fn transaction_options(&self) -> TxOptions {
        self.inner.options
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Start a transaction
    ///
    /// # Errors
    ///
    /// See `Transaction::begin`.
    pub async fn begin(&self, ctx: &Context, options: Option<TxOptions>) -> Result<Transaction> {
        Transaction::begin(ctx, self, options).await
    }

    /// Insert in a transaction of its own
    ///
    /// # Errors
    ///
    /// Returns the operation's error after rolling back, or the commit error.
    pub async fn insert(&self, ctx: &Context, scope: &mut Scope) -> Result<()> {
        let mut tx = self.begin(ctx, None).await?;
        let result = tx.insert(scope).await;
        finish(tx, result).await
    }

    /// # Errors
    ///
    /// See `insert`.
    pub async fn update(&self, ctx: &Context, scope: &Scope) -> Result<u64> {
        let mut tx = self.begin(ctx, None).await?;
        let result = tx.update(scope).await;
        finish(tx, result).await
    }

    /// # Errors
    ///
    /// See `insert`.
    pub async fn delete(&self, ctx: &Context, scope: &Scope) -> Result<u64> {
        let mut tx = self.begin(ctx, None).await?;
        let result = tx.delete(scope).await;
        finish(tx, result).await
    }

    /// Read in a read-only transaction of its own
    ///
    /// # Errors
    ///
    /// See `insert`.
    pub async fn get(&self, ctx: &Context, scope: &mut Scope) -> Result<()> {
        let mut tx = self.begin(ctx, Some(self.read_options())).await?;
        let result = tx.get(scope).await;
        finish(tx, result).await
    }

    /// # Errors
    ///
    /// See `get`.
    pub async fn list(&self, ctx: &Context, scope: &mut Scope) -> Result<()> {
        let mut tx = self.begin(ctx, Some(self.read_options())).await?;
        let result = tx.list(scope).await;
        finish(tx, result).await
    }

    /// # Errors
    ///
    /// See `get`.
    pub async fn count(&self, ctx: &Context, scope: &Scope) -> Result<i64> {
        let mut tx = self.begin(ctx, Some(self.read_options())).await?;
        let result = tx.count(scope).await;
        finish(tx, result).await
    }

    /// # Errors
    ///
    /// Returns `NotImplemented` if the repository lacks the capability;
    /// otherwise see `get`.
    pub async fn exists(&self, ctx: &Context, scope: &Scope) -> Result<bool> {
        let mut tx = self.begin(ctx, Some(self.read_options())).await?;
        let result = tx.exists(scope).await;
        finish(tx, result).await
    }

    fn read_options(&self) -> TxOptions {
        TxOptions {
            read_only: true,
            ..self.inner.options
        }
    }

    /// Shut down every repository once
    ///
    /// Later calls are no-ops; any later `begin` fails with `DatabaseClosed`.
    ///
    /// # Errors
    ///
    /// Returns the aggregated close failures. The handle counts as closed
    /// either way.
    pub async fn close(&self, ctx: &Context) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log_op_start!("db.close");
        let start = std::time::Instant::now();

        let mut errors = Vec::new();
        for repository in self.inner.mapper.repositories() {
            if let Err(e) = repository.close(ctx).await {
                errors.push(WeftError::backend(repository.id(), "close", e));
            }
        }

        match WeftError::aggregate("close", errors) {
            None => {
                log_op_end!("db.close", duration_ms = start.elapsed().as_millis() as u64);
                Ok(())
            }
            Some(e) => {
                log_op_error!("db.close", e, duration_ms = start.elapsed().as_millis() as u64);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("models", &self.inner.registry.len())
            .field("mapper", &self.inner.mapper)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn finish<T>(mut tx: Transaction, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(tx_id = %tx.id(), error = %rollback, "rollback after failed operation failed");
            }
            Err(e)
        }
    }
}

/// Incremental constructor for `Db`
#[derive(Default)]
pub struct DbBuilder {
    registry: ModelRegistry,
    repositories: Vec<Arc<dyn Repository>>,
    default_repository: Option<String>,
    repository_models: Vec<(String, Vec<String>)>,
    disallow_default: bool,
    options: TxOptions,
}

impl DbBuilder {
    pub fn registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repositories.push(repository);
        self
    }

    /// Fallback repository for models without an explicit assignment
    pub fn default_repository(mut self, id: impl Into<String>) -> Self {
        self.default_repository = Some(id.into());
        self
    }

    /// Assign collections to a repository
    pub fn repository_models<I, S>(mut self, repository: impl Into<String>, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.repository_models.push((
            repository.into(),
            collections.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Require an explicit repository for every model
    pub fn disallow_default_repository(mut self) -> Self {
        self.disallow_default = true;
        self
    }

    pub fn transaction_options(mut self, options: TxOptions) -> Self {
        self.options = options;
        self
    }

    /// # Errors
    ///
    /// Returns `InvalidModel` if the registry fails verification,
    /// `RepositoryAlreadyRegistered` for duplicate ids, `ModelNotRegistered`
    /// for assignments of unknown collections, and `Config` or
    /// `RepositoryNotRegistered` for unknown repositories.
    pub fn build(self) -> Result<Db> {
        self.registry.verify()?;

        let mut mapper = RepositoryMapper::new();
        if self.disallow_default {
            mapper.disallow_default();
        }
        for repository in self.repositories {
            mapper.register_repository(repository)?;
        }
        if let Some(id) = &self.default_repository {
            mapper.set_default(id)?;
        }
        for (repository, collections) in &self.repository_models {
            for collection in collections {
                self.registry.get(collection)?;
                mapper.map_model(collection, repository)?;
            }
        }

        Ok(Db {
            inner: Arc::new(DbInner {
                registry: self.registry,
                mapper,
                options: self.options,
                closed: AtomicBool::new(false),
            }),
        })
    }
}
