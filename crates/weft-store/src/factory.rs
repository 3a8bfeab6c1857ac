//! Config-driven repository construction

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use weft_core::config::{DbConfig, Driver, RepositoryConfig};
use weft_core::errors::{RepositoryResult, WeftError};
use weft_core::model::ModelRegistry;
use weft_core::repository::Repository;
use weft_core::Db;

use crate::memory::MemoryRepository;
use crate::sqlite::SqliteRepository;

/// Open one configured repository
///
/// A relative sqlite `path` is resolved against `base` when given.
///
/// # Errors
///
/// Returns the backend's open error.
pub fn open_repository(
    name: &str,
    config: &RepositoryConfig,
    base: Option<&Path>,
) -> RepositoryResult<Arc<dyn Repository>> {
    let repository: Arc<dyn Repository> = match (config.driver, &config.path) {
        (Driver::Memory, _) => Arc::new(MemoryRepository::new(name)),
        (Driver::Sqlite, None) => Arc::new(SqliteRepository::open_in_memory(name)?),
        (Driver::Sqlite, Some(path)) => {
            let path = match base {
                Some(base) if path.is_relative() => base.join(path),
                _ => path.clone(),
            };
            info!(repository = name, path = %path.display(), "opening sqlite repository");
            Arc::new(SqliteRepository::open(name, path)?)
        }
    };
    Ok(repository)
}

/// Open every repository named in `config`, in name order
///
/// # Errors
///
/// Returns `Backend` naming the first repository that failed to open.
pub fn open_all(
    config: &DbConfig,
    base: Option<&Path>,
) -> weft_core::Result<Vec<Arc<dyn Repository>>> {
    config
        .repositories
        .iter()
        .map(|(name, repo)| {
            open_repository(name, repo, base).map_err(|e| WeftError::backend(name, "open", e))
        })
        .collect()
}

/// Open the configured repositories and build a `Db` over them
///
/// # Errors
///
/// See `open_all` and `Db::from_config`.
pub fn open_db(config: &DbConfig, registry: ModelRegistry, base: Option<&Path>) -> weft_core::Result<Db> {
    config.validate()?;
    let repositories = open_all(config, base)?;
    Db::from_config(config, registry, repositories)
}
