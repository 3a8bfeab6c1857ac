//! Model to repository resolution

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::{Result, WeftError};
use crate::model::ModelStruct;
use crate::repository::Repository;

/// Resolves a model to the repository responsible for it
///
/// Populated at start-up; a `Db` owns it behind an `Arc` and never mutates
/// it afterwards, so lookups are safe from any task.
#[derive(Clone, Default)]
pub struct RepositoryMapper {
    repositories: BTreeMap<String, Arc<dyn Repository>>,
    // Registration order, for deterministic shutdown
    order: Vec<String>,
    models: BTreeMap<String, String>,
    default_repository: Option<String>,
    allow_default: bool,
}

impl RepositoryMapper {
    pub fn new() -> Self {
        Self {
            allow_default: true,
            ..Self::default()
        }
    }

    /// Disable the fallback repository for unmapped models
    pub fn disallow_default(&mut self) {
        self.allow_default = false;
        self.default_repository = None;
    }

    /// Add a repository
    ///
    /// The first repository added becomes the default unless defaults are
    /// disallowed.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryAlreadyRegistered` if the id is taken.
    pub fn register_repository(&mut self, repository: Arc<dyn Repository>) -> Result<()> {
        let id = repository.id().to_string();
        if self.repositories.contains_key(&id) {
            return Err(WeftError::RepositoryAlreadyRegistered { repository: id });
        }
        if self.allow_default && self.default_repository.is_none() {
            self.default_repository = Some(id.clone());
        }
        self.order.push(id.clone());
        self.repositories.insert(id, repository);
        Ok(())
    }

    /// Assign a collection to a repository
    ///
    /// # Errors
    ///
    /// Returns `RepositoryNotRegistered` if the repository is unknown.
    pub fn map_model(&mut self, collection: &str, repository: &str) -> Result<()> {
        if !self.repositories.contains_key(repository) {
            return Err(WeftError::RepositoryNotRegistered {
                model: collection.to_string(),
            });
        }
        self.models
            .insert(collection.to_string(), repository.to_string());
        Ok(())
    }

    /// Choose the fallback repository explicitly
    ///
    /// # Errors
    ///
    /// Returns `Config` if defaults are disallowed or the repository is unknown.
    pub fn set_default(&mut self, repository: &str) -> Result<()> {
        if !self.allow_default {
            return Err(WeftError::Config {
                reason: format!(
                    "default repository '{}' set while defaults are disallowed",
                    repository
                ),
            });
        }
        if !self.repositories.contains_key(repository) {
            return Err(WeftError::Config {
                reason: format!("default repository '{}' is not registered", repository),
            });
        }
        self.default_repository = Some(repository.to_string());
        Ok(())
    }

    pub fn default_repository(&self) -> Option<&str> {
        self.default_repository.as_deref()
    }

    /// Resolve the repository for a model
    ///
    /// # Errors
    ///
    /// Returns `RepositoryNotRegistered` when the model has no explicit
    /// mapping and no default applies.
    pub fn get_repository_by_model_struct(&self, model: &ModelStruct) -> Result<Arc<dyn Repository>> {
        self.models
            .get(model.collection())
            .map(String::as_str)
            .or(self.default_repository.as_deref())
            .and_then(|id| self.repositories.get(id))
            .cloned()
            .ok_or_else(|| WeftError::RepositoryNotRegistered {
                model: model.collection().to_string(),
            })
    }

    pub fn get_repository(&self, id: &str) -> Option<Arc<dyn Repository>> {
        self.repositories.get(id).cloned()
    }

    /// Repositories in registration order
    pub fn repositories(&self) -> Vec<Arc<dyn Repository>> {
        self.order
            .iter()
            .filter_map(|id| self.repositories.get(id).cloned())
            .collect()
    }

    /// Explicit model assignments as `(collection, repository)`
    pub fn mappings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.models.iter().map(|(m, r)| (m.as_str(), r.as_str()))
    }
}

impl std::fmt::Debug for RepositoryMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryMapper")
            .field("repositories", &self.order)
            .field("models", &self.models)
            .field("default_repository", &self.default_repository)
            .finish()
    }
}
