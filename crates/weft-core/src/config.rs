//! Database configuration
//!
//! Loaded from TOML and passed explicitly to `Db::from_config`:
//!
//! ```toml
//! default_repository = "main"
//!
//! [transaction]
//! isolation = "serializable"
//!
//! [repositories.main]
//! driver = "sqlite"
//! path = "weft.db"
//!
//! [[models]]
//! collection = "posts"
//! repository = "main"
//! primary = { name = "id", type = "integer" }
//! attributes = [{ name = "title", type = "string" }]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{Result, WeftError};
use crate::logging_facility::Profile;
use crate::model::{FieldType, ModelRegistry, ModelStruct, RelationKind};
use crate::repository::TxOptions;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbConfig {
    #[serde(default)]
    pub default_repository: Option<String>,
    #[serde(default)]
    pub disallow_default_repository: bool,
    #[serde(default)]
    pub transaction: TxOptions,
    #[serde(default)]
    pub logging: Option<Profile>,
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryConfig>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

/// Backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Driver {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    pub driver: Driver,
    /// Database file; in-memory when absent
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationConfig {
    pub name: String,
    pub related: String,
    pub kind: RelationKind,
    pub foreign_key: String,
}

/// Explicit schema descriptor for one model
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub collection: String,
    /// Repository for this model; the default repository when absent
    #[serde(default)]
    pub repository: Option<String>,
    pub primary: FieldConfig,
    #[serde(default)]
    pub attributes: Vec<FieldConfig>,
    #[serde(default)]
    pub foreign_keys: Vec<FieldConfig>,
    #[serde(default)]
    pub relations: Vec<RelationConfig>,
}

impl ModelConfig {
    /// Build the validated descriptor
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` if the descriptor fails validation.
    pub fn to_model_struct(&self) -> Result<ModelStruct> {
        let mut builder = ModelStruct::builder(self.collection.as_str())
            .primary(self.primary.name.as_str(), self.primary.field_type);
        for field in &self.attributes {
            builder = builder.attribute(field.name.as_str(), field.field_type);
        }
        for field in &self.foreign_keys {
            builder = builder.foreign_key(field.name.as_str(), field.field_type);
        }
        for relation in &self.relations {
            let (name, related, fk) = (
                relation.name.as_str(),
                relation.related.as_str(),
                relation.foreign_key.as_str(),
            );
            builder = match relation.kind {
                RelationKind::BelongsTo => builder.belongs_to(name, related, fk),
                RelationKind::HasOne => builder.has_one(name, related, fk),
                RelationKind::HasMany => builder.has_many(name, related, fk),
            };
        }
        builder.build()
    }
}

impl DbConfig {
    /// # Errors
    ///
    /// Returns `Config` on malformed TOML or inconsistent references.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: DbConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `Config` if the file can't be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| WeftError::Config {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&source)
    }

    /// Check that every repository reference names a configured repository
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the first dangling reference.
    pub fn validate(&self) -> Result<()> {
        let dangling = |name: &str, owner: &str| WeftError::Config {
            reason: format!("{} refers to unknown repository '{}'", owner, name),
        };

        if let Some(name) = &self.default_repository {
            if self.disallow_default_repository {
                return Err(WeftError::Config {
                    reason: "default_repository set while disallow_default_repository is true"
                        .to_string(),
                });
            }
            if !self.repositories.contains_key(name) {
                return Err(dangling(name, "default_repository"));
            }
        }
        for model in &self.models {
            if let Some(name) = &model.repository {
                if !self.repositories.contains_key(name) {
                    return Err(dangling(name, &format!("model '{}'", model.collection)));
                }
            }
        }
        Ok(())
    }

    /// Registry holding every configured model
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` or `ModelAlreadyRegistered` for bad descriptors.
    pub fn model_registry(&self) -> Result<ModelRegistry> {
        let mut registry = ModelRegistry::new();
        for model in &self.models {
            registry.register(model.to_model_struct()?)?;
        }
        registry.verify()?;
        Ok(registry)
    }

    /// `repository -> [collection]` for models with an explicit repository
    pub fn repository_models(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut out: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for model in &self.models {
            if let Some(repository) = &model.repository {
                out.entry(repository.as_str())
                    .or_default()
                    .push(model.collection.as_str());
            }
        }
        out
    }
}
