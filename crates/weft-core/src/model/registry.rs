use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::{Result, WeftError};
use crate::model::{Model, ModelStruct, RelationKind};

/// Registry of every model descriptor known to a database handle
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<ModelStruct>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor
    ///
    /// # Errors
    ///
    /// Returns `ModelAlreadyRegistered` if the collection is already known.
    pub fn register(&mut self, model: ModelStruct) -> Result<Arc<ModelStruct>> {
        let collection = model.collection().to_string();
        if self.models.contains_key(&collection) {
            return Err(WeftError::ModelAlreadyRegistered { model: collection });
        }
        let model = Arc::new(model);
        self.models.insert(collection, model.clone());
        Ok(model)
    }

    /// Register a typed model through its own descriptor
    ///
    /// # Errors
    ///
    /// Returns `ModelAlreadyRegistered` on duplicates and `InvalidModel` if
    /// the descriptor's collection differs from `M::collection_name()`.
    pub fn register_model<M: Model>(&mut self) -> Result<Arc<ModelStruct>> {
        let model = M::model_struct();
        if model.collection() != M::collection_name() {
            return Err(WeftError::InvalidModel {
                model: M::collection_name().to_string(),
                reason: format!(
                    "descriptor declares collection '{}'",
                    model.collection()
                ),
            });
        }
        self.register(model)
    }

    /// Look up a descriptor by collection name
    ///
    /// # Errors
    ///
    /// Returns `ModelNotRegistered` if the collection is unknown.
    pub fn get(&self, collection: &str) -> Result<Arc<ModelStruct>> {
        self.models
            .get(collection)
            .cloned()
            .ok_or_else(|| WeftError::ModelNotRegistered {
                model: collection.to_string(),
            })
    }

    /// Look up the descriptor registered for a typed model
    ///
    /// # Errors
    ///
    /// Returns `ModelNotRegistered` if `M` was never registered.
    pub fn model_struct<M: Model>(&self) -> Result<Arc<ModelStruct>> {
        self.get(M::collection_name())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModelStruct>> {
        self.models.values()
    }

    /// Check that every relation resolves
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` if a relation targets an unregistered
    /// collection, or a has-one/has-many relation names a foreign key the
    /// related model doesn't declare.
    pub fn verify(&self) -> Result<()> {
        for model in self.models.values() {
            for relation in model.relations() {
                let related = self.models.get(&relation.related).ok_or_else(|| {
                    WeftError::InvalidModel {
                        model: model.collection().to_string(),
                        reason: format!(
                            "relation '{}' targets unregistered model '{}'",
                            relation.name, relation.related
                        ),
                    }
                })?;

                let key_owner = match relation.kind {
                    RelationKind::BelongsTo => model,
                    RelationKind::HasOne | RelationKind::HasMany => related,
                };
                if key_owner.field(&relation.foreign_key).is_none() {
                    return Err(WeftError::InvalidModel {
                        model: model.collection().to_string(),
                        reason: format!(
                            "relation '{}' expects foreign key '{}' on '{}'",
                            relation.name,
                            relation.foreign_key,
                            key_owner.collection()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}
