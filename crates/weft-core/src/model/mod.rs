//! Explicit model schema
//!
//! Models are described once at start-up through `ModelStruct` descriptors
//! kept in a `ModelRegistry`. Typed Rust models opt in through the `Model`
//! trait and cross the repository boundary as JSON `Record`s.

pub mod model_struct;
pub mod registry;

pub use model_struct::{
    Field, FieldKind, FieldType, ModelStruct, ModelStructBuilder, Relation, RelationKind,
};
pub use registry::ModelRegistry;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// One stored model instance: field name to JSON value
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Typed application model
///
/// Field access goes through serde, so no runtime type inspection is needed.
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection the model is registered under
    fn collection_name() -> &'static str;

    /// Schema descriptor registered for this model
    fn model_struct() -> ModelStruct;
}
