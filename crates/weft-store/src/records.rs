//! Record helpers shared by the backends

use serde_json::Value;
use uuid::Uuid;
use weft_core::errors::RepositoryError;
use weft_core::model::{FieldType, ModelStruct, Record};

use crate::errors::Result;

/// Storage key of a primary value: its JSON text, so `1` and `"1"` differ
pub fn key_of(value: &Value) -> String {
    value.to_string()
}

/// Ensure `record` carries a primary key, generating one if it's missing
///
/// Integer keys come from `next_integer`; string and UUID keys are UUIDv7.
pub fn ensure_primary(
    model: &ModelStruct,
    record: &mut Record,
    next_integer: impl FnOnce() -> Result<i64>,
) -> Result<Value> {
    let primary = model.primary();
    if let Some(value) = record.get(&primary.name).filter(|v| !v.is_null()) {
        return Ok(value.clone());
    }

    let generated = match primary.field_type {
        FieldType::Integer => Value::from(next_integer()?),
        FieldType::String | FieldType::Uuid => Value::String(Uuid::now_v7().to_string()),
        other => {
            return Err(RepositoryError::invalid_input(format!(
                "'{}' needs an explicit {:?} primary key",
                model.collection(),
                other
            )))
        }
    };
    record.insert(primary.name.clone(), generated.clone());
    Ok(generated)
}

/// Apply `patch` to `row`, leaving the primary key untouched
pub fn merge_patch(model: &ModelStruct, row: &mut Record, patch: &Record) {
    let primary = &model.primary().name;
    for (field, value) in patch.iter().filter(|(field, _)| *field != primary) {
        row.insert(field.clone(), value.clone());
    }
}

/// First payload record of an update scope
pub fn update_patch<'a>(collection: &str, values: &'a [Record]) -> Result<&'a Record> {
    values.first().ok_or_else(|| {
        RepositoryError::invalid_input(format!("update on '{}' carries no values", collection))
    })
}
