use std::collections::HashSet;

use serde::Deserialize;

use crate::errors::{Result, WeftError};

/// Storage type of a model field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Float,
    String,
    Boolean,
    Timestamp,
    Uuid,
    Json,
}

/// Role a field plays in its model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Primary,
    Attribute,
    ForeignKey,
}

/// One declared field of a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub field_type: FieldType,
}

/// Cardinality and key placement of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Foreign key lives on this model and points at the related primary key
    BelongsTo,
    /// Foreign key lives on the related model; at most one related record
    HasOne,
    /// Foreign key lives on the related model; any number of related records
    HasMany,
}

/// A relationship to another registered model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub related: String,
    pub kind: RelationKind,
    pub foreign_key: String,
}

/// Schema descriptor of one model
///
/// Built once at start-up and shared immutably; scopes and repositories
/// consult it instead of inspecting values at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelStruct {
    collection: String,
    primary: usize,
    fields: Vec<Field>,
    relations: Vec<Relation>,
}

impl ModelStruct {
    pub fn builder(collection: impl Into<String>) -> ModelStructBuilder {
        ModelStructBuilder {
            collection: collection.into(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Collection (table) name, unique across the registry
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn primary(&self) -> &Field {
        &self.fields[self.primary]
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.kind == FieldKind::Attribute)
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Look up a field, failing with `InvalidField`
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` if the model doesn't declare `name`.
    pub fn require_field(&self, name: &str) -> Result<&Field> {
        self.field(name).ok_or_else(|| WeftError::InvalidField {
            model: self.collection.clone(),
            field: name.to_string(),
        })
    }
}

impl std::fmt::Display for ModelStruct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.collection)
    }
}

/// Incremental constructor for `ModelStruct`
#[derive(Debug, Clone)]
pub struct ModelStructBuilder {
    collection: String,
    fields: Vec<Field>,
    relations: Vec<Relation>,
}

impl ModelStructBuilder {
    fn push_field(mut self, name: impl Into<String>, kind: FieldKind, field_type: FieldType) -> Self {
        self.fields.push(Field {
            name: name.into(),
            kind,
            field_type,
        });
        self
    }

    fn push_relation(
        mut self,
        name: impl Into<String>,
        related: impl Into<String>,
        kind: RelationKind,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relations.push(Relation {
            name: name.into(),
            related: related.into(),
            kind,
            foreign_key: foreign_key.into(),
        });
        self
    }

    pub fn primary(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.push_field(name, FieldKind::Primary, field_type)
    }

    pub fn attribute(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.push_field(name, FieldKind::Attribute, field_type)
    }

    pub fn foreign_key(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.push_field(name, FieldKind::ForeignKey, field_type)
    }

    /// `foreign_key` is a field of this model holding the related primary key
    pub fn belongs_to(
        self,
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.push_relation(name, related, RelationKind::BelongsTo, foreign_key)
    }

    /// `foreign_key` is a field of the related model holding this primary key
    pub fn has_one(
        self,
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.push_relation(name, related, RelationKind::HasOne, foreign_key)
    }

    /// `foreign_key` is a field of the related model holding this primary key
    pub fn has_many(
        self,
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.push_relation(name, related, RelationKind::HasMany, foreign_key)
    }

    /// Validate and freeze the descriptor
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` when the collection name is empty, the model
    /// doesn't declare exactly one primary field, a field or relation name
    /// repeats, or a belongs-to relation names an undeclared foreign key.
    pub fn build(self) -> Result<ModelStruct> {
        let invalid = |reason: String| WeftError::InvalidModel {
            model: self.collection.clone(),
            reason,
        };

        if self.collection.is_empty() {
            return Err(invalid("collection name is empty".to_string()));
        }

        let primaries: Vec<usize> = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.kind == FieldKind::Primary)
            .map(|(i, _)| i)
            .collect();
        let primary = match primaries.as_slice() {
            [index] => *index,
            other => {
                return Err(invalid(format!(
                    "expected exactly one primary field, found {}",
                    other.len()
                )))
            }
        };

        let mut names = HashSet::new();
        for name in self
            .fields
            .iter()
            .map(|f| &f.name)
            .chain(self.relations.iter().map(|r| &r.name))
        {
            if !is_identifier(name) {
                return Err(invalid(format!("'{}' is not a valid field name", name)));
            }
            if !names.insert(name.as_str()) {
                return Err(invalid(format!("duplicate field '{}'", name)));
            }
        }

        for relation in &self.relations {
            if relation.kind == RelationKind::BelongsTo
                && !self.fields.iter().any(|f| f.name == relation.foreign_key)
            {
                return Err(invalid(format!(
                    "relation '{}' uses undeclared foreign key '{}'",
                    relation.name, relation.foreign_key
                )));
            }
        }

        Ok(ModelStruct {
            collection: self.collection,
            primary,
            fields: self.fields,
            relations: self.relations,
        })
    }
}

/// Field names end up in backend queries, so only plain identifiers are allowed
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn post() -> ModelStructBuilder {
        ModelStruct::builder("posts")
            .primary("id", FieldType::Integer)
            .attribute("title", FieldType::String)
            .foreign_key("blog_id", FieldType::Integer)
    }

    #[test]
    fn test_build_valid_model() {
        let model = post().belongs_to("blog", "blogs", "blog_id").build().unwrap();

        assert_eq!(model.collection(), "posts");
        assert_eq!(model.primary().name, "id");
        assert_eq!(model.attributes().count(), 1);
        assert_eq!(model.relation("blog").unwrap().kind, RelationKind::BelongsTo);
    }

    #[test]
    fn test_missing_primary_rejected() {
        let err = ModelStruct::builder("tags")
            .attribute("name", FieldType::String)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidModel);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = post().attribute("title", FieldType::String).build().unwrap_err();
        assert!(err.to_string().contains("duplicate field 'title'"));
    }

    #[test]
    fn test_belongs_to_requires_declared_foreign_key() {
        let err = post().belongs_to("author", "authors", "author_id").build().unwrap_err();
        assert!(err.to_string().contains("author_id"));
    }

    #[test]
    fn test_non_identifier_field_rejected() {
        let err = post().attribute("title'); --", FieldType::String).build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidModel);
    }

    #[test]
    fn test_require_field_reports_model() {
        let model = post().build().unwrap();
        let err = model.require_field("body").unwrap_err();
        assert_eq!(err.to_string(), "model 'posts' has no field 'body'");
    }
}
