use std::sync::Arc;

use serde_json::Value;
use weft_core_types::ScopeId;

use crate::errors::{Result, WeftError};
use crate::model::{Model, ModelRegistry, ModelStruct, Record};
use crate::query::filter::{FilterField, FilterOperator};
use crate::query::include::IncludedRelation;
use crate::query::pagination::Pagination;
use crate::query::sort::{compare_records, SortField};

/// One query or mutation against one model
///
/// Built by the caller, then handed to a `Transaction` which resolves the
/// responsible repository from `model()` and passes the scope through.
/// Repositories read the query shape and fill `values` for reads.
#[derive(Debug, Clone)]
pub struct Scope {
    id: ScopeId,
    model: Arc<ModelStruct>,
    filters: Vec<FilterField>,
    fieldset: Vec<String>,
    sorts: Vec<SortField>,
    pagination: Option<Pagination>,
    included: Vec<IncludedRelation>,
    values: Vec<Record>,
}

impl Scope {
    pub fn new(model: Arc<ModelStruct>) -> Self {
        Self {
            id: ScopeId::new(),
            model,
            filters: Vec::new(),
            fieldset: Vec::new(),
            sorts: Vec::new(),
            pagination: None,
            included: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Scope for a registered typed model
    ///
    /// # Errors
    ///
    /// Returns `ModelNotRegistered` if `M` isn't in the registry.
    pub fn for_model<M: Model>(registry: &ModelRegistry) -> Result<Self> {
        Ok(Self::new(registry.model_struct::<M>()?))
    }

    /// Scope for a collection by name
    ///
    /// # Errors
    ///
    /// Returns `ModelNotRegistered` if the collection isn't in the registry.
    pub fn for_collection(registry: &ModelRegistry, collection: &str) -> Result<Self> {
        Ok(Self::new(registry.get(collection)?))
    }

    pub fn id(&self) -> &ScopeId {
        &self.id
    }

    pub fn model(&self) -> &Arc<ModelStruct> {
        &self.model
    }

    pub fn filters(&self) -> &[FilterField] {
        &self.filters
    }

    /// Selected fields; empty means every field
    pub fn fieldset(&self) -> &[String] {
        &self.fieldset
    }

    pub fn sorts(&self) -> &[SortField] {
        &self.sorts
    }

    pub fn pagination(&self) -> Option<&Pagination> {
        self.pagination.as_ref()
    }

    pub fn included(&self) -> &[IncludedRelation] {
        &self.included
    }

    pub fn included_mut(&mut self) -> &mut [IncludedRelation] {
        &mut self.included
    }

    pub fn values(&self) -> &[Record] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Vec<Record> {
        &mut self.values
    }

    /// Replace the payload; repositories call this with read results
    pub fn set_values(&mut self, values: Vec<Record>) {
        self.values = values;
    }

    pub fn take_values(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.values)
    }

    // ---------- builders ----------

    /// Add a filter
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` for an undeclared field and `InvalidInput`
    /// when the operand count doesn't fit the operator.
    pub fn add_filter(&mut self, filter: FilterField) -> Result<()> {
        self.model.require_field(&filter.field)?;
        if !filter.operator.accepts(filter.values.len()) {
            return Err(WeftError::invalid_input(format!(
                "operator '{}' on '{}' can't take {} value(s)",
                filter.operator,
                filter.field,
                filter.values.len()
            )));
        }
        self.filters.push(filter);
        Ok(())
    }

    /// Chainable form of `add_filter`
    ///
    /// # Errors
    ///
    /// See `add_filter`.
    pub fn filter(
        mut self,
        field: &str,
        operator: FilterOperator,
        values: impl IntoIterator<Item = Value>,
    ) -> Result<Self> {
        self.add_filter(FilterField::new(field, operator, values.into_iter().collect()))?;
        Ok(self)
    }

    /// Shorthand for an equality filter on the primary field
    ///
    /// # Errors
    ///
    /// Never fails for a valid descriptor; kept fallible for chaining.
    pub fn with_primary(self, id: Value) -> Result<Self> {
        let primary = self.model.primary().name.clone();
        self.filter(&primary, FilterOperator::Equal, [id])
    }

    /// Restrict the returned fields; the primary field is always kept
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` for an undeclared field.
    pub fn select<I, S>(mut self, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let primary = self.model.primary().name.clone();
        if !self.fieldset.contains(&primary) {
            self.fieldset.push(primary);
        }
        for field in fields {
            let field = field.as_ref();
            self.model.require_field(field)?;
            if !self.fieldset.iter().any(|f| f == field) {
                self.fieldset.push(field.to_string());
            }
        }
        Ok(self)
    }

    /// Append a sort in `field` / `-field` form
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` for an undeclared field.
    pub fn sort(mut self, key: &str) -> Result<Self> {
        let sort = SortField::parse(key);
        self.model.require_field(&sort.field)?;
        self.sorts.push(sort);
        Ok(self)
    }

    /// Set the result window
    ///
    /// # Errors
    ///
    /// Returns `InvalidPagination` if `pagination.check()` fails.
    pub fn page(mut self, pagination: Pagination) -> Result<Self> {
        pagination.check()?;
        self.pagination = Some(pagination);
        Ok(self)
    }

    /// Include a relation with an unconstrained nested scope
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` if the model has no such relation and
    /// `ModelNotRegistered` if the related model is unknown.
    pub fn include(self, relation: &str, registry: &ModelRegistry) -> Result<Self> {
        let related = self
            .model
            .relation(relation)
            .map(|r| r.related.clone())
            .ok_or_else(|| WeftError::InvalidField {
                model: self.model.collection().to_string(),
                field: relation.to_string(),
            })?;
        let nested = Scope::new(registry.get(&related)?);
        self.include_scope(relation, nested)
    }

    /// Include a relation with a caller-built nested scope
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` if the model has no such relation and
    /// `InvalidInput` if `scope` targets a different model.
    pub fn include_scope(mut self, relation: &str, scope: Scope) -> Result<Self> {
        let relation = self
            .model
            .relation(relation)
            .cloned()
            .ok_or_else(|| WeftError::InvalidField {
                model: self.model.collection().to_string(),
                field: relation.to_string(),
            })?;
        if scope.model.collection() != relation.related {
            return Err(WeftError::invalid_input(format!(
                "relation '{}' targets '{}', not '{}'",
                relation.name,
                relation.related,
                scope.model.collection()
            )));
        }
        self.included.push(IncludedRelation { relation, scope });
        Ok(self)
    }

    /// Add a record to the payload
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` if the record carries an undeclared field.
    pub fn add_value(&mut self, record: Record) -> Result<()> {
        for key in record.keys() {
            self.model.require_field(key)?;
        }
        self.values.push(record);
        Ok(())
    }

    /// Chainable form of `add_value`
    ///
    /// # Errors
    ///
    /// See `add_value`.
    pub fn value(mut self, record: Record) -> Result<Self> {
        self.add_value(record)?;
        Ok(self)
    }

    /// Add a typed model instance to the payload
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `M` belongs to another collection,
    /// `Serialization` if it doesn't serialize to an object, and
    /// `InvalidField` for undeclared fields.
    pub fn add_model<M: Model>(&mut self, model: &M) -> Result<()> {
        if M::collection_name() != self.model.collection() {
            return Err(WeftError::invalid_input(format!(
                "'{}' instance added to scope over '{}'",
                M::collection_name(),
                self.model.collection()
            )));
        }
        match serde_json::to_value(model)? {
            Value::Object(record) => self.add_value(record),
            other => Err(WeftError::Serialization {
                reason: format!("model serialized to non-object value {}", other),
            }),
        }
    }

    /// Decode the payload into typed models
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if a record doesn't decode as `M`.
    pub fn models<M: Model>(&self) -> Result<Vec<M>> {
        self.values
            .iter()
            .map(|record| Ok(serde_json::from_value(Value::Object(record.clone()))?))
            .collect()
    }

    // ---------- evaluation helpers for repositories ----------

    /// True if the record satisfies every filter
    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }

    /// Sort and cut `records` to the requested window
    pub fn apply_window(&self, mut records: Vec<Record>) -> Vec<Record> {
        if !self.sorts.is_empty() {
            records.sort_by(|a, b| compare_records(&self.sorts, a, b));
        }
        let Some(pagination) = self.pagination else {
            return records;
        };
        let (limit, offset) = pagination.window();
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let limit = limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        records.into_iter().skip(offset).take(limit).collect()
    }

    /// Copy of the record restricted to the fieldset
    pub fn project(&self, record: &Record) -> Record {
        if self.fieldset.is_empty() {
            return record.clone();
        }
        record
            .iter()
            .filter(|(key, _)| self.fieldset.iter().any(|f| f == *key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Values of `field` across the payload, skipping nulls and duplicates
    pub fn field_values(&self, field: &str) -> Vec<Value> {
        let mut out: Vec<Value> = Vec::new();
        for value in self.values.iter().filter_map(|r| r.get(field)) {
            if !value.is_null() && !out.contains(value) {
                out.push(value.clone());
            }
        }
        out
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SCOPE[{}][{}]", self.id, self.model.collection())
    }
}
