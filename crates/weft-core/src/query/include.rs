use crate::model::Relation;
use crate::query::Scope;

/// Relationship to load alongside the root scope
///
/// The nested scope targets the related model and is dispatched on its own,
/// possibly to another repository.
#[derive(Debug, Clone)]
pub struct IncludedRelation {
    pub relation: Relation,
    pub scope: Scope,
}

impl IncludedRelation {
    pub fn name(&self) -> &str {
        &self.relation.name
    }
}
