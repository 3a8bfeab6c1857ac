use std::cmp::Ordering;

use serde_json::Value;

use crate::model::Record;
use crate::query::filter::compare_values;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Ordering on a single field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Descending,
        }
    }

    /// Parse `title` (ascending) or `-title` (descending)
    pub fn parse(key: &str) -> Self {
        match key.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(key),
        }
    }
}

impl std::fmt::Display for SortField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.order {
            SortOrder::Ascending => f.write_str(&self.field),
            SortOrder::Descending => write!(f, "-{}", self.field),
        }
    }
}

/// Compare two records by a list of sort fields
///
/// Nulls sort first in ascending order. Incomparable values are treated as
/// equal so the sort stays stable.
pub(crate) fn compare_records(sorts: &[SortField], a: &Record, b: &Record) -> Ordering {
    for sort in sorts {
        let left = a.get(&sort.field).unwrap_or(&Value::Null);
        let right = b.get(&sort.field).unwrap_or(&Value::Null);

        let ordering = match (left.is_null(), right.is_null()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => compare_values(left, right).unwrap_or(Ordering::Equal),
        };
        let ordering = match sort.order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_leading_minus() {
        assert_eq!(SortField::parse("-title"), SortField::desc("title"));
        assert_eq!(SortField::parse("title"), SortField::asc("title"));
        assert_eq!(SortField::parse("-title").to_string(), "-title");
    }

    #[test]
    fn test_compare_records_uses_later_fields_as_tie_breakers() {
        let a: Record = json!({"blog_id": 1, "title": "b"}).as_object().cloned().unwrap();
        let b: Record = json!({"blog_id": 1, "title": "a"}).as_object().cloned().unwrap();
        let sorts = [SortField::asc("blog_id"), SortField::desc("title")];

        assert_eq!(compare_records(&sorts, &a, &b), Ordering::Less);
    }

    #[test]
    fn test_nulls_sort_first_ascending() {
        let a: Record = json!({"title": null}).as_object().cloned().unwrap();
        let b: Record = json!({"title": "x"}).as_object().cloned().unwrap();

        assert_eq!(compare_records(&[SortField::asc("title")], &a, &b), Ordering::Less);
        assert_eq!(compare_records(&[SortField::desc("title")], &a, &b), Ordering::Greater);
    }
}
