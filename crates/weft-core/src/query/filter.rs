use std::cmp::Ordering;

use serde_json::Value;

use crate::model::Record;

/// Comparison applied by a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
    NotNull,
}

impl FilterOperator {
    /// Parse the short operator names used in query strings and scripts
    pub fn parse(s: &str) -> Option<Self> {
        let op = match s {
            "eq" => FilterOperator::Equal,
            "ne" => FilterOperator::NotEqual,
            "gt" => FilterOperator::GreaterThan,
            "ge" => FilterOperator::GreaterEqual,
            "lt" => FilterOperator::LessThan,
            "le" => FilterOperator::LessEqual,
            "in" => FilterOperator::In,
            "notin" => FilterOperator::NotIn,
            "contains" => FilterOperator::Contains,
            "startswith" => FilterOperator::StartsWith,
            "endswith" => FilterOperator::EndsWith,
            "isnull" => FilterOperator::IsNull,
            "notnull" => FilterOperator::NotNull,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equal => "eq",
            FilterOperator::NotEqual => "ne",
            FilterOperator::GreaterThan => "gt",
            FilterOperator::GreaterEqual => "ge",
            FilterOperator::LessThan => "lt",
            FilterOperator::LessEqual => "le",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "notin",
            FilterOperator::Contains => "contains",
            FilterOperator::StartsWith => "startswith",
            FilterOperator::EndsWith => "endswith",
            FilterOperator::IsNull => "isnull",
            FilterOperator::NotNull => "notnull",
        }
    }

    /// Check the number of operand values this operator accepts
    pub(crate) fn accepts(&self, values: usize) -> bool {
        match self {
            FilterOperator::IsNull | FilterOperator::NotNull => values == 0,
            FilterOperator::In | FilterOperator::NotIn => values >= 1,
            _ => values == 1,
        }
    }
}

impl std::fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One predicate over a single field
#[derive(Debug, Clone, PartialEq)]
pub struct FilterField {
    pub field: String,
    pub operator: FilterOperator,
    pub values: Vec<Value>,
}

impl FilterField {
    pub fn new(field: impl Into<String>, operator: FilterOperator, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            values,
        }
    }

    /// Evaluate the predicate against a record
    ///
    /// A missing field behaves like `null`.
    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);
        let operand = self.values.first().unwrap_or(&Value::Null);

        match self.operator {
            FilterOperator::IsNull => actual.is_null(),
            FilterOperator::NotNull => !actual.is_null(),
            FilterOperator::Equal => values_equal(actual, operand),
            FilterOperator::NotEqual => !values_equal(actual, operand),
            FilterOperator::GreaterThan => {
                compare_values(actual, operand) == Some(Ordering::Greater)
            }
            FilterOperator::GreaterEqual => matches!(
                compare_values(actual, operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::LessThan => compare_values(actual, operand) == Some(Ordering::Less),
            FilterOperator::LessEqual => matches!(
                compare_values(actual, operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::In => self.values.iter().any(|v| values_equal(actual, v)),
            FilterOperator::NotIn => !self.values.iter().any(|v| values_equal(actual, v)),
            FilterOperator::Contains => str_pair(actual, operand).is_some_and(|(a, b)| a.contains(b)),
            FilterOperator::StartsWith => {
                str_pair(actual, operand).is_some_and(|(a, b)| a.starts_with(b))
            }
            FilterOperator::EndsWith => str_pair(actual, operand).is_some_and(|(a, b)| a.ends_with(b)),
        }
    }
}

fn str_pair<'a>(a: &'a Value, b: &'a Value) -> Option<(&'a str, &'a str)> {
    Some((a.as_str()?, b.as_str()?))
}

/// Equality with numbers compared by value, so `1` equals `1.0`
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Ordering between two scalar JSON values of the same type
///
/// Values of different types, arrays and objects are incomparable.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}
