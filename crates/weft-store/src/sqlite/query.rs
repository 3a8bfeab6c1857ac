//! Scope to SQL translation
//!
//! Records are JSON bodies; every field reference becomes
//! `json_extract(body, ?)` with the JSON path bound as a parameter.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use weft_core::query::{FilterField, FilterOperator, Pagination, Scope, SortOrder};

/// A WHERE/ORDER/LIMIT fragment plus its positional parameters
#[derive(Debug, Default)]
pub(crate) struct Fragment {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Fragment {
    fn field(&mut self, field: &str) -> &'static str {
        self.params.push(SqlValue::Text(format!("$.{}", field)));
        "json_extract(body, ?)"
    }

    fn bind(&mut self, value: &Value) -> &'static str {
        self.params.push(to_sql(value));
        "?"
    }
}

/// JSON scalar as the value `json_extract` would return for it
pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// `collection = ? AND <filters>`
pub(crate) fn where_clause(scope: &Scope) -> Fragment {
    let mut out = Fragment {
        sql: "collection = ?".to_string(),
        params: vec![SqlValue::Text(scope.model().collection().to_string())],
    };
    for filter in scope.filters() {
        out.sql.push_str(" AND ");
        let predicate = predicate(&mut out, filter);
        out.sql.push_str(&predicate);
    }
    out
}

fn predicate(out: &mut Fragment, filter: &FilterField) -> String {
    let operand = filter.values.first().unwrap_or(&Value::Null);
    let field = filter.field.as_str();

    match filter.operator {
        FilterOperator::IsNull => format!("{} IS NULL", out.field(field)),
        FilterOperator::NotNull => format!("{} IS NOT NULL", out.field(field)),
        FilterOperator::Equal => format!("{} IS {}", out.field(field), out.bind(operand)),
        FilterOperator::NotEqual => format!("{} IS NOT {}", out.field(field), out.bind(operand)),
        FilterOperator::GreaterThan => comparison(out, field, ">", operand),
        FilterOperator::GreaterEqual => comparison(out, field, ">=", operand),
        FilterOperator::LessThan => comparison(out, field, "<", operand),
        FilterOperator::LessEqual => comparison(out, field, "<=", operand),
        FilterOperator::In => any_of(out, field, &filter.values),
        FilterOperator::NotIn => format!("NOT {}", any_of(out, field, &filter.values)),
        FilterOperator::Contains | FilterOperator::StartsWith | FilterOperator::EndsWith => {
            if !operand.is_string() {
                return "0".to_string();
            }
            // parameters are pushed in placeholder order
            let typed = format!("typeof({}) = 'text'", out.field(field));
            let test = match filter.operator {
                FilterOperator::Contains => {
                    format!("instr({}, {}) > 0", out.field(field), out.bind(operand))
                }
                FilterOperator::StartsWith => {
                    format!("instr({}, {}) = 1", out.field(field), out.bind(operand))
                }
                _ => format!(
                    "(length({}) = 0 OR substr({}, -length({})) = {})",
                    out.bind(operand),
                    out.field(field),
                    out.bind(operand),
                    out.bind(operand)
                ),
            };
            format!("({} AND {})", typed, test)
        }
    }
}

/// Ordering comparison restricted to values of the operand's type
fn comparison(out: &mut Fragment, field: &str, op: &str, operand: &Value) -> String {
    let types = match operand {
        Value::Number(_) => "('integer', 'real')",
        Value::String(_) => "('text')",
        Value::Bool(_) => "('integer')",
        _ => return "0".to_string(),
    };
    let typed = format!("typeof({}) IN {}", out.field(field), types);
    let test = format!("{} {} {}", out.field(field), op, out.bind(operand));
    format!("({} AND {})", typed, test)
}

/// `(x IS ? OR x IS ? ...)`, null-safe unlike `IN`
fn any_of(out: &mut Fragment, field: &str, values: &[Value]) -> String {
    if values.is_empty() {
        return "(0)".to_string();
    }
    let terms: Vec<String> = values
        .iter()
        .map(|v| format!("{} IS {}", out.field(field), out.bind(v)))
        .collect();
    format!("({})", terms.join(" OR "))
}

/// `ORDER BY` over the sort fields, insertion order last
pub(crate) fn order_by(scope: &Scope) -> Fragment {
    let mut out = Fragment::default();
    let mut terms = Vec::new();
    for sort in scope.sorts() {
        let direction = match sort.order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        terms.push(format!("{} {}", out.field(&sort.field), direction));
    }
    terms.push("seq ASC".to_string());
    out.sql = format!(" ORDER BY {}", terms.join(", "));
    out
}

/// `LIMIT ? OFFSET ?`, empty without pagination
pub(crate) fn window(pagination: Option<&Pagination>) -> Fragment {
    let Some(pagination) = pagination else {
        return Fragment::default();
    };
    let (limit, offset) = pagination.window();
    let clamp = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);
    Fragment {
        sql: " LIMIT ? OFFSET ?".to_string(),
        params: vec![
            SqlValue::Integer(limit.map_or(-1, clamp)),
            SqlValue::Integer(clamp(offset)),
        ],
    }
}
