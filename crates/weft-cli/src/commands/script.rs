//! Transaction script parsing
//!
//! One command per line, `#` starts a comment:
//!
//! ```text
//! insert posts {"title": "hello"}
//! savepoint before-delete
//! delete posts title "hello"
//! rollback-to before-delete
//! commit
//! ```

use serde_json::Value;
use weft_core::Record;

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Insert { collection: String, record: Record },
    Update { collection: String, record: Record },
    Delete { collection: String, field: String, value: Value },
    Get { collection: String, id: Value },
    List { collection: String },
    Count { collection: String },
    Savepoint(String),
    RollbackTo(String),
    Commit,
    Rollback,
}

/// A parsed step with its 1-based source line
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub number: usize,
    pub step: Step,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub reason: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

impl std::error::Error for ParseError {}

/// Split off the first whitespace-delimited word
fn word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn required<'a>(s: &'a str, what: &str) -> Result<(&'a str, &'a str), String> {
    match word(s) {
        ("", _) => Err(format!("missing {}", what)),
        pair => Ok(pair),
    }
}

fn json(s: &str) -> Result<Value, String> {
    if s.is_empty() {
        return Err("missing JSON value".to_string());
    }
    serde_json::from_str(s).map_err(|e| format!("invalid JSON: {}", e))
}

fn object(s: &str) -> Result<Record, String> {
    match json(s)? {
        Value::Object(record) => Ok(record),
        other => Err(format!("expected a JSON object, got {}", other)),
    }
}

fn no_more(rest: &str, command: &str) -> Result<(), String> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(format!("unexpected arguments after '{}': {}", command, rest))
    }
}

fn parse_step(line: &str) -> Result<Step, String> {
    let (command, rest) = word(line);
    let step = match command {
        "insert" | "update" => {
            let (collection, rest) = required(rest, "collection")?;
            let record = object(rest)?;
            let collection = collection.to_string();
            if command == "insert" {
                Step::Insert { collection, record }
            } else {
                Step::Update { collection, record }
            }
        }
        "delete" => {
            let (collection, rest) = required(rest, "collection")?;
            let (field, rest) = required(rest, "field")?;
            Step::Delete {
                collection: collection.to_string(),
                field: field.to_string(),
                value: json(rest)?,
            }
        }
        "get" => {
            let (collection, rest) = required(rest, "collection")?;
            Step::Get {
                collection: collection.to_string(),
                id: json(rest)?,
            }
        }
        "list" | "count" => {
            let (collection, rest) = required(rest, "collection")?;
            no_more(rest, command)?;
            let collection = collection.to_string();
            if command == "list" {
                Step::List { collection }
            } else {
                Step::Count { collection }
            }
        }
        "savepoint" | "rollback-to" => {
            let (name, rest) = required(rest, "savepoint name")?;
            no_more(rest, command)?;
            if command == "savepoint" {
                Step::Savepoint(name.to_string())
            } else {
                Step::RollbackTo(name.to_string())
            }
        }
        "commit" => {
            no_more(rest, command)?;
            Step::Commit
        }
        "rollback" => {
            no_more(rest, command)?;
            Step::Rollback
        }
        other => return Err(format!("unknown command '{}'", other)),
    };
    Ok(step)
}

/// Parse a whole script, skipping blank lines and comments
pub fn parse(source: &str) -> Result<Vec<Line>, ParseError> {
    source
        .lines()
        .enumerate()
        .map(|(index, text)| (index + 1, text.trim()))
        .filter(|(_, text)| !text.is_empty() && !text.starts_with('#'))
        .map(|(number, text)| {
            parse_step(text)
                .map(|step| Line { number, step })
                .map_err(|reason| ParseError {
                    line: number,
                    reason,
                })
        })
        .collect()
}
