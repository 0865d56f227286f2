use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

pub type Fields = Map<String, Value>;

/// A stored document as handed out in snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

/// Field value of a document about to be written.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Replaced by the store's commit time, in milliseconds since the epoch.
    ServerTimestamp,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewDocument {
    fields: BTreeMap<String, FieldValue>,
}

impl NewDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields
            .insert(key.into(), FieldValue::Value(value.into()));
        self
    }

    pub fn set_server_timestamp(mut self, key: impl Into<String>) -> Self {
        self.fields.insert(key.into(), FieldValue::ServerTimestamp);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Produces the stored fields with every server timestamp set to `committed_at_ms`.
    pub fn resolve(self, committed_at_ms: i64) -> Fields {
        self.fields
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    FieldValue::Value(value) => value,
                    FieldValue::ServerTimestamp => Value::from(committed_at_ms),
                };
                (key, value)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        }
    }
}

/// Ordering of a subscription. Ties on `field` fall back to insertion order in
/// the same direction, so the newest insert comes first when descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Descending,
        }
    }

    /// JSON path for `json_extract`, or `None` when the field name is not a plain identifier.
    pub fn json_path(&self) -> Option<String> {
        let valid = !self.field.is_empty()
            && self
                .field
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        valid.then(|| format!("$.{}", self.field))
    }

    /// Compares two documents given their insertion sequence numbers.
    pub fn compare(&self, a: (&Document, i64), b: (&Document, i64)) -> Ordering {
        let ordering = compare_field(a.0.fields.get(&self.field), b.0.fields.get(&self.field))
            .then(a.1.cmp(&b.1));
        match self.direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        }
    }
}

// Missing and null sort lowest, like SQL NULL.
fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

pub fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
