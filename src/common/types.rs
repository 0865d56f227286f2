use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::models::Document;

/// Longest message the compose input accepts, in characters.
pub const MAX_MESSAGE_CHARS: usize = 280;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub lat: f64,
    pub lng: f64,
}

/// Anonymous identity of this installation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
}

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uid)
    }
}

/// A broadcast in the shared feed. Immutable once the store has accepted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ping {
    pub id: String,
    pub uid: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub coords: Option<Coords>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Ping {
    /// Merges the store-assigned id into the stored fields.
    pub fn from_document(document: Document) -> Result<Self, serde_json::Error> {
        let Document { id, mut fields } = document;
        fields.insert("id".to_string(), Value::String(id));
        serde_json::from_value(Value::Object(fields))
    }
}
