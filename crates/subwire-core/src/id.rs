//! Client-chosen operation identifiers.
//!
//! An id is whatever scalar the client put in the `id` field of a `start`
//! message: a string or a JSON number. It is echoed back verbatim on every
//! `data`, `error` and `complete` message for that operation.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifier correlating a `start` with the messages it produces.
///
/// Numbers compare by their canonical JSON text, so `1` and `"1"` are
/// different ids, and so are `1` and `1.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationId {
    Number(Number),
    String(String),
}

impl OperationId {
    /// Extract an id from a raw JSON value. Only strings and numbers qualify.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

impl PartialEq for OperationId {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.to_string() == b.to_string(),
            (Self::String(a), Self::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for OperationId {}

impl Hash for OperationId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Number(n) => {
                0u8.hash(state);
                n.to_string().hash(state);
            }
            Self::String(s) => {
                1u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for OperationId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<u64> for OperationId {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<i64> for OperationId {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}
