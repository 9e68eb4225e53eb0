// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Identity types shared by requests, tiers and the redelivery queue.
//!
//! Values themselves travel as [`serde_json::Value`]; a [`TypeKey`] says which
//! registered type they belong to and an [`ItemId`] addresses one of them.
//!
//! ```
//! use tier_access::{ItemId, TypeKey, extract_id};
//! use serde_json::json;
//!
//! let users = TypeKey::new("user");
//! let id = extract_id(&json!({"id": 7, "name": "Ada"}), "id").unwrap();
//! assert_eq!(id, ItemId::Int(7));
//! assert_eq!(id.key(), "7");
//! assert_eq!(users.as_str(), "user");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AccessError, Result};

/// Identifier of a registered type (e.g. `"user"`, `"repo"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeKey(String);

impl TypeKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for TypeKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Item identifier, either numeric or textual.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    Int(i64),
    Text(String),
}

impl ItemId {
    /// Canonical storage key (`7`, `"abc"` → `abc`).
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Text(s) => Value::from(s.as_str()),
        }
    }

    /// Read an id out of a JSON scalar. Objects, arrays and floats are rejected.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ItemId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self::Text(id)
    }
}

/// Declared type of a mutation's id field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdType {
    #[default]
    Int,
    Text,
}

impl IdType {
    /// Coerce a JSON scalar into an id of this type.
    ///
    /// Numeric strings are accepted for `Int`; numbers are stringified for `Text`.
    pub fn parse(self, value: &Value) -> Result<ItemId> {
        match (self, value) {
            (Self::Int, Value::Number(n)) => n
                .as_i64()
                .map(ItemId::Int)
                .ok_or_else(|| AccessError::Configuration(format!("id {n} is not an integer"))),
            (Self::Int, Value::String(s)) => s
                .parse::<i64>()
                .map(ItemId::Int)
                .map_err(|_| AccessError::Configuration(format!("id '{s}' is not an integer"))),
            (Self::Text, Value::String(s)) => Ok(ItemId::Text(s.clone())),
            (Self::Text, Value::Number(n)) => Ok(ItemId::Text(n.to_string())),
            (_, other) => Err(AccessError::Configuration(format!(
                "unsupported id value {other}"
            ))),
        }
    }
}

/// Extract the id stored under `id_field` in an object value.
#[must_use]
pub fn extract_id(value: &Value, id_field: &str) -> Option<ItemId> {
    value.get(id_field).and_then(ItemId::from_value)
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
