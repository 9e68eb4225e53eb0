// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The contract every tier implements.
//!
//! A tier never decides fallback: it answers for itself and reports misses as
//! [`AccessError::TierMiss`](crate::AccessError::TierMiss). The engine owns the
//! chain order.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AccessError, Result};
use crate::item::{ItemId, TypeKey};
use crate::registry::{IdentityMapper, Mapper};

/// Which tier produced (or was asked for) a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Memory,
    Disk,
    Cloud,
}

impl TierKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::Cloud => "cloud",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a write treats an existing record with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// POST
    Create,
    /// PUT: replace
    Update,
    /// PATCH: merge top-level fields into the stored object
    Patch,
}

/// Everything a tier needs to address a request.
///
/// Built by the engine from a request descriptor; `url` is already resolved
/// against the configured base URL.
#[derive(Clone)]
pub struct Target {
    pub type_key: TypeKey,
    pub url: String,
    pub id_field: String,
    /// Mirror cloud results into the disk tier
    pub persist: bool,
    /// Mirror cloud results into the memory tier
    pub cache: bool,
    pub mapper: Arc<dyn Mapper>,
}

impl Target {
    /// A target with no remote URL and no mirroring, for local-only access.
    pub fn local(type_key: impl Into<TypeKey>, id_field: impl Into<String>) -> Self {
        Self {
            type_key: type_key.into(),
            url: String::new(),
            id_field: id_field.into(),
            persist: false,
            cache: false,
            mapper: Arc::new(IdentityMapper),
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("type_key", &self.type_key)
            .field("url", &self.url)
            .field("id_field", &self.id_field)
            .field("persist", &self.persist)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// A value tagged with the tier that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TierResult<T> {
    pub value: T,
    pub origin: TierKind,
}

impl<T> TierResult<T> {
    pub fn new(value: T, origin: TierKind) -> Self {
        Self { value, origin }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TierResult<U> {
        TierResult {
            value: f(self.value),
            origin: self.origin,
        }
    }
}

#[async_trait]
pub trait Tier: Send + Sync {
    fn kind(&self) -> TierKind;

    /// One item by id. `TierMiss` when absent.
    async fn read_one(&self, target: &Target, id: &ItemId) -> Result<Value>;

    /// All items of the target's type (or the remote collection).
    async fn read_many(&self, target: &Target) -> Result<Vec<Value>>;

    async fn write_one(&self, target: &Target, value: &Value, mode: WriteMode) -> Result<Value>;

    /// Default implementation falls back to sequential writes.
    async fn write_many(&self, target: &Target, values: &[Value], mode: WriteMode) -> Result<Vec<Value>> {
        let mut written = Vec::with_capacity(values.len());
        for value in values {
            written.push(self.write_one(target, value, mode).await?);
        }
        Ok(written)
    }

    async fn delete_many(&self, target: &Target, ids: &[ItemId]) -> Result<()>;

    /// Drop every item of a type. Returns whether the tier supports clearing.
    async fn clear(&self, type_key: &TypeKey) -> Result<bool>;

    /// Items whose top-level `field` equals `value`. Only queryable tiers
    /// override this.
    async fn search(&self, target: &Target, field: &str, _value: &Value) -> Result<Vec<Value>> {
        Err(AccessError::Configuration(format!(
            "{} tier cannot search {} by '{field}'",
            self.kind(),
            target.type_key
        )))
    }
}

/// Shallow merge of `patch` into `base` (top-level object fields).
pub(crate) fn merge_patch(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            let mut merged = base.clone();
            for (k, v) in patch {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (_, patch) => patch.clone(),
    }
}
