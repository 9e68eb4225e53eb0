// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Type registry: which tiers a type may live in and how its values are
//! converted between tier shapes.
//!
//! Populated once before the engine starts and shared read-only afterwards.
//!
//! ```
//! use tier_access::{Result, TypeRegistry, TypeBinding, Shape};
//! use serde_json::{json, Value};
//!
//! let mut registry = TypeRegistry::new();
//! registry.register("user", TypeBinding::new().memory(true).disk(true)).unwrap();
//! registry
//!     .register(
//!         "repo",
//!         TypeBinding::new().disk(true).mapper(|raw: Value, from: Shape, _to: Shape| -> Result<Value> {
//!             // Remote repos nest their payload under "data"
//!             Ok(match from {
//!                 Shape::Wire => raw.get("data").cloned().unwrap_or(raw),
//!                 _ => raw,
//!             })
//!         }),
//!     )
//!     .unwrap();
//!
//! assert!(registry.binding(&"user".into()).is_some());
//! assert!(registry.register("user", TypeBinding::new()).is_err());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{AccessError, Result};
use crate::item::TypeKey;

/// Representation a value is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// As exchanged with the remote service
    Wire,
    /// As stored in the disk tier
    Storage,
    /// As handed to callers and kept in memory
    Domain,
}

/// Pure conversion between shapes.
pub trait Mapper: Send + Sync {
    fn map(&self, raw: Value, from: Shape, to: Shape) -> Result<Value>;
}

impl<F> Mapper for F
where
    F: Fn(Value, Shape, Shape) -> Result<Value> + Send + Sync,
{
    fn map(&self, raw: Value, from: Shape, to: Shape) -> Result<Value> {
        self(raw, from, to)
    }
}

/// Passes values through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapper;

impl Mapper for IdentityMapper {
    fn map(&self, raw: Value, _from: Shape, _to: Shape) -> Result<Value> {
        Ok(raw)
    }
}

/// Apply `mapper` unless the shapes already match.
pub(crate) fn convert(mapper: &dyn Mapper, raw: Value, from: Shape, to: Shape) -> Result<Value> {
    if from == to {
        Ok(raw)
    } else {
        mapper.map(raw, from, to)
    }
}

pub(crate) fn convert_all(mapper: &dyn Mapper, raw: Vec<Value>, from: Shape, to: Shape) -> Result<Vec<Value>> {
    raw.into_iter().map(|v| convert(mapper, v, from, to)).collect()
}

/// Tier eligibility and mapper for one type.
#[derive(Clone)]
pub struct TypeBinding {
    pub memory: bool,
    pub disk: bool,
    pub mapper: Arc<dyn Mapper>,
}

impl TypeBinding {
    /// Cloud-only binding with the identity mapper.
    #[must_use]
    pub fn new() -> Self {
        Self {
            memory: false,
            disk: false,
            mapper: Arc::new(IdentityMapper),
        }
    }

    #[must_use]
    pub fn memory(mut self, enabled: bool) -> Self {
        self.memory = enabled;
        self
    }

    #[must_use]
    pub fn disk(mut self, enabled: bool) -> Self {
        self.disk = enabled;
        self
    }

    #[must_use]
    pub fn mapper(mut self, mapper: impl Mapper + 'static) -> Self {
        self.mapper = Arc::new(mapper);
        self
    }
}

impl Default for TypeBinding {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeBinding")
            .field("memory", &self.memory)
            .field("disk", &self.disk)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    bindings: HashMap<TypeKey, TypeBinding>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. Each key may be registered once.
    pub fn register(&mut self, key: impl Into<TypeKey>, binding: TypeBinding) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(AccessError::Configuration("empty type key".into()));
        }
        if self.bindings.contains_key(&key) {
            return Err(AccessError::Configuration(format!("type '{key}' registered twice")));
        }
        self.bindings.insert(key, binding);
        Ok(())
    }

    #[must_use]
    pub fn binding(&self, key: &TypeKey) -> Option<&TypeBinding> {
        self.bindings.get(key)
    }

    pub fn require(&self, key: &TypeKey) -> Result<&TypeBinding> {
        self.binding(key)
            .ok_or_else(|| AccessError::Configuration(format!("type '{key}' is not registered")))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
