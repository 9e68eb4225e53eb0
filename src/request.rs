// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request descriptors.
//!
//! Every call into the engine is described by an immutable value built with a
//! builder: a [`FetchRequest`] for reads, a [`MutationRequest`] for
//! create/update/patch/delete and a [`TransferRequest`] for file upload and
//! download. Descriptors are `Serialize` so a failed mutation can be written
//! to the redelivery queue as-is.
//!
//! # Example
//!
//! ```
//! use tier_access::{FetchRequest, MutationRequest, Method, Payload};
//! use serde_json::json;
//!
//! let read = FetchRequest::builder("user", true)
//!     .path("users/7")
//!     .id(7)
//!     .should_cache(true)
//!     .build()
//!     .unwrap();
//! assert_eq!(read.id_field_or("id"), "id");
//!
//! let write = MutationRequest::post("user", true)
//!     .path("users")
//!     .payload(json!({"id": 8, "name": "Grace"}))
//!     .queuable()
//!     .build()
//!     .unwrap();
//! assert_eq!(write.method(), Method::Post);
//! assert!(matches!(write.payload(), Payload::Single(_)));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AccessError, Result};
use crate::item::{IdType, ItemId, TypeKey};

/// Remote location of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum RemotePath {
    /// Joined onto the configured base URL
    Relative(String),
    /// Used verbatim
    Absolute(String),
}

impl Default for RemotePath {
    fn default() -> Self {
        Self::Relative(String::new())
    }
}

impl RemotePath {
    /// Full URL for this path against `base_url`.
    #[must_use]
    pub fn resolve(&self, base_url: &str) -> String {
        match self {
            Self::Absolute(url) => url.clone(),
            Self::Relative(path) if base_url.is_empty() => path.clone(),
            Self::Relative(path) => format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Relative(path) | Self::Absolute(path) => path,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Reads
// ═══════════════════════════════════════════════════════════════════════════

/// A read of one item (when an id is set) or a list of items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    type_key: TypeKey,
    path: RemotePath,
    item_id: Option<ItemId>,
    id_field: Option<String>,
    persist: bool,
    should_cache: bool,
}

impl FetchRequest {
    pub fn builder(type_key: impl Into<TypeKey>, persist: bool) -> FetchRequestBuilder {
        FetchRequestBuilder {
            type_key: type_key.into(),
            path: RemotePath::default(),
            item_id: None,
            id_field: None,
            persist,
            should_cache: false,
        }
    }

    #[must_use]
    pub fn type_key(&self) -> &TypeKey {
        &self.type_key
    }

    #[must_use]
    pub fn path(&self) -> &RemotePath {
        &self.path
    }

    #[must_use]
    pub fn item_id(&self) -> Option<&ItemId> {
        self.item_id.as_ref()
    }

    /// The id field, falling back to the engine-wide default.
    #[must_use]
    pub fn id_field_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.id_field.as_deref().unwrap_or(default)
    }

    #[must_use]
    pub fn persist(&self) -> bool {
        self.persist
    }

    #[must_use]
    pub fn should_cache(&self) -> bool {
        self.should_cache
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequestBuilder {
    type_key: TypeKey,
    path: RemotePath,
    item_id: Option<ItemId>,
    id_field: Option<String>,
    persist: bool,
    should_cache: bool,
}

impl FetchRequestBuilder {
    /// Path relative to the configured base URL.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = RemotePath::Relative(path.into());
        self
    }

    #[must_use]
    pub fn full_url(mut self, url: impl Into<String>) -> Self {
        self.path = RemotePath::Absolute(url.into());
        self
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<ItemId>) -> Self {
        self.item_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }

    #[must_use]
    pub fn should_cache(mut self, should_cache: bool) -> Self {
        self.should_cache = should_cache;
        self
    }

    pub fn build(self) -> Result<FetchRequest> {
        if self.type_key.is_empty() {
            return Err(AccessError::Configuration("fetch request without a target type".into()));
        }
        Ok(FetchRequest {
            type_key: self.type_key,
            path: self.path,
            item_id: self.item_id,
            id_field: self.id_field,
            persist: self.persist,
            should_cache: self.should_cache,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Mutations
// ═══════════════════════════════════════════════════════════════════════════

/// HTTP-style mutation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Patch => write!(f, "PATCH"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Body of a mutation: exactly one object or a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "data", rename_all = "lowercase")]
pub enum Payload {
    Single(Value),
    Batch(Vec<Value>),
}

impl Payload {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(values) => values.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wire body for the payload.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Single(value) => value.clone(),
            Self::Batch(values) => Value::Array(values.clone()),
        }
    }
}

/// A create, update, patch or delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
    method: Method,
    type_key: TypeKey,
    path: RemotePath,
    id_field: Option<String>,
    id_type: IdType,
    payload: Payload,
    persist: bool,
    cache: bool,
    queuable: bool,
}

impl MutationRequest {
    pub fn post(type_key: impl Into<TypeKey>, persist: bool) -> MutationRequestBuilder {
        MutationRequestBuilder::new(Method::Post, type_key.into(), persist)
    }

    pub fn put(type_key: impl Into<TypeKey>, persist: bool) -> MutationRequestBuilder {
        MutationRequestBuilder::new(Method::Put, type_key.into(), persist)
    }

    pub fn patch(type_key: impl Into<TypeKey>, persist: bool) -> MutationRequestBuilder {
        MutationRequestBuilder::new(Method::Patch, type_key.into(), persist)
    }

    pub fn delete(type_key: impl Into<TypeKey>, persist: bool) -> MutationRequestBuilder {
        MutationRequestBuilder::new(Method::Delete, type_key.into(), persist)
    }

    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    #[must_use]
    pub fn type_key(&self) -> &TypeKey {
        &self.type_key
    }

    #[must_use]
    pub fn path(&self) -> &RemotePath {
        &self.path
    }

    #[must_use]
    pub fn id_field_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.id_field.as_deref().unwrap_or(default)
    }

    #[must_use]
    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[must_use]
    pub fn persist(&self) -> bool {
        self.persist
    }

    #[must_use]
    pub fn cache(&self) -> bool {
        self.cache
    }

    #[must_use]
    pub fn queuable(&self) -> bool {
        self.queuable
    }

    /// Ids carried by a delete payload, coerced with the declared id type.
    pub fn ids(&self) -> Result<Vec<ItemId>> {
        match &self.payload {
            Payload::Single(value) => Ok(vec![self.id_type.parse(value)?]),
            Payload::Batch(values) => values.iter().map(|v| self.id_type.parse(v)).collect(),
        }
    }

    /// The same request reshaped to carry `ids` as a batch payload.
    pub(crate) fn with_batch_ids(&self, ids: &[ItemId]) -> Self {
        Self {
            payload: Payload::Batch(ids.iter().map(ItemId::to_value).collect()),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct MutationRequestBuilder {
    method: Method,
    type_key: TypeKey,
    path: RemotePath,
    id_field: Option<String>,
    id_type: IdType,
    payload: Option<Payload>,
    persist: bool,
    cache: bool,
    queuable: bool,
}

impl MutationRequestBuilder {
    fn new(method: Method, type_key: TypeKey, persist: bool) -> Self {
        Self {
            method,
            type_key,
            path: RemotePath::default(),
            id_field: None,
            id_type: IdType::default(),
            payload: None,
            persist,
            cache: false,
            queuable: false,
        }
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = RemotePath::Relative(path.into());
        self
    }

    #[must_use]
    pub fn full_url(mut self, url: impl Into<String>) -> Self {
        self.path = RemotePath::Absolute(url.into());
        self
    }

    #[must_use]
    pub fn id_field(mut self, field: impl Into<String>, id_type: IdType) -> Self {
        self.id_field = Some(field.into());
        self.id_type = id_type;
        self
    }

    /// Single-object body.
    #[must_use]
    pub fn payload(mut self, value: Value) -> Self {
        self.payload = Some(Payload::Single(value));
        self
    }

    /// Batch body.
    #[must_use]
    pub fn batch(mut self, values: Vec<Value>) -> Self {
        self.payload = Some(Payload::Batch(values));
        self
    }

    /// Batch of ids (delete requests).
    #[must_use]
    pub fn ids<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ItemId>,
    {
        let values = ids.into_iter().map(|id| id.into().to_value()).collect();
        self.payload = Some(Payload::Batch(values));
        self
    }

    #[must_use]
    pub fn cache(mut self) -> Self {
        self.cache = true;
        self
    }

    #[must_use]
    pub fn queuable(mut self) -> Self {
        self.queuable = true;
        self
    }

    pub fn build(self) -> Result<MutationRequest> {
        if self.type_key.is_empty() {
            return Err(AccessError::Configuration("mutation without a target type".into()));
        }
        let payload = self.payload.ok_or_else(|| {
            AccessError::Configuration(format!("{} {} has no payload", self.method, self.type_key))
        })?;
        if self.method == Method::Patch && !matches!(payload, Payload::Single(_)) {
            return Err(AccessError::Configuration("PATCH takes a single object".into()));
        }
        Ok(MutationRequest {
            method: self.method,
            type_key: self.type_key,
            path: self.path,
            id_field: self.id_field,
            id_type: self.id_type,
            payload,
            persist: self.persist,
            cache: self.cache,
            queuable: self.queuable,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Transfers
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

/// A file upload or download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    type_key: TypeKey,
    path: RemotePath,
    file: PathBuf,
    key: String,
    params: BTreeMap<String, String>,
    on_wifi_only: bool,
    while_charging: bool,
    queuable: bool,
}

impl TransferRequest {
    pub fn builder(type_key: impl Into<TypeKey>, file: impl Into<PathBuf>) -> TransferRequestBuilder {
        TransferRequestBuilder {
            type_key: type_key.into(),
            path: RemotePath::default(),
            file: file.into(),
            key: "file".to_string(),
            params: BTreeMap::new(),
            on_wifi_only: false,
            while_charging: false,
            queuable: false,
        }
    }

    #[must_use]
    pub fn type_key(&self) -> &TypeKey {
        &self.type_key
    }

    #[must_use]
    pub fn path(&self) -> &RemotePath {
        &self.path
    }

    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Multipart field name for uploads.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    #[must_use]
    pub fn on_wifi_only(&self) -> bool {
        self.on_wifi_only
    }

    #[must_use]
    pub fn while_charging(&self) -> bool {
        self.while_charging
    }

    #[must_use]
    pub fn queuable(&self) -> bool {
        self.queuable
    }
}

#[derive(Debug, Clone)]
pub struct TransferRequestBuilder {
    type_key: TypeKey,
    path: RemotePath,
    file: PathBuf,
    key: String,
    params: BTreeMap<String, String>,
    on_wifi_only: bool,
    while_charging: bool,
    queuable: bool,
}

impl TransferRequestBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = RemotePath::Relative(path.into());
        self
    }

    #[must_use]
    pub fn full_url(mut self, url: impl Into<String>) -> Self {
        self.path = RemotePath::Absolute(url.into());
        self
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn on_wifi_only(mut self) -> Self {
        self.on_wifi_only = true;
        self
    }

    #[must_use]
    pub fn while_charging(mut self) -> Self {
        self.while_charging = true;
        self
    }

    #[must_use]
    pub fn queuable(mut self) -> Self {
        self.queuable = true;
        self
    }

    pub fn build(self) -> Result<TransferRequest> {
        if self.file.as_os_str().is_empty() {
            return Err(AccessError::Configuration("transfer without a local file".into()));
        }
        if self.path.is_empty() {
            return Err(AccessError::Configuration("transfer without a remote path".into()));
        }
        Ok(TransferRequest {
            type_key: self.type_key,
            path: self.path,
            file: self.file,
            key: self.key,
            params: self.params,
            on_wifi_only: self.on_wifi_only,
            while_charging: self.while_charging,
            queuable: self.queuable,
        })
    }
}
