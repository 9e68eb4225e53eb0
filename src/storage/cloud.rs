// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote tier.
//!
//! Values in and out are wire-shaped. After a successful call the result is
//! mirrored into the local tiers the [`Target`] asks for: disk when `persist`
//! (storage shape), memory when `cache` (domain shape). A failing mirror is
//! logged and never fails the remote call that produced the value.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::traits::{Target, Tier, TierKind, WriteMode};
use crate::error::{AccessError, Result};
use crate::item::{ItemId, TypeKey};
use crate::registry::{convert, convert_all, Shape};
use crate::request::Method;
use crate::transport::Transport;

pub struct CloudTier {
    transport: Arc<dyn Transport>,
    disk: Option<Arc<dyn Tier>>,
    memory: Option<Arc<dyn Tier>>,
}

impl CloudTier {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            disk: None,
            memory: None,
        }
    }

    #[must_use]
    pub fn with_disk_mirror(mut self, disk: Arc<dyn Tier>) -> Self {
        self.disk = Some(disk);
        self
    }

    #[must_use]
    pub fn with_memory_mirror(mut self, memory: Arc<dyn Tier>) -> Self {
        self.memory = Some(memory);
        self
    }

    fn mirrors<'a>(&'a self, target: &Target) -> impl Iterator<Item = (&'a Arc<dyn Tier>, Shape)> {
        let disk = self.disk.as_ref().filter(|_| target.persist).map(|t| (t, Shape::Storage));
        let memory = self.memory.as_ref().filter(|_| target.cache).map(|t| (t, Shape::Domain));
        disk.into_iter().chain(memory)
    }

    async fn mirror_many(&self, target: &Target, values: &[Value], mode: WriteMode) {
        for (tier, shape) in self.mirrors(target) {
            let outcome = match convert_all(target.mapper.as_ref(), values.to_vec(), Shape::Wire, shape) {
                Ok(mapped) => tier.write_many(target, &mapped, mode).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => debug!(
                    tier = %tier.kind(),
                    type_key = %target.type_key,
                    count = values.len(),
                    "Mirrored remote result"
                ),
                Err(e) => warn!(
                    tier = %tier.kind(),
                    type_key = %target.type_key,
                    error = %e,
                    "Failed to mirror remote result"
                ),
            }
        }
    }

    async fn mirror_one(&self, target: &Target, value: &Value, mode: WriteMode) {
        self.mirror_many(target, std::slice::from_ref(value), mode).await;
    }
}

fn method_for(mode: WriteMode) -> Method {
    match mode {
        WriteMode::Create => Method::Post,
        WriteMode::Update => Method::Put,
        WriteMode::Patch => Method::Patch,
    }
}

/// An empty or non-array response to a batch call echoes the request.
fn batch_response(response: Value, sent: &[Value]) -> Result<Vec<Value>> {
    match response {
        Value::Array(values) => Ok(values),
        Value::Null => Ok(sent.to_vec()),
        other => Err(AccessError::Serialization(format!(
            "expected a JSON array from batch call, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl Tier for CloudTier {
    fn kind(&self) -> TierKind {
        TierKind::Cloud
    }

    async fn read_one(&self, target: &Target, _id: &ItemId) -> Result<Value> {
        let value = self.transport.get(&target.url).await?;
        if !value.is_null() {
            self.mirror_one(target, &value, WriteMode::Update).await;
        }
        Ok(value)
    }

    async fn read_many(&self, target: &Target) -> Result<Vec<Value>> {
        let values = match self.transport.get(&target.url).await? {
            Value::Array(values) => values,
            Value::Null => Vec::new(),
            other => {
                return Err(AccessError::Serialization(format!(
                    "expected a JSON array from {}, got {}",
                    target.url,
                    type_name(&other)
                )))
            }
        };
        if !values.is_empty() {
            self.mirror_many(target, &values, WriteMode::Update).await;
        }
        Ok(values)
    }

    async fn write_one(&self, target: &Target, value: &Value, mode: WriteMode) -> Result<Value> {
        let response = self.transport.send(method_for(mode), &target.url, value).await?;
        let stored = if response.is_null() { value.clone() } else { response };
        self.mirror_one(target, &stored, mode).await;
        Ok(stored)
    }

    async fn write_many(&self, target: &Target, values: &[Value], mode: WriteMode) -> Result<Vec<Value>> {
        let body = Value::Array(values.to_vec());
        let response = self.transport.send(method_for(mode), &target.url, &body).await?;
        let stored = batch_response(response, values)?;
        self.mirror_many(target, &stored, mode).await;
        Ok(stored)
    }

    /// Deletes remotely, then from every local tier so no stale copy survives.
    async fn delete_many(&self, target: &Target, ids: &[ItemId]) -> Result<()> {
        let body = Value::Array(ids.iter().map(ItemId::to_value).collect());
        self.transport.send(Method::Delete, &target.url, &body).await?;

        for tier in self.disk.iter().chain(self.memory.iter()) {
            if let Err(e) = tier.delete_many(target, ids).await {
                warn!(tier = %tier.kind(), type_key = %target.type_key, error = %e, "Failed to mirror deletion");
            }
        }
        Ok(())
    }

    async fn clear(&self, _type_key: &TypeKey) -> Result<bool> {
        Ok(false)
    }
}

/// Map one value with the target's mapper.
pub(crate) fn to_wire(target: &Target, value: Value) -> Result<Value> {
    convert(target.mapper.as_ref(), value, Shape::Domain, Shape::Wire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryTier;
    use crate::transport::ProgressFn;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    #[derive(Default)]
    struct ScriptedTransport {
        response: Mutex<Option<Result<Value>>>,
        sent: Mutex<Vec<(Method, String, Value)>>,
    }

    impl ScriptedTransport {
        fn replying(value: Result<Value>) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(value)),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn next(&self) -> Result<Value> {
            self.response.lock().clone().unwrap_or(Ok(Value::Null))
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, _url: &str) -> Result<Value> {
            self.next()
        }

        async fn send(&self, method: Method, url: &str, body: &Value) -> Result<Value> {
            self.sent.lock().push((method, url.to_string(), body.clone()));
            self.next()
        }

        async fn upload(
            &self,
            _url: &str,
            _file: &Path,
            _key: &str,
            _params: &BTreeMap<String, String>,
            _progress: &ProgressFn,
        ) -> Result<Value> {
            self.next()
        }

        async fn download(&self, _url: &str, dest: &Path, _progress: &ProgressFn) -> Result<PathBuf> {
            Ok(dest.to_path_buf())
        }
    }

    fn target(persist: bool, cache: bool) -> Target {
        Target {
            url: "https://api.test/users".into(),
            persist,
            cache,
            ..Target::local("user", "id")
        }
    }

    #[tokio::test]
    async fn test_read_mirrors_into_memory_when_cached() {
        let memory = Arc::new(MemoryTier::default());
        let cloud = CloudTier::new(ScriptedTransport::replying(Ok(json!([{"id": 1}, {"id": 2}]))))
            .with_memory_mirror(memory.clone());

        cloud.read_many(&target(false, false)).await.unwrap();
        assert!(memory.is_empty());

        cloud.read_many(&target(false, true)).await.unwrap();
        assert_eq!(memory.len(), 2);
    }

    #[tokio::test]
    async fn test_read_many_rejects_non_array() {
        let cloud = CloudTier::new(ScriptedTransport::replying(Ok(json!({"id": 1}))));
        let err = cloud.read_many(&target(false, false)).await.unwrap_err();
        assert!(matches!(err, AccessError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_mirror_failure_does_not_fail_call() {
        let memory = Arc::new(MemoryTier::default());
        // No "id" field, so the memory mirror rejects it
        let cloud = CloudTier::new(ScriptedTransport::replying(Ok(json!({"name": "anon"}))))
            .with_memory_mirror(memory.clone());

        let value = cloud.read_one(&target(false, true), &ItemId::Int(1)).await.unwrap();
        assert_eq!(value, json!({"name": "anon"}));
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn test_write_echoes_request_on_empty_response() {
        let transport = ScriptedTransport::replying(Ok(Value::Null));
        let cloud = CloudTier::new(transport.clone());

        let stored = cloud
            .write_one(&target(false, false), &json!({"id": 3}), WriteMode::Update)
            .await
            .unwrap();
        assert_eq!(stored, json!({"id": 3}));

        let sent = transport.sent.lock();
        assert_eq!(sent[0].0, Method::Put);
        assert_eq!(sent[0].1, "https://api.test/users");
    }

    #[tokio::test]
    async fn test_delete_sends_ids_and_clears_mirrors() {
        let memory = Arc::new(MemoryTier::default());
        memory
            .write_one(&target(false, false), &json!({"id": 7}), WriteMode::Create)
            .await
            .unwrap();
        let transport = ScriptedTransport::replying(Ok(Value::Null));
        let cloud = CloudTier::new(transport.clone()).with_memory_mirror(memory.clone());

        cloud.delete_many(&target(false, false), &[ItemId::Int(7)]).await.unwrap();

        assert!(memory.is_empty());
        assert_eq!(transport.sent.lock()[0], (Method::Delete, "https://api.test/users".into(), json!([7])));
    }

    #[tokio::test]
    async fn test_transport_error_skips_mirrors() {
        let memory = Arc::new(MemoryTier::default());
        let cloud = CloudTier::new(ScriptedTransport::replying(Err(AccessError::transport("offline"))))
            .with_memory_mirror(memory.clone());

        let err = cloud
            .write_one(&target(false, true), &json!({"id": 1}), WriteMode::Create)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn test_clear_is_unsupported() {
        let cloud = CloudTier::new(ScriptedTransport::replying(Ok(Value::Null)));
        assert!(!cloud.clear(&"user".into()).await.unwrap());
    }
}
