// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read paths.
//!
//! Cache-preferred reads (`get_list`, `get_object`) try memory, then the
//! cloud. Disk is never consulted.
//!
//! Offline-first reads walk memory → disk → cloud over the eligible tiers:
//!
//! | memory | disk | list | object |
//! |--------|------|------|--------|
//! | ✓ | ✓ | memory → disk (empty ⇒ cloud, failure ⇒ cloud) | memory → disk (failure ⇒ cloud) |
//! | ✗ | ✓ | disk (empty ⇒ cloud, failure ⇒ cloud) | disk (failure ⇒ cloud) |
//! | ✓ | ✗ | memory (failure ⇒ cloud) | memory (failure ⇒ cloud) |
//! | ✗ | ✗ | cloud | cloud |
//!
//! A stored object is returned even when its fields are empty; only an empty
//! *list* sends the read on to the cloud.
//!
//! Offline-first reads are shared: concurrent callers with the same
//! [`ReadKey`] observe one pass through the chain.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::{AccessEngine, ResultStream, Shared};
use crate::error::{AccessError, Result};
use crate::item::{ItemId, TypeKey};
use crate::metrics::{record_fallback, record_operation, LatencyTimer};
use crate::registry::{convert, convert_all, Shape};
use crate::request::FetchRequest;
use crate::selector::TierPlan;
use crate::storage::{Target, TierKind, TierResult, WriteMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ReadShape {
    Object,
    List,
    Search,
}

/// Identity of a shared read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ReadKey {
    shape: ReadShape,
    type_key: TypeKey,
    path: String,
    id: Option<String>,
    persist: bool,
    should_cache: bool,
}

impl ReadKey {
    fn for_request(shape: ReadShape, req: &FetchRequest) -> Self {
        Self {
            shape,
            type_key: req.type_key().clone(),
            path: req.path().as_str().to_string(),
            id: req.item_id().map(ItemId::key),
            persist: req.persist(),
            should_cache: req.should_cache(),
        }
    }
}

/// Resolved plan and address for one read.
struct ReadPlan {
    shared: Shared,
    plan: TierPlan,
    target: Target,
    id: Option<ItemId>,
}

impl ReadPlan {
    fn new(shared: Shared, req: &FetchRequest) -> Result<Self> {
        let plan = shared.plan(req.type_key(), req.should_cache(), req.persist())?;
        let id_field = req.id_field_or(&shared.config.default_id_field).to_string();
        let target = shared.target(req.type_key(), req.path(), &id_field, &plan)?;
        Ok(Self {
            shared,
            plan,
            target,
            id: req.item_id().cloned(),
        })
    }

    fn require_id(&self) -> Result<&ItemId> {
        self.id.as_ref().ok_or_else(|| {
            AccessError::Configuration(format!("object read of {} without an item id", self.target.type_key))
        })
    }

    fn to_domain(&self, value: Value, from: Shape) -> Result<Value> {
        convert(self.target.mapper.as_ref(), value, from, Shape::Domain)
    }

    fn all_to_domain(&self, values: Vec<Value>, from: Shape) -> Result<Vec<Value>> {
        convert_all(self.target.mapper.as_ref(), values, from, Shape::Domain)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Single-tier steps
    // ═══════════════════════════════════════════════════════════════════

    async fn memory_one(&self, id: &ItemId) -> Option<Value> {
        let memory = self.shared.backends.memory.as_ref().filter(|_| self.plan.memory())?;
        let _timer = LatencyTimer::new("memory", "read_one");
        match memory.read_one(&self.target, id).await {
            Ok(value) => {
                record_operation("memory", "read_one", "hit");
                debug!(type_key = %self.target.type_key, id = %id.key(), "Memory hit");
                Some(value)
            }
            Err(e) => {
                self.fell_through(TierKind::Memory, "read_one", &e);
                None
            }
        }
    }

    async fn memory_many(&self) -> Option<Vec<Value>> {
        let memory = self.shared.backends.memory.as_ref().filter(|_| self.plan.memory())?;
        let _timer = LatencyTimer::new("memory", "read_many");
        match memory.read_many(&self.target).await {
            Ok(values) => {
                record_operation("memory", "read_many", "hit");
                debug!(type_key = %self.target.type_key, count = values.len(), "Memory hit");
                Some(values)
            }
            Err(e) => {
                self.fell_through(TierKind::Memory, "read_many", &e);
                None
            }
        }
    }

    async fn disk_one(&self, id: &ItemId) -> Option<Value> {
        let disk = self.shared.backends.disk.as_ref().filter(|_| self.plan.disk())?;
        let _timer = LatencyTimer::new("disk", "read_one");
        match disk.read_one(&self.target, id).await {
            Ok(value) => {
                record_operation("disk", "read_one", "hit");
                debug!(type_key = %self.target.type_key, id = %id.key(), "Disk hit");
                Some(value)
            }
            Err(e) => {
                self.fell_through(TierKind::Disk, "read_one", &e);
                None
            }
        }
    }

    async fn disk_many(&self) -> Option<Vec<Value>> {
        let disk = self.shared.backends.disk.as_ref().filter(|_| self.plan.disk())?;
        let _timer = LatencyTimer::new("disk", "read_many");
        match disk.read_many(&self.target).await {
            Ok(values) if values.is_empty() => {
                record_operation("disk", "read_many", "miss");
                record_fallback("disk", "empty");
                debug!(type_key = %self.target.type_key, "Disk list empty, going to cloud");
                None
            }
            Ok(values) => {
                record_operation("disk", "read_many", "hit");
                debug!(type_key = %self.target.type_key, count = values.len(), "Disk hit");
                Some(values)
            }
            Err(e) => {
                self.fell_through(TierKind::Disk, "read_many", &e);
                None
            }
        }
    }

    async fn cloud_one(&self, id: &ItemId) -> Result<Value> {
        let _timer = LatencyTimer::new("cloud", "read_one");
        let result = self.shared.backends.cloud.read_one(&self.target, id).await;
        record_operation("cloud", "read_one", if result.is_ok() { "success" } else { "error" });
        self.to_domain(result?, Shape::Wire)
    }

    async fn cloud_many(&self) -> Result<Vec<Value>> {
        let _timer = LatencyTimer::new("cloud", "read_many");
        let result = self.shared.backends.cloud.read_many(&self.target).await;
        record_operation("cloud", "read_many", if result.is_ok() { "success" } else { "error" });
        self.all_to_domain(result?, Shape::Wire)
    }

    fn fell_through(&self, tier: TierKind, operation: &str, error: &AccessError) {
        let reason = if error.is_miss() { "miss" } else { "error" };
        record_operation(tier.as_str(), operation, reason);
        record_fallback(tier.as_str(), reason);
        if error.is_miss() {
            debug!(tier = %tier, type_key = %self.target.type_key, "Tier miss, falling through");
        } else {
            warn!(tier = %tier, type_key = %self.target.type_key, error = %error, "Tier failed, falling through");
        }
    }

    /// Copy disk hits into memory. Failures only cost a later memory miss.
    async fn promote(&self, domain: &[Value]) {
        let Some(memory) = self.shared.backends.memory.as_ref().filter(|_| self.plan.memory()) else {
            return;
        };
        if let Err(e) = memory.write_many(&self.target, domain, WriteMode::Update).await {
            warn!(type_key = %self.target.type_key, error = %e, "Failed to promote disk result into memory");
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Chains
    // ═══════════════════════════════════════════════════════════════════

    async fn cache_preferred_one(&self) -> Result<TierResult<Value>> {
        let id = self.require_id()?;
        if let Some(value) = self.memory_one(id).await {
            return Ok(TierResult::new(value, TierKind::Memory));
        }
        from_cloud(self.cloud_one(id).await)
    }

    async fn cache_preferred_many(&self) -> Result<TierResult<Vec<Value>>> {
        if let Some(values) = self.memory_many().await {
            return Ok(TierResult::new(values, TierKind::Memory));
        }
        from_cloud(self.cloud_many().await)
    }

    async fn offline_first_one(&self) -> Result<TierResult<Value>> {
        let id = self.require_id()?;
        if let Some(value) = self.memory_one(id).await {
            return Ok(TierResult::new(value, TierKind::Memory));
        }
        if let Some(stored) = self.disk_one(id).await {
            match self.to_domain(stored, Shape::Storage) {
                Ok(value) => {
                    self.promote(std::slice::from_ref(&value)).await;
                    return Ok(TierResult::new(value, TierKind::Disk));
                }
                Err(e) => self.fell_through(TierKind::Disk, "read_one", &e),
            }
        }
        from_cloud(self.cloud_one(id).await)
    }

    async fn offline_first_many(&self) -> Result<TierResult<Vec<Value>>> {
        if let Some(values) = self.memory_many().await {
            return Ok(TierResult::new(values, TierKind::Memory));
        }
        if let Some(stored) = self.disk_many().await {
            match self.all_to_domain(stored, Shape::Storage) {
                Ok(values) => {
                    self.promote(&values).await;
                    return Ok(TierResult::new(values, TierKind::Disk));
                }
                Err(e) => self.fell_through(TierKind::Disk, "read_many", &e),
            }
        }
        from_cloud(self.cloud_many().await)
    }

    async fn search(&self, field: &str, value: &Value) -> Result<Vec<Value>> {
        let disk = self.shared.backends.disk.as_ref().filter(|_| self.plan.disk()).ok_or_else(|| {
            AccessError::Configuration(format!("disk tier is not enabled for {}", self.target.type_key))
        })?;
        let _timer = LatencyTimer::new("disk", "search");
        let found = disk.search(&self.target, field, value).await;
        record_operation("disk", "search", if found.is_ok() { "success" } else { "error" });
        self.all_to_domain(found?, Shape::Storage)
    }
}

fn from_cloud<T>(result: Result<T>) -> Result<TierResult<T>> {
    result.map(|value| TierResult::new(value, TierKind::Cloud))
}

/// Unwrap a chain result, noting which tier answered.
fn served<T>(result: TierResult<T>) -> T {
    debug!(origin = %result.origin, "Read served");
    result.value
}

impl AccessEngine {
    fn read_plan(&self, req: &FetchRequest) -> Result<ReadPlan> {
        ReadPlan::new(self.shared()?, req)
    }

    /// One item: memory, then cloud.
    #[tracing::instrument(skip(self, req), fields(type_key = %req.type_key()))]
    pub fn get_object(&self, req: FetchRequest) -> ResultStream<Value> {
        match self.read_plan(&req) {
            Ok(plan) => self
                .schedulers
                .spawn_once(true, async move { plan.cache_preferred_one().await.map(served) }),
            Err(e) => ResultStream::ready(Err(e)),
        }
    }

    /// A collection: memory, then cloud.
    #[tracing::instrument(skip(self, req), fields(type_key = %req.type_key()))]
    pub fn get_list(&self, req: FetchRequest) -> ResultStream<Vec<Value>> {
        match self.read_plan(&req) {
            Ok(plan) => self
                .schedulers
                .spawn_once(true, async move { plan.cache_preferred_many().await.map(served) }),
            Err(e) => ResultStream::ready(Err(e)),
        }
    }

    /// One item: memory, disk, then cloud. Shared between concurrent callers.
    #[tracing::instrument(skip(self, req), fields(type_key = %req.type_key()))]
    pub fn get_object_offline_first(&self, req: FetchRequest) -> ResultStream<Value> {
        let plan = match self.read_plan(&req) {
            Ok(plan) => plan,
            Err(e) => return ResultStream::ready(Err(e)),
        };
        let key = ReadKey::for_request(ReadShape::Object, &req);
        let mut subscription = self
            .objects
            .subscribe(key, move || async move { plan.offline_first_one().await.map(served) });
        self.schedulers
            .spawn_once(true, async move { subscription.recv().await })
    }

    /// A collection: memory, disk, then cloud. An empty disk list counts as a
    /// miss. Shared between concurrent callers.
    #[tracing::instrument(skip(self, req), fields(type_key = %req.type_key()))]
    pub fn get_list_offline_first(&self, req: FetchRequest) -> ResultStream<Vec<Value>> {
        let plan = match self.read_plan(&req) {
            Ok(plan) => plan,
            Err(e) => return ResultStream::ready(Err(e)),
        };
        let key = ReadKey::for_request(ReadShape::List, &req);
        let mut subscription = self
            .lists
            .subscribe(key, move || async move { plan.offline_first_many().await.map(served) });
        self.schedulers
            .spawn_once(true, async move { subscription.recv().await })
    }

    /// Stored items of `type_key` whose `field` equals `value`. Disk only.
    #[tracing::instrument(skip(self, value))]
    pub fn search_disk(&self, type_key: &str, field: &str, value: Value) -> ResultStream<Vec<Value>> {
        let req = match FetchRequest::builder(type_key, true).build() {
            Ok(req) => req,
            Err(e) => return ResultStream::ready(Err(e)),
        };
        let plan = match self.read_plan(&req) {
            Ok(plan) => plan,
            Err(e) => return ResultStream::ready(Err(e)),
        };
        let key = ReadKey {
            shape: ReadShape::Search,
            type_key: req.type_key().clone(),
            path: format!("{field}={value}"),
            id: None,
            persist: true,
            should_cache: false,
        };
        let field = field.to_string();
        let mut subscription = self
            .lists
            .subscribe(key, move || async move { plan.search(&field, &value).await });
        self.schedulers
            .spawn_once(true, async move { subscription.recv().await })
    }

    /// Alias for [`get_object`](Self::get_object).
    pub fn fetch(&self, req: FetchRequest) -> ResultStream<Value> {
        self.get_object(req)
    }

    /// Alias for [`get_list`](Self::get_list).
    pub fn fetch_list(&self, req: FetchRequest) -> ResultStream<Vec<Value>> {
        self.get_list(req)
    }

    /// Alias for [`get_object_offline_first`](Self::get_object_offline_first).
    pub fn fetch_offline(&self, req: FetchRequest) -> ResultStream<Value> {
        self.get_object_offline_first(req)
    }

    /// Alias for [`get_list_offline_first`](Self::get_list_offline_first).
    pub fn fetch_list_offline(&self, req: FetchRequest) -> ResultStream<Vec<Value>> {
        self.get_list_offline_first(req)
    }

    /// [`fetch`](Self::fetch), deserialized into `T`.
    pub async fn fetch_as<T: DeserializeOwned>(&self, req: FetchRequest) -> Result<T> {
        let value = self.fetch(req).single().await?;
        Ok(serde_json::from_value(value)?)
    }

    /// [`fetch_offline`](Self::fetch_offline), deserialized into `T`.
    pub async fn fetch_offline_as<T: DeserializeOwned>(&self, req: FetchRequest) -> Result<T> {
        let value = self.fetch_offline(req).single().await?;
        Ok(serde_json::from_value(value)?)
    }
}

