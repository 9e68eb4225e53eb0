// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Access engine.
//!
//! The [`AccessEngine`] routes every request through the tiers the
//! [selector](crate::selector) allows, in fixed order:
//!
//! - **memory**: per-type cache, domain-shaped values
//! - **disk**: SQLite, storage-shaped values
//! - **cloud**: remote service over a [`Transport`], wire-shaped values
//!
//! Failed queuable mutations and transfers are parked in the durable
//! [`JobStore`] and redelivered by the [`RedeliveryScheduler`].
//!
//! # Lifecycle
//!
//! ```text
//! Created → Starting → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tier_access::{AccessEngine, AccessEngineConfig, EngineState, FetchRequest, TypeBinding, TypeRegistry};
//!
//! # #[tokio::main]
//! # async fn main() -> tier_access::Result<()> {
//! let mut registry = TypeRegistry::new();
//! registry.register("user", TypeBinding::new().memory(true).disk(true))?;
//!
//! let config = AccessEngineConfig {
//!     base_url: "https://api.example.com".into(),
//!     ..Default::default()
//! };
//! let mut engine = AccessEngine::builder(config, registry).build()?;
//! assert_eq!(engine.state(), EngineState::Created);
//!
//! engine.start().await?;
//! let user = engine
//!     .fetch_offline(FetchRequest::builder("user", true).path("users/1").id(1).build()?)
//!     .single()
//!     .await?;
//! println!("{user}");
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod executor;
mod lifecycle;
mod read;
mod transfer;
mod types;
mod write;

pub use executor::EngineExecutor;
pub use types::{EngineState, ResultStream, Schedulers, TransferEvent};

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::config::AccessEngineConfig;
use crate::error::{AccessError, Result};
use crate::item::TypeKey;
use crate::multicast::Multicast;
use crate::registry::TypeRegistry;
use crate::request::RemotePath;
use crate::resilience::{
    DeviceConditions, JobStore, LocalTrigger, RedeliveryScheduler, RedeliveryTrigger, RetryConfig,
    SharedConditions,
};
use crate::selector::{resolve_tiers, TierPlan};
use crate::storage::{Target, Tier};
use crate::transport::Transport;

use read::ReadKey;

/// Connected tiers, available once the engine has started.
pub(crate) struct Backends {
    pub memory: Option<Arc<dyn Tier>>,
    pub disk: Option<Arc<dyn Tier>>,
    pub cloud: Arc<dyn Tier>,
    pub transport: Arc<dyn Transport>,
}

/// Everything a spawned request needs, cheap to clone into a task.
#[derive(Clone)]
pub(crate) struct Shared {
    pub config: Arc<AccessEngineConfig>,
    pub registry: Arc<TypeRegistry>,
    pub backends: Arc<Backends>,
}

impl Shared {
    pub(crate) fn plan(&self, type_key: &TypeKey, should_cache: bool, persist: bool) -> Result<TierPlan> {
        resolve_tiers(
            &self.registry,
            type_key,
            self.config.cache_enabled && self.backends.memory.is_some(),
            self.config.disk_enabled && self.backends.disk.is_some(),
            should_cache,
            persist,
        )
    }

    /// Address for `type_key` at `path`. Mirroring follows `plan`.
    pub(crate) fn target(&self, type_key: &TypeKey, path: &RemotePath, id_field: &str, plan: &TierPlan) -> Result<Target> {
        let binding = self.registry.require(type_key)?;
        Ok(Target {
            type_key: type_key.clone(),
            url: path.resolve(&self.config.base_url),
            id_field: id_field.to_string(),
            persist: plan.disk(),
            cache: plan.memory(),
            mapper: Arc::clone(&binding.mapper),
        })
    }
}

/// Tiered data-access engine.
///
/// Calls return a [`ResultStream`] immediately; the work runs on the
/// background runtime from [`Schedulers`].
pub struct AccessEngine {
    pub(super) config: Arc<AccessEngineConfig>,
    pub(super) registry: Arc<TypeRegistry>,
    pub(super) schedulers: Schedulers,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,
    pub(super) state_rx: watch::Receiver<EngineState>,

    /// Set by `start()`
    pub(super) shared: Option<Shared>,
    pub(super) jobs: Option<Arc<JobStore>>,
    pub(super) scheduler: Option<Arc<RedeliveryScheduler>>,
    pub(super) scheduler_task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,

    /// Injected collaborators, consumed by `start()`
    pub(super) memory_override: Option<Arc<dyn Tier>>,
    pub(super) disk_override: Option<Arc<dyn Tier>>,
    pub(super) transport_override: Option<Arc<dyn Transport>>,

    pub(super) conditions: Arc<dyn DeviceConditions>,
    pub(super) trigger: Arc<dyn RedeliveryTrigger>,
    pub(super) wake: Arc<Notify>,
    pub(super) backoff: RetryConfig,

    /// Offline-first reads in flight
    pub(super) objects: Multicast<ReadKey, Value>,
    pub(super) lists: Multicast<ReadKey, Vec<Value>>,
}

impl AccessEngine {
    #[must_use]
    pub fn builder(config: AccessEngineConfig, registry: TypeRegistry) -> AccessEngineBuilder {
        AccessEngineBuilder {
            config,
            registry,
            memory: None,
            disk: None,
            transport: None,
            background: None,
            delivery: None,
            conditions: None,
            trigger: None,
            backoff: None,
        }
    }

    /// Get current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    #[must_use]
    pub fn config(&self) -> &AccessEngineConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// The redelivery queue, once started.
    #[must_use]
    pub fn job_store(&self) -> Option<&Arc<JobStore>> {
        self.jobs.as_ref()
    }

    /// Backends for a new request. Only a running engine accepts requests.
    pub(super) fn shared(&self) -> Result<Shared> {
        match &self.shared {
            Some(shared) if self.is_running() => Ok(shared.clone()),
            _ => Err(self.not_running()),
        }
    }

    pub(super) fn not_running(&self) -> AccessError {
        AccessError::Configuration(format!("engine is {}, not running", self.state()))
    }

    pub(super) fn set_state(&self, state: EngineState) {
        let _ = self.state.send(state);
        crate::metrics::set_engine_state(&state.to_string());
    }
}

/// Builder for [`AccessEngine`]. Anything not injected is created from the
/// config when the engine starts.
pub struct AccessEngineBuilder {
    config: AccessEngineConfig,
    registry: TypeRegistry,
    memory: Option<Arc<dyn Tier>>,
    disk: Option<Arc<dyn Tier>>,
    transport: Option<Arc<dyn Transport>>,
    background: Option<Handle>,
    delivery: Option<Handle>,
    conditions: Option<Arc<dyn DeviceConditions>>,
    trigger: Option<Arc<dyn RedeliveryTrigger>>,
    backoff: Option<RetryConfig>,
}

impl AccessEngineBuilder {
    #[must_use]
    pub fn memory_tier(mut self, tier: Arc<dyn Tier>) -> Self {
        self.memory = Some(tier);
        self
    }

    #[must_use]
    pub fn disk_tier(mut self, tier: Arc<dyn Tier>) -> Self {
        self.disk = Some(tier);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Runtime for tier I/O. Defaults to the current runtime.
    #[must_use]
    pub fn background(mut self, handle: Handle) -> Self {
        self.background = Some(handle);
        self
    }

    /// Runtime that forwards results to callers.
    #[must_use]
    pub fn delivery(mut self, handle: Handle) -> Self {
        self.delivery = Some(handle);
        self
    }

    #[must_use]
    pub fn conditions(mut self, conditions: Arc<dyn DeviceConditions>) -> Self {
        self.conditions = Some(conditions);
        self
    }

    #[must_use]
    pub fn trigger(mut self, trigger: Arc<dyn RedeliveryTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Backoff between redeliveries. Defaults to [`RetryConfig::redelivery`].
    #[must_use]
    pub fn backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Fails with `Configuration` when no background runtime was given and
    /// none is current.
    pub fn build(self) -> Result<AccessEngine> {
        let background = match self.background {
            Some(handle) => handle,
            None => Schedulers::current()?.background,
        };
        let schedulers = Schedulers {
            background: background.clone(),
            delivery: self.delivery,
        };

        let wake = Arc::new(Notify::new());
        let trigger = self
            .trigger
            .unwrap_or_else(|| Arc::new(LocalTrigger::new(Arc::clone(&wake))));
        let (state_tx, state_rx) = watch::channel(EngineState::Created);

        Ok(AccessEngine {
            config: Arc::new(self.config),
            registry: Arc::new(self.registry),
            schedulers,
            state: state_tx,
            state_rx,
            shared: None,
            jobs: None,
            scheduler: None,
            scheduler_task: Mutex::new(None),
            memory_override: self.memory,
            disk_override: self.disk,
            transport_override: self.transport,
            conditions: self
                .conditions
                .unwrap_or_else(|| Arc::new(SharedConditions::always())),
            trigger,
            wake,
            backoff: self.backoff.unwrap_or_else(RetryConfig::redelivery),
            objects: Multicast::new(background.clone()),
            lists: Multicast::new(background),
        })
    }
}
