// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Tier Access
//!
//! One request API over three data tiers, with offline-first reads and
//! durable redelivery of failed writes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Request Layer                         │
//! │  • FetchRequest / MutationRequest / TransferRequest         │
//! │  • Tier selector: which tiers may this request touch?       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Memory: In-Process Cache                 │
//! │  • DashMap keyed by (type, id), optional TTL                │
//! │  • Domain-shaped values                                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  (miss)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Disk: SQLite (WAL)                      │
//! │  • Offline-first reads only                                 │
//! │  • Storage-shaped JSON, searchable by field                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  (miss / empty list)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Cloud: Remote Service                  │
//! │  • Every mutation goes here first                           │
//! │  • Results mirrored back into disk and memory               │
//! │  • Failed queuable writes → JobStore → RedeliveryScheduler  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tier_access::{AccessEngine, AccessEngineConfig, FetchRequest, MutationRequest, TypeBinding, TypeRegistry};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> tier_access::Result<()> {
//!     let mut registry = TypeRegistry::new();
//!     registry.register("note", TypeBinding::new().memory(true).disk(true))?;
//!
//!     let config = AccessEngineConfig {
//!         base_url: "https://api.example.com".into(),
//!         ..Default::default()
//!     };
//!     let mut engine = AccessEngine::builder(config, registry).build()?;
//!     engine.start().await?;
//!
//!     // Remote write, mirrored to disk; queued for redelivery if offline
//!     let created = engine
//!         .mutate(
//!             MutationRequest::post("note", true)
//!                 .path("notes")
//!                 .payload(json!({"id": 1, "text": "hello"}))
//!                 .queuable()
//!                 .build()?,
//!         )
//!         .single()
//!         .await?;
//!     println!("created {created}");
//!
//!     // Served from disk, no network needed
//!     let note = engine
//!         .fetch_offline(FetchRequest::builder("note", true).path("notes/1").id(1).build()?)
//!         .single()
//!         .await?;
//!     println!("read {note}");
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Offline-first reads**: memory → disk → cloud with per-request tier selection
//! - **Shared in-flight reads**: concurrent identical reads hit each tier once
//! - **Durable redelivery**: failed queuable writes survive restarts, bounded attempts
//! - **Device constraints**: jobs wait for network, unmetered network or charging
//! - **Shape mapping**: per-type mapper between wire, storage and domain shapes
//! - **File transfers**: multipart upload and streamed download with progress
//!
//! ## Configuration
//!
//! See [`AccessEngineConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`engine`]: The [`AccessEngine`] orchestrating all components
//! - [`storage`]: Tier contract and the memory, disk and cloud tiers
//! - [`registry`]: Type registry and shape mappers
//! - [`selector`]: Tier eligibility per request
//! - [`multicast`]: Shared in-flight requests with replay
//! - [`resilience`]: Retry presets, job store, redelivery scheduler
//! - [`transport`]: HTTP transport

pub mod config;
pub mod error;
pub mod item;
pub mod request;
pub mod registry;
pub mod selector;
pub mod storage;
pub mod transport;
pub mod multicast;
pub mod resilience;
pub mod engine;
pub mod metrics;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::AccessEngineConfig;
pub use error::{AccessError, Result};
pub use item::{extract_id, IdType, ItemId, TypeKey};
pub use request::{
    Direction, FetchRequest, Method, MutationRequest, Payload, RemotePath, TransferRequest,
};
pub use registry::{IdentityMapper, Mapper, Shape, TypeBinding, TypeRegistry};
pub use selector::{resolve_tiers, TierPlan};
pub use storage::{CloudTier, DiskTier, MemoryTier, Target, Tier, TierKind, TierResult, WriteMode};
pub use transport::{HttpTransport, ProgressFn, Transport};
pub use multicast::{Multicast, Subscription};
pub use engine::{
    AccessEngine, AccessEngineBuilder, EngineExecutor, EngineState, ResultStream, Schedulers,
    TransferEvent,
};
pub use resilience::{
    Constraints, DeviceConditions, JobExecutor, JobKind, JobStore, JobStoreStats, LocalTrigger,
    NetworkRequirement, PassReport, QueuedJob, RedeliveryScheduler, RedeliveryTrigger, RetryConfig,
    SharedConditions,
};
pub use metrics::LatencyTimer;
