// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle management: start, shutdown, redelivery control.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{info, warn};

use super::{AccessEngine, Backends, EngineExecutor, EngineState, Shared};
use crate::error::{AccessError, Result};
use crate::resilience::{JobStore, JobStoreStats, PassReport, RedeliveryScheduler};
use crate::storage::{CloudTier, DiskTier, MemoryTier, Tier};
use crate::transport::{HttpTransport, Transport};

impl AccessEngine {
    /// Open the stores and start the redelivery loop.
    ///
    /// Startup flow:
    /// 1. Memory tier (injected, or created when caching is enabled)
    /// 2. Disk tier (injected, or opened at `disk_path` when enabled)
    /// 3. Cloud tier over the transport, mirroring into 1 and 2
    /// 4. Job store at `queue_path` (jobs left executing by a crash are requeued)
    /// 5. Redelivery scheduler on the background runtime
    #[tracing::instrument(skip(self), fields(has_memory, has_disk))]
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(AccessError::Configuration(format!("cannot start an engine that is {}", self.state())));
        }
        let startup_start = Instant::now();
        info!("Starting access engine...");
        self.set_state(EngineState::Starting);

        match self.connect().await {
            Ok(()) => {
                self.set_state(EngineState::Running);
                info!(elapsed_ms = startup_start.elapsed().as_millis() as u64, "Access engine running");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Access engine failed to start");
                self.set_state(EngineState::Stopped);
                Err(e)
            }
        }
    }

    async fn connect(&mut self) -> Result<()> {
        let config = Arc::clone(&self.config);

        // ========== Memory ==========
        let memory: Option<Arc<dyn Tier>> = match self.memory_override.take() {
            Some(tier) => Some(tier),
            None if config.cache_enabled => Some(Arc::new(MemoryTier::new(config.cache_ttl()))),
            None => None,
        };
        tracing::Span::current().record("has_memory", memory.is_some());

        // ========== Disk ==========
        let disk: Option<Arc<dyn Tier>> = match self.disk_override.take() {
            Some(tier) => Some(tier),
            None if config.disk_enabled => {
                let tier = DiskTier::open(&config.disk_path).await?;
                info!(path = %config.disk_path, "Disk tier opened");
                Some(Arc::new(tier))
            }
            None => None,
        };
        tracing::Span::current().record("has_disk", disk.is_some());

        // ========== Cloud ==========
        let transport: Arc<dyn Transport> = match self.transport_override.take() {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(config.request_timeout())?),
        };
        let mut cloud = CloudTier::new(Arc::clone(&transport));
        if let Some(disk) = &disk {
            cloud = cloud.with_disk_mirror(Arc::clone(disk));
        }
        if let Some(memory) = &memory {
            cloud = cloud.with_memory_mirror(Arc::clone(memory));
        }

        let shared = Shared {
            config: Arc::clone(&config),
            registry: Arc::clone(&self.registry),
            backends: Arc::new(Backends {
                memory,
                disk,
                cloud: Arc::new(cloud),
                transport,
            }),
        };

        // ========== Redelivery ==========
        let jobs = Arc::new(JobStore::open(&config.queue_path).await?);
        info!(path = %config.queue_path, pending = jobs.len(), "Job store opened");

        let scheduler = Arc::new(RedeliveryScheduler::new(
            Arc::clone(&jobs),
            Arc::new(EngineExecutor::new(shared.clone())),
            Arc::clone(&self.conditions),
            Arc::clone(&self.trigger),
            self.backoff.clone(),
            config.max_redelivery_attempts,
            config.redelivery_poll_interval(),
            config.redelivery_batch_size,
            Arc::clone(&self.wake),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = self
            .schedulers
            .background
            .spawn(Arc::clone(&scheduler).run(shutdown_rx));

        *self.scheduler_task.lock() = Some((shutdown_tx, task));
        self.scheduler = Some(scheduler);
        self.jobs = Some(jobs);
        self.shared = Some(shared);
        Ok(())
    }

    /// Stop the redelivery loop. Queued jobs stay in the store for the next
    /// start; detached writes already dispatched run to completion.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        if !matches!(self.state(), EngineState::Running | EngineState::Starting) {
            return;
        }
        info!("Shutting down access engine...");
        self.set_state(EngineState::ShuttingDown);

        let running = self.scheduler_task.lock().take();
        if let Some((shutdown_tx, task)) = running {
            let _ = shutdown_tx.send(true);
            if let Err(e) = task.await {
                warn!(error = %e, "Redelivery scheduler ended abnormally");
            }
        }

        if let Some(jobs) = &self.jobs {
            let stats = jobs.stats();
            info!(
                pending = stats.pending_jobs,
                completed = stats.total_completed,
                abandoned = stats.total_abandoned,
                "Redelivery queue at shutdown"
            );
        }
        self.set_state(EngineState::Stopped);
        info!("Access engine stopped");
    }

    /// Run one redelivery pass now, without waiting for the poll interval.
    pub async fn redeliver_now(&self) -> Result<PassReport> {
        match &self.scheduler {
            Some(scheduler) if self.is_running() => scheduler.run_once().await,
            _ => Err(self.not_running()),
        }
    }

    /// Redelivery queue counters, once started.
    #[must_use]
    pub fn queue_stats(&self) -> Option<JobStoreStats> {
        self.jobs.as_ref().map(|jobs| jobs.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessEngineConfig;
    use crate::registry::{TypeBinding, TypeRegistry};
    use crate::storage::sqlite::IN_MEMORY;

    fn config() -> AccessEngineConfig {
        AccessEngineConfig {
            base_url: "http://127.0.0.1:9".into(),
            disk_path: IN_MEMORY.into(),
            queue_path: IN_MEMORY.into(),
            ..Default::default()
        }
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register("user", TypeBinding::new().memory(true).disk(true)).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mut engine = AccessEngine::builder(config(), registry()).build().unwrap();
        let mut states = engine.state_receiver();

        engine.start().await.unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert!(states.has_changed().unwrap());
        assert_eq!(engine.queue_stats().unwrap().pending_jobs, 0);
        assert_eq!(engine.redeliver_now().await.unwrap(), PassReport::default());

        engine.shutdown().await;
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(*states.borrow_and_update(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut engine = AccessEngine::builder(config(), registry()).build().unwrap();
        engine.start().await.unwrap();
        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, AccessError::Configuration(_)));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabled_tiers_are_not_created() {
        let config = AccessEngineConfig {
            cache_enabled: false,
            disk_enabled: false,
            ..config()
        };
        let mut engine = AccessEngine::builder(config, registry()).build().unwrap();
        engine.start().await.unwrap();

        let shared = engine.shared().unwrap();
        assert!(shared.backends.memory.is_none());
        assert!(shared.backends.disk.is_none());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_redeliver_before_start_fails() {
        let engine = AccessEngine::builder(config(), registry()).build().unwrap();
        assert!(engine.redeliver_now().await.is_err());
    }

    #[tokio::test]
    async fn test_stopped_engine_rejects_requests() {
        let mut engine = AccessEngine::builder(config(), registry()).build().unwrap();
        engine.start().await.unwrap();
        engine.shutdown().await;

        let err = engine.shared().err().unwrap();
        assert!(matches!(err, AccessError::Configuration(_)));
        assert!(err.to_string().contains("Stopped"));
        assert!(matches!(engine.redeliver_now().await, Err(AccessError::Configuration(_))));
    }
}
