// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redelivery scheduler.
//!
//! Polls the [`JobStore`] for due jobs, runs each one whose [`Constraints`]
//! currently hold, and records the outcome:
//!
//! | Outcome | Action |
//! |---------|--------|
//! | success | row deleted |
//! | retryable failure, attempts left | `attempt_count + 1`, backoff, back to queued |
//! | retryable failure at the ceiling | row deleted, logged as exhausted |
//! | non-retryable failure | row deleted, logged |
//!
//! A job whose outcome cannot be written back is released to the queue as
//! it was and the pass moves on to the next job. A success that could not
//! be recorded is therefore delivered again.
//!
//! Redelivery outcomes are never reported to the original caller.
//!
//! The loop sleeps for the poll interval but can be woken early through the
//! [`RedeliveryTrigger`], which is also how a host platform's job service can
//! be told when the next attempt is worth making.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use super::job::{Constraints, NetworkRequirement, QueuedJob};
use super::job_store::JobStore;
use super::retry::RetryConfig;
use crate::error::{AccessError, Result};
use crate::item::now_millis;

/// Device state the scheduler consults before running a job.
pub trait DeviceConditions: Send + Sync {
    fn network_available(&self) -> bool;
    fn unmetered_network(&self) -> bool;
    fn charging(&self) -> bool;

    fn satisfies(&self, constraints: &Constraints) -> bool {
        let network = match constraints.network {
            NetworkRequirement::Any => self.network_available(),
            NetworkRequirement::Unmetered => self.network_available() && self.unmetered_network(),
        };
        network && (!constraints.charging || self.charging())
    }
}

/// Conditions held in atomics, updated by whoever observes the device.
pub struct SharedConditions {
    online: AtomicBool,
    unmetered: AtomicBool,
    charging: AtomicBool,
}

impl SharedConditions {
    #[must_use]
    pub fn new(online: bool, unmetered: bool, charging: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            unmetered: AtomicBool::new(unmetered),
            charging: AtomicBool::new(charging),
        }
    }

    /// Every constraint satisfied (servers, desktops).
    #[must_use]
    pub fn always() -> Self {
        Self::new(true, true, true)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    pub fn set_unmetered(&self, unmetered: bool) {
        self.unmetered.store(unmetered, Ordering::Release);
    }

    pub fn set_charging(&self, charging: bool) {
        self.charging.store(charging, Ordering::Release);
    }
}

impl Default for SharedConditions {
    fn default() -> Self {
        Self::always()
    }
}

impl DeviceConditions for SharedConditions {
    fn network_available(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    fn unmetered_network(&self) -> bool {
        self.unmetered.load(Ordering::Acquire)
    }

    fn charging(&self) -> bool {
        self.charging.load(Ordering::Acquire)
    }
}

/// Told whenever a job is queued or rescheduled, with the earliest time
/// (epoch millis) the next attempt is worth making.
pub trait RedeliveryTrigger: Send + Sync {
    fn schedule_redelivery(&self, job: &QueuedJob, not_before: i64);
}

/// Wakes the in-process scheduler loop at `not_before`.
#[derive(Clone)]
pub struct LocalTrigger {
    wake: Arc<Notify>,
}

impl LocalTrigger {
    pub fn new(wake: Arc<Notify>) -> Self {
        Self { wake }
    }
}

impl RedeliveryTrigger for LocalTrigger {
    fn schedule_redelivery(&self, job: &QueuedJob, not_before: i64) {
        let wait = u64::try_from(not_before - now_millis()).unwrap_or(0);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) if wait > 0 => {
                let wake = self.wake.clone();
                handle.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                    wake.notify_one();
                });
            }
            _ => self.wake.notify_one(),
        }
        debug!(job_id = %job.id, wait_ms = wait, "Redelivery scheduled");
    }
}

/// Re-runs the request stored in a job.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &QueuedJob) -> Result<()>;
}

/// Counts from one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Due jobs looked at
    pub examined: usize,
    /// Left queued because constraints did not hold
    pub deferred: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub abandoned: usize,
    /// Returned to the queue untouched after a store failure
    pub released: usize,
}

pub struct RedeliveryScheduler {
    store: Arc<JobStore>,
    executor: Arc<dyn JobExecutor>,
    conditions: Arc<dyn DeviceConditions>,
    trigger: Arc<dyn RedeliveryTrigger>,
    backoff: RetryConfig,
    max_attempts: u32,
    poll_interval: Duration,
    batch_size: usize,
    wake: Arc<Notify>,
}

impl RedeliveryScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<JobStore>,
        executor: Arc<dyn JobExecutor>,
        conditions: Arc<dyn DeviceConditions>,
        trigger: Arc<dyn RedeliveryTrigger>,
        backoff: RetryConfig,
        max_attempts: u32,
        poll_interval: Duration,
        batch_size: usize,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            executor,
            conditions,
            trigger,
            backoff,
            max_attempts: max_attempts.max(1),
            poll_interval,
            batch_size: batch_size.max(1),
            wake,
        }
    }

    /// Run every due job once.
    ///
    /// Only a failure to list due jobs fails the pass; store errors on a
    /// single job are logged and that job is skipped or released.
    pub async fn run_once(&self) -> Result<PassReport> {
        let mut report = PassReport::default();
        let due = self.store.due(now_millis(), self.batch_size).await?;

        for job in due {
            report.examined += 1;

            if !self.conditions.satisfies(&job.constraints) {
                debug!(job_id = %job.id, constraints = ?job.constraints, "Constraints not met, deferring job");
                report.deferred += 1;
                continue;
            }
            match self.store.claim(&job.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(job_id = %job.id, "Job claimed elsewhere");
                    continue;
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Failed to claim job, skipping");
                    continue;
                }
            }

            if let Err(e) = self.attempt(&job, &mut report).await {
                warn!(job_id = %job.id, error = %e, "Failed to record redelivery outcome, releasing job");
                match self.store.release(&job.id).await {
                    Ok(()) => report.released += 1,
                    Err(e) => error!(job_id = %job.id, error = %e, "Failed to release job, left executing until restart"),
                }
            }
        }

        if report.examined > 0 {
            debug!(?report, "Redelivery pass complete");
        }
        Ok(report)
    }

    /// Execute a claimed job and move it to its next state.
    async fn attempt(&self, job: &QueuedJob, report: &mut PassReport) -> Result<()> {
        match self.executor.execute(job).await {
            Ok(()) => {
                self.store.complete(&job.id).await?;
                crate::metrics::record_redelivery(job.kind.as_str(), "succeeded");
                info!(job_id = %job.id, kind = %job.kind, attempt = job.attempt_count + 1, "Redelivery succeeded");
                report.succeeded += 1;
            }
            Err(e) => {
                let attempts = job.attempt_count.saturating_add(1);
                if e.is_retryable() && attempts < self.max_attempts {
                    let not_before = now_millis() + self.backoff.delay_for(attempts).as_millis() as i64;
                    self.store.reschedule(&job.id, attempts, not_before).await?;
                    self.trigger.schedule_redelivery(job, not_before);
                    crate::metrics::record_redelivery(job.kind.as_str(), "rescheduled");
                    warn!(job_id = %job.id, attempts, error = %e, "Redelivery failed, rescheduled");
                    report.rescheduled += 1;
                } else {
                    self.store.abandon(&job.id).await?;
                    if e.is_retryable() {
                        let exhausted = AccessError::RetryExhausted {
                            job_id: job.id.clone(),
                            attempts,
                        };
                        crate::metrics::record_redelivery(job.kind.as_str(), "exhausted");
                        error!(kind = %job.kind, last_error = %e, "{exhausted}");
                    } else {
                        crate::metrics::record_redelivery(job.kind.as_str(), "rejected");
                        error!(job_id = %job.id, kind = %job.kind, error = %e, "Redelivery rejected, job dropped");
                    }
                    report.abandoned += 1;
                }
            }
        }
        Ok(())
    }

    /// Poll until `shutdown` flips to true (or its sender is dropped).
    #[tracing::instrument(skip_all)]
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            max_attempts = self.max_attempts,
            "Redelivery scheduler running"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "Redelivery pass failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.wake.notified() => {
                    debug!("Redelivery scheduler woken");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Redelivery scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::job::JobState;
    use crate::request::MutationRequest;
    use crate::storage::sqlite::IN_MEMORY;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Fails with the scripted errors in order, then succeeds.
    struct ScriptedExecutor {
        failures: Mutex<Vec<AccessError>>,
        calls: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn new(failures: Vec<AccessError>) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobExecutor for ScriptedExecutor {
        async fn execute(&self, _job: &QueuedJob) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock();
            if failures.is_empty() {
                Ok(())
            } else {
                Err(failures.remove(0))
            }
        }
    }

    #[derive(Default)]
    struct RecordingTrigger {
        scheduled: Mutex<Vec<(String, i64)>>,
    }

    impl RedeliveryTrigger for RecordingTrigger {
        fn schedule_redelivery(&self, job: &QueuedJob, not_before: i64) {
            self.scheduled.lock().push((job.id.clone(), not_before));
        }
    }

    fn no_backoff() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 2.0,
            max_retries: None,
        }
    }

    async fn setup(
        executor: Arc<ScriptedExecutor>,
        conditions: Arc<SharedConditions>,
    ) -> (Arc<JobStore>, RedeliveryScheduler, Arc<RecordingTrigger>) {
        let store = Arc::new(JobStore::open(IN_MEMORY).await.unwrap());
        let trigger = Arc::new(RecordingTrigger::default());
        let scheduler = RedeliveryScheduler::new(
            store.clone(),
            executor,
            conditions,
            trigger.clone(),
            no_backoff(),
            3,
            Duration::from_millis(10),
            16,
            Arc::new(Notify::new()),
        );
        (store, scheduler, trigger)
    }

    fn job() -> QueuedJob {
        let req = MutationRequest::put("user", false)
            .path("users/1")
            .payload(json!({"id": 1}))
            .queuable()
            .build()
            .unwrap();
        QueuedJob::mutation(&req).unwrap()
    }

    #[test]
    fn test_constraint_matching() {
        let conditions = SharedConditions::new(true, false, false);
        assert!(conditions.satisfies(&Constraints::default()));
        assert!(!conditions.satisfies(&Constraints {
            network: NetworkRequirement::Unmetered,
            charging: false,
        }));
        assert!(!conditions.satisfies(&Constraints {
            network: NetworkRequirement::Any,
            charging: true,
        }));

        conditions.set_online(false);
        assert!(!conditions.satisfies(&Constraints::default()));
    }

    #[tokio::test]
    async fn test_success_removes_job() {
        let executor = ScriptedExecutor::new(vec![]);
        let (store, scheduler, _) = setup(executor.clone(), Arc::new(SharedConditions::always())).await;
        store.enqueue(&job()).await.unwrap();

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(store.is_empty());
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_ceiling_stops_after_three_attempts() {
        let failures = (0..10).map(|_| AccessError::transport("offline")).collect();
        let executor = ScriptedExecutor::new(failures);
        let (store, scheduler, trigger) = setup(executor.clone(), Arc::new(SharedConditions::always())).await;
        store.enqueue(&job()).await.unwrap();

        for _ in 0..2 {
            let report = scheduler.run_once().await.unwrap();
            assert_eq!(report.rescheduled, 1);
        }
        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.abandoned, 1);
        assert!(store.is_empty());

        // No fourth attempt
        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(executor.calls(), 3);
        assert_eq!(trigger.scheduled.lock().len(), 2);
        assert_eq!(store.stats().total_abandoned, 1);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_drops_job() {
        let executor = ScriptedExecutor::new(vec![AccessError::Transport {
            status: Some(400),
            message: "bad request".into(),
        }]);
        let (store, scheduler, _) = setup(executor.clone(), Arc::new(SharedConditions::always())).await;
        store.enqueue(&job()).await.unwrap();

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.abandoned, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failed_transition_releases_job_and_continues() {
        let failures = (0..2).map(|_| AccessError::transport("offline")).collect();
        let executor = ScriptedExecutor::new(failures);
        let (store, scheduler, trigger) = setup(executor.clone(), Arc::new(SharedConditions::always())).await;
        let (a, b) = (job(), job());
        store.enqueue(&a).await.unwrap();
        store.enqueue(&b).await.unwrap();

        // Any write of attempt_count fails, as a full disk would
        sqlx::query(
            "CREATE TRIGGER fail_reschedule BEFORE UPDATE OF attempt_count ON queued_jobs \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.released, 2);
        assert_eq!(report.rescheduled, 0);
        assert_eq!(executor.calls(), 2);
        assert!(trigger.scheduled.lock().is_empty());

        // Both jobs are back in the queue, not stuck executing
        let due = store.due(now_millis(), 10).await.unwrap();
        assert_eq!(due.len(), 2);
        assert!(due.iter().all(|j| j.state == JobState::Queued && j.attempt_count == 0));

        sqlx::query("DROP TRIGGER fail_reschedule").execute(store.pool()).await.unwrap();
        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_offline_defers_without_attempt() {
        let executor = ScriptedExecutor::new(vec![]);
        let conditions = Arc::new(SharedConditions::new(false, false, false));
        let (store, scheduler, _) = setup(executor.clone(), conditions.clone()).await;
        let j = job();
        store.enqueue(&j).await.unwrap();

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(executor.calls(), 0);
        assert_eq!(store.get(&j.id).await.unwrap().unwrap().attempt_count, 0);

        conditions.set_online(true);
        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.succeeded, 1);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let executor = ScriptedExecutor::new(vec![]);
        let (store, scheduler, _) = setup(executor.clone(), Arc::new(SharedConditions::always())).await;
        store.enqueue(&job()).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::new(scheduler).run(rx));

        tokio::time::timeout(Duration::from_secs(2), async {
            while !store.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_local_trigger_wakes_loop() {
        let wake = Arc::new(Notify::new());
        let trigger = LocalTrigger::new(wake.clone());
        let notified = wake.notified();
        tokio::pin!(notified);

        trigger.schedule_redelivery(&job(), now_millis() + 20);
        tokio::time::timeout(Duration::from_secs(1), notified).await.unwrap();
    }
}
