// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable redelivery queue backed by SQLite.
//!
//! Queuable requests that failed on the transport are parked here until the
//! scheduler can run them again. Rows survive restarts; a job is removed
//! once it succeeds or can no longer succeed.
//!
//! ```sql
//! CREATE TABLE queued_jobs (
//!   id               TEXT PRIMARY KEY,
//!   kind             TEXT NOT NULL,     -- mutation | upload | download
//!   payload          BLOB NOT NULL,     -- serialized request (JSON)
//!   constraints      TEXT NOT NULL,     -- JSON
//!   created_at       INTEGER NOT NULL,
//!   attempt_count    INTEGER NOT NULL,
//!   state            TEXT NOT NULL,     -- queued | executing
//!   next_eligible_at INTEGER NOT NULL
//! )
//! ```
//!
//! Every transition is a single statement. Claiming is a conditional update
//! on `state = 'queued'`, so two executors can never own the same job.

use std::sync::atomic::{AtomicU64, Ordering};

use sqlx::sqlite::SqlitePool;
use tracing::{debug, info, warn};

use super::job::{Constraints, JobKind, JobState, QueuedJob};
use crate::error::{AccessError, Result};
use crate::storage::sqlite::{open_pool, with_busy_retry};

/// Queue counters for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStoreStats {
    /// Jobs currently stored (queued or executing)
    pub pending_jobs: u64,
    /// Jobs enqueued since startup
    pub total_enqueued: u64,
    /// Jobs that succeeded on redelivery since startup
    pub total_completed: u64,
    /// Jobs dropped at the attempt ceiling since startup
    pub total_abandoned: u64,
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    kind: String,
    payload: Vec<u8>,
    constraints: String,
    created_at: i64,
    attempt_count: i64,
    state: String,
    next_eligible_at: i64,
}

impl TryFrom<JobRow> for QueuedJob {
    type Error = AccessError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Self {
            kind: row.kind.parse()?,
            constraints: serde_json::from_str::<Constraints>(&row.constraints)?,
            state: row.state.parse()?,
            attempt_count: u32::try_from(row.attempt_count).unwrap_or(u32::MAX),
            id: row.id,
            payload: row.payload,
            created_at: row.created_at,
            next_eligible_at: row.next_eligible_at,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, kind, payload, constraints, created_at, attempt_count, state, next_eligible_at FROM queued_jobs";

pub struct JobStore {
    pool: SqlitePool,
    pending_count: AtomicU64,
    total_enqueued: AtomicU64,
    total_completed: AtomicU64,
    total_abandoned: AtomicU64,
}

impl JobStore {
    /// Open the queue at `path`, recovering jobs a crash left mid-execution.
    pub async fn open(path: &str) -> Result<Self> {
        let pool = open_pool(path, "job_store_open").await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queued_jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                payload BLOB NOT NULL,
                constraints TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL,
                next_eligible_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_queued_jobs_due ON queued_jobs (state, next_eligible_at)")
            .execute(&pool)
            .await?;

        let recovered = sqlx::query("UPDATE queued_jobs SET state = 'queued' WHERE state = 'executing'")
            .execute(&pool)
            .await?
            .rows_affected();
        if recovered > 0 {
            warn!(recovered, "Reset jobs interrupted by a previous shutdown");
        }

        let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queued_jobs")
            .fetch_one(&pool)
            .await?;
        if pending > 0 {
            info!(pending, "Redelivery queue has jobs from previous run");
        }

        Ok(Self {
            pool,
            pending_count: AtomicU64::new(pending as u64),
            total_enqueued: AtomicU64::new(0),
            total_completed: AtomicU64::new(0),
            total_abandoned: AtomicU64::new(0),
        })
    }

    pub async fn enqueue(&self, job: &QueuedJob) -> Result<()> {
        let constraints = serde_json::to_string(&job.constraints)?;
        with_busy_retry("job_enqueue", || async {
            sqlx::query(
                "INSERT INTO queued_jobs \
                 (id, kind, payload, constraints, created_at, attempt_count, state, next_eligible_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&job.id)
            .bind(job.kind.as_str())
            .bind(&job.payload)
            .bind(&constraints)
            .bind(job.created_at)
            .bind(i64::from(job.attempt_count))
            .bind(job.state.as_str())
            .bind(job.next_eligible_at)
            .execute(&self.pool)
            .await
        })
        .await?;

        let pending = self.pending_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        crate::metrics::set_queue_depth(pending);
        debug!(job_id = %job.id, kind = %job.kind, pending, "Job enqueued");
        Ok(())
    }

    /// Queued jobs whose backoff has elapsed at `now` (epoch millis), oldest first.
    pub async fn due(&self, now: i64, limit: usize) -> Result<Vec<QueuedJob>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE state = 'queued' AND next_eligible_at <= ? \
             ORDER BY next_eligible_at, created_at LIMIT ?"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<JobRow> = with_busy_retry("job_due", || async {
            sqlx::query_as(&sql).bind(now).bind(limit).fetch_all(&self.pool).await
        })
        .await?;
        rows.into_iter().map(QueuedJob::try_from).collect()
    }

    pub async fn get(&self, id: &str) -> Result<Option<QueuedJob>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?");
        let row: Option<JobRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(QueuedJob::try_from).transpose()
    }

    /// Move a job from queued to executing. `false` if someone else owns it
    /// (or it no longer exists).
    pub async fn claim(&self, id: &str) -> Result<bool> {
        let result = with_busy_retry("job_claim", || async {
            sqlx::query("UPDATE queued_jobs SET state = 'executing' WHERE id = ? AND state = 'queued'")
                .bind(id)
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Remove a job that ran successfully.
    pub async fn complete(&self, id: &str) -> Result<()> {
        if self.delete(id, "job_complete").await? {
            self.total_completed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Remove a job that reached the attempt ceiling.
    pub async fn abandon(&self, id: &str) -> Result<()> {
        if self.delete(id, "job_abandon").await? {
            self.total_abandoned.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Put a failed job back in the queue with its new attempt count.
    pub async fn reschedule(&self, id: &str, attempt_count: u32, next_eligible_at: i64) -> Result<()> {
        with_busy_retry("job_reschedule", || async {
            sqlx::query(
                "UPDATE queued_jobs SET state = 'queued', attempt_count = ?, next_eligible_at = ? \
                 WHERE id = ?",
            )
            .bind(i64::from(attempt_count))
            .bind(next_eligible_at)
            .bind(id)
            .execute(&self.pool)
            .await
        })
        .await?;
        debug!(job_id = id, attempt_count, next_eligible_at, "Job rescheduled");
        Ok(())
    }

    /// Return a claimed job to the queue with its attempt count unchanged.
    pub async fn release(&self, id: &str) -> Result<()> {
        with_busy_retry("job_release", || async {
            sqlx::query("UPDATE queued_jobs SET state = 'queued' WHERE id = ? AND state = 'executing'")
                .bind(id)
                .execute(&self.pool)
                .await
        })
        .await?;
        debug!(job_id = id, "Job released");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn delete(&self, id: &str, operation: &str) -> Result<bool> {
        let result = with_busy_retry(operation, || async {
            sqlx::query("DELETE FROM queued_jobs WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
        })
        .await?;

        let removed = result.rows_affected() == 1;
        if removed {
            let pending = self
                .pending_count
                .fetch_sub(1, Ordering::AcqRel)
                .saturating_sub(1);
            crate::metrics::set_queue_depth(pending);
        }
        Ok(removed)
    }

    /// Number of stored jobs.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.pending_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> JobStoreStats {
        JobStoreStats {
            pending_jobs: self.pending_count.load(Ordering::Acquire),
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_completed: self.total_completed.load(Ordering::Relaxed),
            total_abandoned: self.total_abandoned.load(Ordering::Relaxed),
        }
    }

    /// Ids of every stored job, any state.
    pub async fn ids(&self) -> Result<Vec<String>> {
        Ok(sqlx::query_scalar("SELECT id FROM queued_jobs ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?)
    }

    /// Jobs of a given kind, any state.
    pub async fn by_kind(&self, kind: JobKind) -> Result<Vec<QueuedJob>> {
        let sql = format!("{SELECT_COLUMNS} WHERE kind = ? ORDER BY created_at");
        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(QueuedJob::try_from).collect()
    }
}
