// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Re-runs queued jobs against the live tiers.

use async_trait::async_trait;
use tracing::debug;

use super::transfer::execute_transfer;
use super::write::execute_mutation;
use super::Shared;
use crate::error::Result;
use crate::resilience::{JobExecutor, JobKind, QueuedJob};

/// [`JobExecutor`] backed by the engine's tiers. Redelivery never queues
/// again; the scheduler owns the attempt count.
pub struct EngineExecutor {
    shared: Shared,
}

impl EngineExecutor {
    pub(crate) fn new(shared: Shared) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl JobExecutor for EngineExecutor {
    async fn execute(&self, job: &QueuedJob) -> Result<()> {
        match job.kind {
            JobKind::Mutation => {
                let req = job.mutation_request()?;
                debug!(job_id = %job.id, method = %req.method(), type_key = %req.type_key(), "Redelivering mutation");
                execute_mutation(&self.shared, &req).await.map(|_| ())
            }
            JobKind::Upload | JobKind::Download => {
                let body = job.transfer_job()?;
                debug!(job_id = %job.id, kind = %job.kind, "Redelivering transfer");
                execute_transfer(&self.shared, &body.request, body.direction, &|_: u64, _: Option<u64>| {})
                    .await
                    .map(|_| ())
            }
        }
    }
}
