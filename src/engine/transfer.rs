// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! File transfers.
//!
//! Uploads and downloads bypass the tiers and talk to the transport
//! directly. Like writes they are detached from the caller's stream, and a
//! queuable transfer that fails on the network is parked for redelivery
//! under its own constraints (unmetered network, charging).

use std::sync::Arc;

use tracing::{error, info, warn};

use super::types::Emitter;
use super::{AccessEngine, ResultStream, Shared, TransferEvent};
use crate::error::{AccessError, Result};
use crate::metrics::{record_enqueued, record_transfer_bytes, LatencyTimer};
use crate::request::{Direction, TransferRequest};
use crate::resilience::{JobStore, QueuedJob, RedeliveryTrigger};
use crate::transport::ProgressFn;

/// Run one transfer and return its completion event.
pub(crate) async fn execute_transfer(
    shared: &Shared,
    req: &TransferRequest,
    direction: Direction,
    progress: &ProgressFn,
) -> Result<TransferEvent> {
    let url = req.path().resolve(&shared.config.base_url);
    let transport = &shared.backends.transport;

    match direction {
        Direction::Upload => {
            let meta = tokio::fs::metadata(req.file()).await?;
            if !meta.is_file() {
                return Err(AccessError::Io(format!("{} is not a regular file", req.file().display())));
            }
            let _timer = LatencyTimer::new("cloud", "upload");
            let response = transport
                .upload(&url, req.file(), req.key(), req.params(), progress)
                .await?;
            record_transfer_bytes("upload", meta.len());
            info!(url = %url, bytes = meta.len(), "Upload complete");
            Ok(TransferEvent::Uploaded(response))
        }
        Direction::Download => {
            let _timer = LatencyTimer::new("cloud", "download");
            let written = transport.download(&url, req.file(), progress).await?;
            if let Ok(meta) = tokio::fs::metadata(&written).await {
                record_transfer_bytes("download", meta.len());
            }
            info!(url = %url, dest = %written.display(), "Download complete");
            Ok(TransferEvent::Downloaded(written))
        }
    }
}

async fn enqueue_if_queuable(
    jobs: &JobStore,
    trigger: &dyn RedeliveryTrigger,
    req: &TransferRequest,
    direction: Direction,
    failure: &AccessError,
) {
    if !req.queuable() || !matches!(failure, AccessError::Transport { .. }) {
        return;
    }
    let job = match QueuedJob::transfer(req, direction) {
        Ok(job) => job,
        Err(e) => {
            error!(error = %e, "Failed to encode transfer for redelivery");
            return;
        }
    };
    match jobs.enqueue(&job).await {
        Ok(()) => {
            record_enqueued(job.kind.as_str());
            trigger.schedule_redelivery(&job, job.next_eligible_at);
            info!(job_id = %job.id, kind = %job.kind, error = %failure, "Transfer queued for redelivery");
        }
        Err(e) => error!(error = %e, "Failed to queue transfer for redelivery"),
    }
}

impl AccessEngine {
    /// Upload or download `req.file()`. Yields progress events, then
    /// [`TransferEvent::Uploaded`] or [`TransferEvent::Downloaded`].
    #[tracing::instrument(skip(self, req), fields(type_key = %req.type_key(), file = %req.file().display()))]
    pub fn transfer(&self, req: TransferRequest, direction: Direction) -> ResultStream<TransferEvent> {
        let shared = match self.shared() {
            Ok(shared) => shared,
            Err(e) => return ResultStream::ready(Err(e)),
        };
        let jobs = self.jobs.clone();
        let trigger = Arc::clone(&self.trigger);

        self.schedulers.spawn_stream(false, move |emitter: Emitter<TransferEvent>| async move {
            let emitter = Arc::new(emitter);
            let progress_emitter = Arc::clone(&emitter);
            let progress = move |transferred: u64, total: Option<u64>| {
                progress_emitter.try_emit(Ok(TransferEvent::Progress { transferred, total }));
            };

            let result = execute_transfer(&shared, &req, direction, &progress).await;
            if let Err(e) = &result {
                warn!(?direction, error = %e, "Transfer failed");
                if let Some(jobs) = &jobs {
                    enqueue_if_queuable(jobs, trigger.as_ref(), &req, direction, e).await;
                }
            }
            emitter.emit(result).await;
        })
    }

    pub fn upload(&self, req: TransferRequest) -> ResultStream<TransferEvent> {
        self.transfer(req, Direction::Upload)
    }

    pub fn download(&self, req: TransferRequest) -> ResultStream<TransferEvent> {
        self.transfer(req, Direction::Download)
    }
}
