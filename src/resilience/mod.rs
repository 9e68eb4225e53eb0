// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry backoff and the durable redelivery queue.

pub mod retry;
pub mod job;
pub mod job_store;
pub mod scheduler;

pub use retry::RetryConfig;
pub use job::{Constraints, JobKind, JobState, NetworkRequirement, QueuedJob, TransferJob};
pub use job_store::{JobStore, JobStoreStats};
pub use scheduler::{
    DeviceConditions, JobExecutor, LocalTrigger, PassReport, RedeliveryScheduler, RedeliveryTrigger,
    SharedConditions,
};
