// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write paths.
//!
//! Every mutation goes to the cloud tier; the cloud tier mirrors the
//! response into disk (`persist`) and memory (`cache`) once the remote call
//! succeeds. `delete_all` is the exception: it clears the disk tier only.
//!
//! Writes are detached from the caller's stream. When a queuable request
//! fails on the transport it is parked in the job store before the error
//! is reported, exactly one job per failure. Whether a redelivery attempt
//! is worth repeating is the scheduler's call.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{AccessEngine, ResultStream, Shared};
use crate::error::{AccessError, Result};
use crate::item::{ItemId, TypeKey};
use crate::metrics::{record_enqueued, record_operation, LatencyTimer};
use crate::registry::{convert, convert_all, Shape};
use crate::request::{Method, MutationRequest, Payload};
use crate::resilience::{JobStore, QueuedJob, RedeliveryTrigger};
use crate::storage::cloud::to_wire;
use crate::storage::{Target, WriteMode};

fn mode_for(method: Method) -> Option<WriteMode> {
    match method {
        Method::Post => Some(WriteMode::Create),
        Method::Put => Some(WriteMode::Update),
        Method::Patch => Some(WriteMode::Patch),
        Method::Delete => None,
    }
}

fn mutation_target(shared: &Shared, req: &MutationRequest) -> Result<Target> {
    let plan = shared.plan(req.type_key(), req.cache(), req.persist())?;
    let id_field = req.id_field_or(&shared.config.default_id_field);
    shared.target(req.type_key(), req.path(), id_field, &plan)
}

/// Run `req` against the cloud tier and return the domain-shaped result.
///
/// Deletes yield the deleted ids as a JSON array. No queueing happens here;
/// this is also what redelivery re-runs.
pub(crate) async fn execute_mutation(shared: &Shared, req: &MutationRequest) -> Result<Value> {
    let target = mutation_target(shared, req)?;
    let cloud = &shared.backends.cloud;

    let Some(mode) = mode_for(req.method()) else {
        let ids = req.ids()?;
        let _timer = LatencyTimer::new("cloud", "delete");
        let result = cloud.delete_many(&target, &ids).await;
        record_operation("cloud", "delete", if result.is_ok() { "success" } else { "error" });
        result?;
        debug!(type_key = %target.type_key, count = ids.len(), "Deleted remotely");
        return Ok(Value::Array(ids.iter().map(ItemId::to_value).collect()));
    };

    let _timer = LatencyTimer::new("cloud", "write");
    let result = match req.payload() {
        Payload::Single(value) => {
            let wire = to_wire(&target, value.clone())?;
            let stored = cloud.write_one(&target, &wire, mode).await;
            stored.and_then(|v| convert(target.mapper.as_ref(), v, Shape::Wire, Shape::Domain))
        }
        Payload::Batch(values) => {
            let wire = convert_all(target.mapper.as_ref(), values.clone(), Shape::Domain, Shape::Wire)?;
            let stored = cloud.write_many(&target, &wire, mode).await;
            stored
                .and_then(|v| convert_all(target.mapper.as_ref(), v, Shape::Wire, Shape::Domain))
                .map(Value::Array)
        }
    };
    record_operation("cloud", "write", if result.is_ok() { "success" } else { "error" });
    result
}

/// Park a mutation that failed on the transport, if it is queuable.
async fn enqueue_if_queuable(
    jobs: &JobStore,
    trigger: &dyn RedeliveryTrigger,
    req: &MutationRequest,
    failure: &AccessError,
) {
    if !req.queuable() || !matches!(failure, AccessError::Transport { .. }) {
        return;
    }
    let job = match QueuedJob::mutation(req) {
        Ok(job) => job,
        Err(e) => {
            error!(error = %e, "Failed to encode mutation for redelivery");
            return;
        }
    };
    match jobs.enqueue(&job).await {
        Ok(()) => {
            record_enqueued(job.kind.as_str());
            trigger.schedule_redelivery(&job, job.next_eligible_at);
            info!(
                job_id = %job.id,
                method = %req.method(),
                type_key = %req.type_key(),
                error = %failure,
                "Mutation queued for redelivery"
            );
        }
        Err(e) => error!(error = %e, "Failed to queue mutation for redelivery"),
    }
}

impl AccessEngine {
    /// Dispatch a checked mutation onto the background runtime.
    fn spawn_mutation(&self, req: MutationRequest) -> ResultStream<Value> {
        let shared = match self.shared() {
            Ok(shared) => shared,
            Err(e) => return ResultStream::ready(Err(e)),
        };
        let jobs = self.jobs.clone();
        let trigger = Arc::clone(&self.trigger);

        self.schedulers.spawn_once(false, async move {
            let result = execute_mutation(&shared, &req).await;
            if let Err(e) = &result {
                warn!(method = %req.method(), type_key = %req.type_key(), error = %e, "Mutation failed");
                if let Some(jobs) = &jobs {
                    enqueue_if_queuable(jobs, trigger.as_ref(), &req, e).await;
                }
            }
            result
        })
    }

    fn expect_shape(req: MutationRequest, method: Method, batch: bool) -> Result<MutationRequest> {
        if req.method() != method {
            return Err(AccessError::Configuration(format!(
                "{} request passed to a {method} operation",
                req.method()
            )));
        }
        if matches!(req.payload(), Payload::Batch(_)) != batch {
            let wanted = if batch { "a batch" } else { "a single object" };
            return Err(AccessError::Configuration(format!("{method} operation takes {wanted}")));
        }
        Ok(req)
    }

    fn checked(&self, req: MutationRequest, method: Method, batch: bool) -> ResultStream<Value> {
        match Self::expect_shape(req, method, batch) {
            Ok(req) => self.spawn_mutation(req),
            Err(e) => ResultStream::ready(Err(e)),
        }
    }

    #[tracing::instrument(skip(self, req), fields(type_key = %req.type_key()))]
    pub fn post_object(&self, req: MutationRequest) -> ResultStream<Value> {
        self.checked(req, Method::Post, false)
    }

    /// Yields the created items as a JSON array.
    #[tracing::instrument(skip(self, req), fields(type_key = %req.type_key()))]
    pub fn post_list(&self, req: MutationRequest) -> ResultStream<Value> {
        self.checked(req, Method::Post, true)
    }

    #[tracing::instrument(skip(self, req), fields(type_key = %req.type_key()))]
    pub fn put_object(&self, req: MutationRequest) -> ResultStream<Value> {
        self.checked(req, Method::Put, false)
    }

    #[tracing::instrument(skip(self, req), fields(type_key = %req.type_key()))]
    pub fn put_list(&self, req: MutationRequest) -> ResultStream<Value> {
        self.checked(req, Method::Put, true)
    }

    #[tracing::instrument(skip(self, req), fields(type_key = %req.type_key()))]
    pub fn patch_object(&self, req: MutationRequest) -> ResultStream<Value> {
        self.checked(req, Method::Patch, false)
    }

    /// Delete one id. Same as [`delete_collection_by_ids`](Self::delete_collection_by_ids)
    /// with a one-element batch.
    #[tracing::instrument(skip(self, req), fields(type_key = %req.type_key()))]
    pub fn delete_item_by_id(&self, req: MutationRequest) -> ResultStream<Value> {
        let req = match Self::expect_shape(req, Method::Delete, false) {
            Ok(req) => req,
            Err(e) => return ResultStream::ready(Err(e)),
        };
        match req.ids() {
            Ok(ids) => self.delete_collection_by_ids(req.with_batch_ids(&ids)),
            Err(e) => ResultStream::ready(Err(e)),
        }
    }

    /// Delete remotely, then from every local mirror. Yields the ids.
    #[tracing::instrument(skip(self, req), fields(type_key = %req.type_key()))]
    pub fn delete_collection_by_ids(&self, req: MutationRequest) -> ResultStream<Value> {
        self.checked(req, Method::Delete, true)
    }

    /// Clear the disk tier for `type_key`. Yields `false` when there is no
    /// disk tier to clear.
    #[tracing::instrument(skip(self))]
    pub fn delete_all(&self, type_key: &str) -> ResultStream<bool> {
        let shared = match self.shared() {
            Ok(shared) => shared,
            Err(e) => return ResultStream::ready(Err(e)),
        };
        let type_key = TypeKey::from(type_key);
        if let Err(e) = shared.registry.require(&type_key) {
            return ResultStream::ready(Err(e));
        }

        self.schedulers.spawn_once(false, async move {
            match &shared.backends.disk {
                Some(disk) if shared.config.disk_enabled => {
                    let cleared = disk.clear(&type_key).await;
                    record_operation("disk", "clear", if cleared.is_ok() { "success" } else { "error" });
                    cleared
                }
                _ => Ok(false),
            }
        })
    }

    /// Dispatch on method and payload shape.
    pub fn mutate(&self, req: MutationRequest) -> ResultStream<Value> {
        let batch = matches!(req.payload(), Payload::Batch(_));
        match (req.method(), batch) {
            (Method::Post, false) => self.post_object(req),
            (Method::Post, true) => self.post_list(req),
            (Method::Put, false) => self.put_object(req),
            (Method::Put, true) => self.put_list(req),
            (Method::Patch, _) => self.patch_object(req),
            (Method::Delete, false) => self.delete_item_by_id(req),
            (Method::Delete, true) => self.delete_collection_by_ids(req),
        }
    }
}
