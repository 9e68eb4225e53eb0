// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redelivery jobs.
//!
//! A job is a failed request serialized as-is, plus the conditions under
//! which it may run again.
//!
//! ```text
//!  enqueue ──► Queued ──claim──► Executing ──┬─► Succeeded (row deleted)
//!                ▲                           ├─► FailedRetryable ──► Queued (attempt+1, backoff)
//!                └──── restart recovery ◄────┘   FailedTerminal (row deleted, logged)
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AccessError, Result};
use crate::item::now_millis;
use crate::request::{Direction, MutationRequest, TransferRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Mutation,
    Upload,
    Download,
}

impl JobKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mutation => "mutation",
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mutation" => Ok(Self::Mutation),
            "upload" => Ok(Self::Upload),
            "download" => Ok(Self::Download),
            other => Err(AccessError::Storage(format!("unknown job kind '{other}'"))),
        }
    }
}

/// Persisted job states. `Succeeded` and terminal failures are not stored:
/// the row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Executing,
}

impl JobState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Executing => "executing",
        }
    }
}

impl FromStr for JobState {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "executing" => Ok(Self::Executing),
            other => Err(AccessError::Storage(format!("unknown job state '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkRequirement {
    #[default]
    Any,
    Unmetered,
}

/// Conditions that must hold before a job may run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    pub network: NetworkRequirement,
    #[serde(default)]
    pub charging: bool,
}

impl Constraints {
    /// Mutations only need some network.
    #[must_use]
    pub fn for_mutation() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn for_transfer(request: &TransferRequest) -> Self {
        Self {
            network: if request.on_wifi_only() {
                NetworkRequirement::Unmetered
            } else {
                NetworkRequirement::Any
            },
            charging: request.while_charging(),
        }
    }
}

/// Body of a transfer job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferJob {
    pub direction: Direction,
    pub request: TransferRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub id: String,
    pub kind: JobKind,
    /// Serialized request (JSON)
    pub payload: Vec<u8>,
    pub constraints: Constraints,
    pub created_at: i64,
    pub attempt_count: u32,
    pub state: JobState,
    pub next_eligible_at: i64,
}

impl QueuedJob {
    fn new(kind: JobKind, payload: Vec<u8>, constraints: Constraints) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            payload,
            constraints,
            created_at: now,
            attempt_count: 0,
            state: JobState::Queued,
            next_eligible_at: now,
        }
    }

    pub fn mutation(request: &MutationRequest) -> Result<Self> {
        Ok(Self::new(
            JobKind::Mutation,
            serde_json::to_vec(request)?,
            Constraints::for_mutation(),
        ))
    }

    pub fn transfer(request: &TransferRequest, direction: Direction) -> Result<Self> {
        let kind = match direction {
            Direction::Upload => JobKind::Upload,
            Direction::Download => JobKind::Download,
        };
        let body = TransferJob {
            direction,
            request: request.clone(),
        };
        Ok(Self::new(kind, serde_json::to_vec(&body)?, Constraints::for_transfer(request)))
    }

    /// Decode a mutation job's request.
    pub fn mutation_request(&self) -> Result<MutationRequest> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Decode a transfer job's request.
    pub fn transfer_job(&self) -> Result<TransferJob> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}
