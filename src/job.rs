//! Job identity and per-job state

use std::fmt::{self, Display};

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::event::FailureKind;

/// Stable identifier of one logical download.
///
/// Derived from the resource's identity rather than from process state, so a restarted
/// process refers to the same job with the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the id from a resource identity, typically its URL.
    pub fn from_resource(identity: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(identity.as_bytes());
        let hash = hasher.finalize();

        let mut hex = String::with_capacity(16);
        for b in &hash.as_bytes()[..8] {
            hex.push_str(&format!("{:02x}", b));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Playing,
    Paused,
    Cancelled,
    Finished,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Finished)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Playing) => true,
            (Playing, Paused) | (Paused, Playing) => true,
            (Playing, Finished) => true,
            (Queued | Playing | Paused, Cancelled) => true,
            _ => false,
        }
    }
}

/// Why a job is paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseReason {
    /// A pause command was issued
    User,
    /// The bandwidth policy currently forbids transfers
    Policy,
}

/// Details of the recoverable failed substate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub chunk_index: usize,
    pub last_status: Option<u16>,
    pub message: String,
}

/// Mutable status record of one job
#[derive(Debug, Clone)]
pub struct JobState {
    pub status: JobStatus,
    pub pause_reason: Option<PauseReason>,
    pub total_bytes: u64,
    pub bytes_downloaded: u64,
    pub speed: u64,
    pub eta_seconds: i64,
    pub current_chunk_index: usize,
    pub failure: Option<JobFailure>,
    /// Whether a pipeline task currently drives this job
    pub(crate) pipeline_active: bool,
}

impl JobState {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            status: JobStatus::Queued,
            pause_reason: None,
            total_bytes,
            bytes_downloaded: 0,
            speed: 0,
            eta_seconds: -1,
            current_chunk_index: 0,
            failure: None,
            pipeline_active: false,
        }
    }

    /// Moves to `next` if the state machine allows it; returns whether it moved.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if self.status == next {
            return true;
        }
        if !self.status.can_transition_to(next) {
            trace!(from = ?self.status, to = ?next, "Rejected job state transition");
            return false;
        }
        self.status = next;
        if next != JobStatus::Paused {
            self.pause_reason = None;
        }
        true
    }

    pub fn progress_percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        let percent = (self.bytes_downloaded.min(self.total_bytes) as u128 * 100)
            / self.total_bytes as u128;
        percent as u8
    }

    pub fn snapshot(&self, job_id: &JobId) -> JobSnapshot {
        JobSnapshot {
            job_id: job_id.clone(),
            status: self.status,
            pause_reason: self.pause_reason,
            total_bytes: self.total_bytes,
            bytes_downloaded: self.bytes_downloaded,
            progress_percent: self.progress_percent(),
            speed: self.speed,
            eta_seconds: self.eta_seconds,
            current_chunk_index: self.current_chunk_index,
            failure: self.failure.clone(),
        }
    }
}

/// Read-only copy of a job's state handed to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub pause_reason: Option<PauseReason>,
    pub total_bytes: u64,
    pub bytes_downloaded: u64,
    pub progress_percent: u8,
    pub speed: u64,
    pub eta_seconds: i64,
    pub current_chunk_index: usize,
    pub failure: Option<JobFailure>,
}

impl JobSnapshot {
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}
