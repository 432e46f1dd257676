//! Events pushed to observers of the orchestrator

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::job::{JobFailure, JobId, PauseReason};

/// Coarse classification of a job failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Retries exhausted on network errors
    Network,
    /// The server kept answering with errors or wrong ranges
    Server,
    /// The partial file could not be created, written or renamed
    Storage,
    /// The resource could not be planned (bad URL, unknown size, too many chunks)
    Planning,
    Internal,
}

/// Notification emitted by the orchestrator.
///
/// For a given job, `Progress` events are ordered by non-decreasing
/// `bytes_downloaded` and nothing follows `Completed` or `Cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadEvent {
    Progress {
        job_id: JobId,
        bytes_downloaded: u64,
        percent: u8,
        eta_seconds: i64,
    },
    Paused {
        job_id: JobId,
        reason: PauseReason,
    },
    Resumed {
        job_id: JobId,
    },
    Completed {
        job_id: JobId,
        final_path: PathBuf,
        files: Vec<PathBuf>,
    },
    Cancelled {
        job_id: JobId,
    },
    Failed {
        job_id: JobId,
        failure: JobFailure,
    },
}

impl DownloadEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Progress { job_id, .. }
            | Self::Paused { job_id, .. }
            | Self::Resumed { job_id }
            | Self::Completed { job_id, .. }
            | Self::Cancelled { job_id }
            | Self::Failed { job_id, .. } => job_id,
        }
    }

    /// True for the events after which the job emits nothing more.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Cancelled { .. })
    }
}
