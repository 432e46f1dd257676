//! Hooks towards the external record store of downloaded archives

use std::path::PathBuf;

use url::Url;

use crate::job::JobId;

/// What the engine knows about a download when it reports it to the bookkeeper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub job_id: JobId,
    pub url: Url,
    pub title: String,
    pub total_bytes: u64,
    /// Path of the first chunk file once it carries its final name
    pub final_path: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Receives download bookkeeping notifications.
///
/// The engine never reads the store behind this trait.
pub trait Bookkeeper: Send + Sync {
    /// The first chunk committed its first bytes, so `final_path` is now certain.
    fn download_started(&self, _record: &DownloadRecord) {}

    /// Called exactly once per job, right before the `Completed` event.
    fn download_completed(&self, _record: &DownloadRecord) {}
}

/// Bookkeeper that ignores every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBookkeeping;

impl Bookkeeper for NoBookkeeping {}
