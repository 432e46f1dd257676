//! Public entry point of the engine
//!
//! The orchestrator keeps the registry of live jobs, turns start/pause/resume/cancel
//! commands into per-job signals and runs one pipeline task per job.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::bookkeeping::Bookkeeper;
use crate::chunk::ChunkPlanner;
use crate::config::DownloadConfig;
use crate::control::{Command, JobHandle};
use crate::error::{DoveError, DoveResult};
use crate::event::DownloadEvent;
use crate::http::HttpClient;
use crate::job::{JobId, JobSnapshot, JobStatus, PauseReason};
use crate::policy::BandwidthPolicy;
use crate::storage::{JobManifest, StorageManager};
use crate::task_manager::{discard_cancelled, run_job, TaskContext};
use crate::utils::{extract_filename, validate_url};

/// Request to download one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub job_id: JobId,
    pub url: String,
    pub title: String,
    /// Known length of the resource; when absent or zero it is probed with HEAD
    pub expected_size: Option<u64>,
}

impl StartRequest {
    /// Builds a request whose id is derived from the URL and whose title is its file name.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let title = validate_url(&url)
            .ok()
            .and_then(|u| extract_filename(&u))
            .unwrap_or_else(|| url.clone());
        Self {
            job_id: JobId::from_resource(&url),
            url,
            title,
            expected_size: None,
        }
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }
}

/// Owns all download jobs of one storage root.
///
/// Jobs run concurrently, each in its own task; the chunks of one job are fetched
/// strictly in order. Observers follow jobs through [`subscribe`](Self::subscribe)
/// or poll them with [`progress`](Self::progress).
pub struct DownloadOrchestrator {
    ctx: Arc<TaskContext>,
    planner: ChunkPlanner,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl DownloadOrchestrator {
    /// Creates an orchestrator storing its files below `storage_root`
    pub fn new<P: AsRef<Path>>(
        config: DownloadConfig,
        storage_root: P,
        policy: Arc<dyn BandwidthPolicy>,
        bookkeeper: Arc<dyn Bookkeeper>,
    ) -> DoveResult<Self> {
        let config = Arc::new(config);
        let storage = StorageManager::new(storage_root)?;
        let http = HttpClient::new(config.clone())?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let planner = ChunkPlanner::from_config(&config);

        info!(
            root = %storage.root().display(),
            max_chunk_size = config.max_chunk_size,
            "Download orchestrator ready"
        );

        Ok(Self {
            ctx: Arc::new(TaskContext {
                config,
                http,
                storage,
                policy,
                bookkeeper,
                events,
                jobs: Arc::new(Mutex::new(HashMap::new())),
            }),
            planner,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Starts (or restarts) the download described by `request`.
    ///
    /// Starting a job that is already running is a no-op. Starting a job that failed
    /// relaunches it from the bytes already on disk.
    pub async fn start(&self, request: StartRequest) -> DoveResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(DoveError::ShutDown);
        }

        if let Some(job) = self.find(&request.job_id).await {
            return self.relaunch(job).await;
        }

        let url = validate_url(&request.url)?;
        let total_size = match request.expected_size.filter(|size| *size > 0) {
            Some(size) => size,
            None => {
                let info = self.ctx.http.get_file_info(&url).await?;
                if !info.supports_range {
                    warn!(url = %url, "Server does not advertise range support, resuming may fail");
                }
                debug!(etag = ?info.etag, last_modified = ?info.last_modified, "Probed resource");
                info.total_size
            }
        };
        let chunks = self.planner.plan(&url, total_size, &request.job_id)?;
        debug!(
            job_id = %request.job_id,
            total_size,
            chunks = chunks.len(),
            "Planned download"
        );

        let manifest = JobManifest::new(&request.job_id, &request.title, &chunks);
        let storage = &self.ctx.storage;
        match storage.load_manifest(&request.job_id).await {
            Ok(Some(existing)) if !existing.matches(&manifest) => {
                warn!(
                    job_id = %request.job_id,
                    "Resource changed since the last attempt, discarding partial files"
                );
                storage.delete_manifest_files(&existing).await?;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, job_id = %request.job_id, "Replacing unreadable manifest"),
        }

        let on_disk = storage.bytes_on_disk(&chunks).await?;
        if self.ctx.config.check_disk_space {
            storage.check_disk_space(total_size.saturating_sub(on_disk))?;
        }
        storage.save_manifest(&manifest).await?;

        let job = Arc::new(JobHandle::new(
            request.job_id.clone(),
            url,
            request.title,
            chunks,
            self.shutdown.child_token(),
        ));
        job.with_state(|state| {
            state.bytes_downloaded = on_disk;
            state.transition(JobStatus::Playing);
            state.pipeline_active = true;
        })
        .await;

        {
            let mut jobs = self.ctx.jobs.lock().await;
            if jobs.contains_key(&job.id) {
                debug!(job_id = %job.id, "Job was started concurrently, ignoring duplicate");
                return Ok(());
            }
            jobs.insert(job.id.clone(), job.clone());
        }

        info!(job_id = %job.id, url = %job.url, total_size, on_disk, "Starting download");
        self.tracker.spawn(run_job(self.ctx.clone(), job));
        Ok(())
    }

    async fn relaunch(&self, job: Arc<JobHandle>) -> DoveResult<()> {
        let relaunch = job
            .with_state(|state| {
                if state.pipeline_active || state.status.is_terminal() {
                    return false;
                }
                state.failure = None;
                state.transition(JobStatus::Playing);
                state.pipeline_active = true;
                true
            })
            .await;

        if !relaunch {
            debug!(job_id = %job.id, "Job already running, ignoring start");
            return Ok(());
        }

        info!(job_id = %job.id, "Restarting failed download");
        job.request(Command::Run);
        self.tracker.spawn(run_job(self.ctx.clone(), job));
        Ok(())
    }

    /// Pauses the transfer of one job; other jobs are unaffected.
    pub async fn pause(&self, job_id: &JobId) -> DoveResult<()> {
        let job = self.get(job_id).await?;
        job.request(Command::Pause);
        job.mark_paused(PauseReason::User).await;
        info!(job_id = %job_id, "Pause requested");
        Ok(())
    }

    /// Resumes a paused job.
    ///
    /// While the bandwidth policy forbids transfers the job stays paused, now for
    /// policy reasons, and continues by itself once the policy allows it.
    pub async fn resume(&self, job_id: &JobId) -> DoveResult<()> {
        let job = self.get(job_id).await?;
        job.request(Command::Run);

        if self.ctx.policy.is_transfer_allowed() {
            job.mark_playing().await;
        } else {
            job.update(|state| {
                if state.status == JobStatus::Paused {
                    state.pause_reason = Some(PauseReason::Policy);
                }
            })
            .await;
        }
        info!(job_id = %job_id, "Resume requested");
        Ok(())
    }

    /// Cancels a job and deletes everything it wrote.
    pub async fn cancel(&self, job_id: &JobId) -> DoveResult<()> {
        let job = self.get(job_id).await?;

        let (cancelled, pipeline_active) = job
            .with_state(|state| (state.transition(JobStatus::Cancelled), state.pipeline_active))
            .await;
        if !cancelled {
            debug!(job_id = %job_id, "Job already finished, ignoring cancel");
            return Ok(());
        }

        info!(job_id = %job_id, "Cancelling download");
        job.cancel_token().cancel();

        // a running pipeline cleans up after its fetch stopped
        if !pipeline_active {
            discard_cancelled(&self.ctx, &job).await;
        }
        Ok(())
    }

    /// Current state of a job, if it is still registered
    pub async fn progress(&self, job_id: &JobId) -> Option<JobSnapshot> {
        match self.find(job_id).await {
            Some(job) => Some(job.snapshot().await),
            None => None,
        }
    }

    /// States of every registered job, ordered by id
    pub async fn jobs(&self) -> Vec<JobSnapshot> {
        let jobs: Vec<Arc<JobHandle>> = self.ctx.jobs.lock().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(jobs.len());
        for job in jobs {
            snapshots.push(job.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        snapshots
    }

    /// Subscribes to the events of every job
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.ctx.events.subscribe()
    }

    /// Interrupted downloads found on disk that are not currently registered
    pub async fn pending_downloads(&self) -> DoveResult<Vec<JobManifest>> {
        let manifests = self.ctx.storage.list_manifests().await?;
        let jobs = self.ctx.jobs.lock().await;
        Ok(manifests
            .into_iter()
            .filter(|m| !jobs.contains_key(&m.job_id))
            .collect())
    }

    /// Stops every job without deleting its files and waits for the pipelines to exit.
    pub async fn shutdown(&self) {
        info!("Shutting down download orchestrator");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("All job pipelines stopped");
    }

    async fn find(&self, job_id: &JobId) -> Option<Arc<JobHandle>> {
        self.ctx.jobs.lock().await.get(job_id).cloned()
    }

    async fn get(&self, job_id: &JobId) -> DoveResult<Arc<JobHandle>> {
        self.find(job_id)
            .await
            .ok_or_else(|| DoveError::UnknownJob(job_id.to_string()))
    }
}
