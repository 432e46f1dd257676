use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::bookkeeping::{Bookkeeper, DownloadRecord};
use crate::chunk::Chunk;
use crate::config::DownloadConfig;
use crate::control::JobHandle;
use crate::error::DoveError;
use crate::event::DownloadEvent;
use crate::fetcher::{ChunkFetcher, FetchOutcome};
use crate::http::HttpClient;
use crate::job::{JobFailure, JobId, JobStatus};
use crate::policy::BandwidthPolicy;
use crate::storage::StorageManager;

/// Registry of the jobs that have not reached a terminal state
pub(crate) type JobMap = Arc<Mutex<HashMap<JobId, Arc<JobHandle>>>>;

/// Collaborators shared by every job pipeline of one orchestrator
pub(crate) struct TaskContext {
    pub config: Arc<DownloadConfig>,
    pub http: HttpClient,
    pub storage: StorageManager,
    pub policy: Arc<dyn BandwidthPolicy>,
    pub bookkeeper: Arc<dyn Bookkeeper>,
    pub events: broadcast::Sender<DownloadEvent>,
    pub jobs: JobMap,
}

impl TaskContext {
    pub fn emit(&self, event: DownloadEvent) {
        if self.events.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    fn record(&self, job: &JobHandle, chunks: &[Chunk]) -> DownloadRecord {
        let files: Vec<PathBuf> = chunks.iter().map(|c| self.storage.final_path(c)).collect();
        DownloadRecord {
            job_id: job.id.clone(),
            url: job.url.clone(),
            title: job.title.clone(),
            total_bytes: chunks.first().map(|c| c.total_content_length).unwrap_or(0),
            final_path: files.first().cloned().unwrap_or_default(),
            files,
        }
    }

    /// Tells the bookkeeper where the download will land once its first bytes are on disk.
    pub async fn report_started(&self, job: &JobHandle) {
        let chunks = job.chunks().await;
        let record = self.record(job, &chunks);
        debug!(job_id = %job.id, path = %record.final_path.display(), "Download started");
        self.bookkeeper.download_started(&record);
    }

    /// Removes `job` from the registry unless another job took its id meanwhile.
    async fn reap(&self, job: &Arc<JobHandle>) {
        let mut jobs = self.jobs.lock().await;
        if jobs.get(&job.id).is_some_and(|j| Arc::ptr_eq(j, job)) {
            jobs.remove(&job.id);
            trace!(job_id = %job.id, "Job removed from registry");
        }
    }
}

/// Why a job pipeline stopped without finishing
enum Stop {
    Cancelled,
    Interrupted,
    Failed { chunk_index: usize, error: DoveError },
}

/// Drives one job: its chunks strictly in order, then finalization.
///
/// Exactly one of Completed, Cancelled or Failed is emitted when the run ends,
/// unless the orchestrator is shutting down, in which case the job goes quiet and
/// its files stay for a later resume.
pub(crate) async fn run_job(ctx: Arc<TaskContext>, job: Arc<JobHandle>) {
    info!(job_id = %job.id, url = %job.url, "Job pipeline started");

    let stop = match download_chunks(&ctx, &job).await {
        Ok(()) => match finish(&ctx, &job).await {
            Ok(()) => return,
            Err(stop) => stop,
        },
        Err(stop) => stop,
    };

    match stop {
        Stop::Cancelled => discard_cancelled(&ctx, &job).await,
        Stop::Interrupted => interrupt(&ctx, &job).await,
        Stop::Failed { chunk_index, error } => fail(&ctx, &job, chunk_index, error).await,
    }
}

async fn download_chunks(ctx: &Arc<TaskContext>, job: &Arc<JobHandle>) -> Result<(), Stop> {
    let chunks = job.chunks().await;
    let total = chunks.first().map(|c| c.total_content_length).unwrap_or(0);
    let mut fetcher: Option<ChunkFetcher> = None;

    for chunk in &chunks {
        if job.cancel_token().is_cancelled() {
            return Err(stop_reason(job).await);
        }

        if chunk.downloaded || ctx.storage.is_chunk_complete(chunk).await {
            debug!(job_id = %job.id, chunk_index = chunk.index, "Chunk already complete, skipping");
            job.mark_downloaded(chunk.index).await;
            job.update(|state| {
                state.bytes_downloaded = chunk.end_byte + 1;
                state.current_chunk_index = chunk.index;
            })
            .await;
            continue;
        }

        let failed = |error: DoveError| Stop::Failed {
            chunk_index: chunk.index,
            error,
        };

        let offset = ctx.storage.resume_offset(chunk).await.map_err(failed)?;
        let bytes_now = chunk.start_byte + offset.min(chunk.size());
        job.update(|state| {
            state.bytes_downloaded = bytes_now;
            state.current_chunk_index = chunk.index;
        })
        .await;

        debug!(
            job_id = %job.id,
            chunk_index = chunk.index,
            offset,
            "Fetching chunk"
        );
        let fetcher = fetcher.get_or_insert_with(|| {
            ChunkFetcher::new(ctx.clone(), job.clone(), total, bytes_now)
        });
        match fetcher.fetch(chunk, offset).await.map_err(failed)? {
            FetchOutcome::Completed => {}
            FetchOutcome::Cancelled => return Err(Stop::Cancelled),
            FetchOutcome::Interrupted => return Err(Stop::Interrupted),
        }

        ctx.storage.complete_chunk(chunk).await.map_err(failed)?;
        job.mark_downloaded(chunk.index).await;
    }

    Ok(())
}

async fn stop_reason(job: &JobHandle) -> Stop {
    if job.status().await == JobStatus::Cancelled {
        Stop::Cancelled
    } else {
        Stop::Interrupted
    }
}

async fn finish(ctx: &Arc<TaskContext>, job: &Arc<JobHandle>) -> Result<(), Stop> {
    let chunks = job.chunks().await;
    let last_index = chunks.len().saturating_sub(1);
    let files = ctx.storage.finalize(&chunks).await.map_err(|error| Stop::Failed {
        chunk_index: last_index,
        error,
    })?;

    let finished = job
        .with_state(|state| {
            if state.status == JobStatus::Cancelled {
                return false;
            }
            // a pause that arrives after the last byte has nothing left to hold
            if state.status == JobStatus::Paused {
                state.transition(JobStatus::Playing);
            }
            if !state.transition(JobStatus::Finished) {
                return false;
            }
            state.bytes_downloaded = state.total_bytes;
            state.eta_seconds = 0;
            state.failure = None;
            state.pipeline_active = false;
            true
        })
        .await;
    if !finished {
        return Err(Stop::Cancelled);
    }

    if let Err(e) = ctx.storage.remove_manifest(&job.id).await {
        warn!(error = %e, job_id = %job.id, "Failed to remove job manifest");
    }

    let record = ctx.record(job, &chunks);
    ctx.bookkeeper.download_completed(&record);

    info!(
        job_id = %job.id,
        path = %record.final_path.display(),
        files = files.len(),
        "Download completed"
    );
    ctx.emit(DownloadEvent::Completed {
        job_id: job.id.clone(),
        final_path: record.final_path,
        files,
    });
    ctx.reap(job).await;
    Ok(())
}

/// Deletes every artifact of a cancelled job, then reports the cancellation.
pub(crate) async fn discard_cancelled(ctx: &TaskContext, job: &Arc<JobHandle>) {
    let chunks = job.chunks().await;
    if let Err(e) = ctx.storage.delete_job_files(&chunks).await {
        error!(error = %e, job_id = %job.id, "Failed to delete files of cancelled job");
    }
    if let Err(e) = ctx.storage.remove_manifest(&job.id).await {
        error!(error = %e, job_id = %job.id, "Failed to remove manifest of cancelled job");
    }

    job.with_state(|state| {
        state.transition(JobStatus::Cancelled);
        state.eta_seconds = -1;
        state.pipeline_active = false;
    })
    .await;

    info!(job_id = %job.id, "Download cancelled");
    ctx.emit(DownloadEvent::Cancelled {
        job_id: job.id.clone(),
    });
    ctx.reap(job).await;
}

async fn interrupt(ctx: &TaskContext, job: &Arc<JobHandle>) {
    let cancelled = job
        .with_state(|state| {
            if state.status == JobStatus::Cancelled {
                return true;
            }
            state.pipeline_active = false;
            false
        })
        .await;
    if cancelled {
        return discard_cancelled(ctx, job).await;
    }

    info!(job_id = %job.id, "Job interrupted, partial files kept");
    ctx.reap(job).await;
}

async fn fail(ctx: &TaskContext, job: &Arc<JobHandle>, chunk_index: usize, error: DoveError) {
    let failure = JobFailure {
        kind: error.failure_kind(),
        chunk_index,
        last_status: error.status(),
        message: error.to_string(),
    };

    let outcome = job
        .with_state(|state| {
            if state.status == JobStatus::Cancelled {
                return Some(Stop::Cancelled);
            }
            if job.cancel_token().is_cancelled() {
                state.pipeline_active = false;
                return Some(Stop::Interrupted);
            }
            state.failure = Some(failure.clone());
            state.eta_seconds = -1;
            state.speed = 0;
            state.pipeline_active = false;
            // a cancel waiting on this lock emits Cancelled after Failed
            error!(
                error = %error,
                job_id = %job.id,
                chunk_index,
                "Download failed"
            );
            ctx.emit(DownloadEvent::Failed {
                job_id: job.id.clone(),
                failure,
            });
            None
        })
        .await;

    match outcome {
        Some(Stop::Cancelled) => discard_cancelled(ctx, job).await,
        Some(_) => {
            info!(job_id = %job.id, "Job interrupted while failing, partial files kept");
            ctx.reap(job).await;
        }
        None => {}
    }
}
