//! Streaming transfer of a single chunk into its partial file
//!
//! The fetcher owns everything that happens between "this chunk should be on disk"
//! and "its bytes are on disk": the range request, the retry loop with its linear
//! backoff, slicing the body into read buffers, and honouring pause, bandwidth policy
//! and cancellation between two buffers.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

use crate::chunk::Chunk;
use crate::control::{Command, JobHandle};
use crate::error::{DoveError, DoveResult};
use crate::event::DownloadEvent;
use crate::job::{JobStatus, PauseReason};
use crate::progress::{ProgressTracker, ProgressUpdate};
use crate::task_manager::TaskContext;

/// How a fetch ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Every byte of the chunk is in its partial file
    Completed,
    /// The job was cancelled; its files are to be deleted
    Cancelled,
    /// The orchestrator is shutting down; partial files stay for a later resume
    Interrupted,
}

/// Fetches the chunks of one job, one after another.
///
/// A fetcher lives as long as one run of the job's pipeline so that speed sampling
/// carries over chunk boundaries.
pub(crate) struct ChunkFetcher {
    ctx: Arc<TaskContext>,
    job: Arc<JobHandle>,
    control: watch::Receiver<Command>,
    tracker: ProgressTracker,
}

impl ChunkFetcher {
    pub fn new(ctx: Arc<TaskContext>, job: Arc<JobHandle>, total: u64, bytes_now: u64) -> Self {
        let tracker = ProgressTracker::new(
            total,
            ctx.config.sample_interval,
            bytes_now,
            Instant::now(),
        );
        let control = job.subscribe_control();
        Self {
            ctx,
            job,
            control,
            tracker,
        }
    }

    /// Appends the missing bytes of `chunk` to its partial file, starting at `resume_offset`.
    pub async fn fetch(&mut self, chunk: &Chunk, resume_offset: u64) -> DoveResult<FetchOutcome> {
        let mut written = resume_offset;
        let size = chunk.size();

        if written > size {
            warn!(
                chunk = chunk.display(),
                on_disk = written,
                "Partial file is larger than its chunk, starting over"
            );
            self.ctx.storage.delete_part(chunk).await?;
            written = 0;
            self.tracker.reset(chunk.start_byte, Instant::now());
            self.job
                .update(|state| state.bytes_downloaded = chunk.start_byte)
                .await;
        }
        if written == size {
            debug!(chunk_index = chunk.index, "Partial file already holds the whole chunk");
            return Ok(FetchOutcome::Completed);
        }

        let mut file = self.ctx.storage.open_part(chunk).await?;
        let result = self.transfer(chunk, &mut file, &mut written).await;

        // The file must be complete on disk before the pipeline renames it.
        let flushed = file
            .flush()
            .await
            .map_err(|e| DoveError::storage(self.ctx.storage.part_path(chunk), e));
        match result {
            Ok(outcome) => flushed.map(|_| outcome),
            Err(e) => {
                if let Err(flush_err) = flushed {
                    warn!(error = %flush_err, "Failed to flush partial file after error");
                }
                Err(e)
            }
        }
    }

    async fn transfer(
        &mut self,
        chunk: &Chunk,
        file: &mut File,
        written: &mut u64,
    ) -> DoveResult<FetchOutcome> {
        let max_attempts = self.ctx.config.max_attempts;
        let mut failures = 0u32;
        let mut last_status = None;

        loop {
            if self.job.cancel_token().is_cancelled() {
                return Ok(self.stop_outcome().await);
            }
            if let Some(outcome) = self.hold(chunk.start_byte + *written).await {
                return Ok(outcome);
            }

            debug!(
                job_id = %self.job.id,
                chunk_index = chunk.index,
                offset = *written,
                attempt = failures + 1,
                "Requesting chunk"
            );

            let err = match self.attempt(chunk, file, written).await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {
                    info!(
                        job_id = %self.job.id,
                        chunk_index = chunk.index,
                        "Chunk downloaded successfully"
                    );
                    return Ok(FetchOutcome::Completed);
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => {
                    error!(
                        error = %e,
                        job_id = %self.job.id,
                        chunk_index = chunk.index,
                        "Chunk failed with non-retryable error"
                    );
                    return Err(e);
                }
            };

            failures += 1;
            last_status = err.status().or(last_status);
            if failures >= max_attempts {
                error!(
                    error = %err,
                    job_id = %self.job.id,
                    chunk_index = chunk.index,
                    attempts = failures,
                    "Giving up on chunk"
                );
                return Err(DoveError::RetriesExhausted {
                    chunk_index: chunk.index,
                    attempts: failures,
                    last_status,
                    last_error: err.to_string(),
                });
            }

            let backoff = self.ctx.config.backoff_for(failures);
            warn!(
                error = %err,
                job_id = %self.job.id,
                chunk_index = chunk.index,
                attempt = failures,
                backoff = ?backoff,
                "Chunk transfer failed, retrying after backoff"
            );

            let bytes_now = chunk.start_byte + *written;
            self.publish(self.tracker.unknown_eta(bytes_now)).await;

            tokio::select! {
                biased;
                _ = self.job.cancel_token().cancelled() => return Ok(self.stop_outcome().await),
                _ = tokio::time::sleep(backoff) => {}
            }
            self.tracker.reset(bytes_now, Instant::now());
        }
    }

    /// One request/stream cycle. `Ok(None)` means the chunk is complete.
    async fn attempt(
        &mut self,
        chunk: &Chunk,
        file: &mut File,
        written: &mut u64,
    ) -> DoveResult<Option<FetchOutcome>> {
        let cancel = self.job.cancel_token().clone();

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Some(self.stop_outcome().await)),
            resp = self.ctx.http.open_range(chunk, *written) => resp?,
        };

        let size = chunk.size();
        let buffer_size = self.ctx.config.buffer_size;
        let mut stream = resp.bytes_stream();

        while *written < size {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Some(self.stop_outcome().await)),
                next = stream.next() => next,
            };
            let Some(item) = next else {
                break;
            };
            let mut bytes: Bytes = item?;

            while !bytes.is_empty() && *written < size {
                let mut buffer = bytes.split_to(bytes.len().min(buffer_size));

                if cancel.is_cancelled() {
                    return Ok(Some(self.stop_outcome().await));
                }
                if let Some(outcome) = self.hold(chunk.start_byte + *written).await {
                    return Ok(Some(outcome));
                }

                let remaining = size - *written;
                if buffer.len() as u64 > remaining {
                    trace!(
                        chunk_index = chunk.index,
                        extra = buffer.len() as u64 - remaining,
                        "Dropping bytes past the end of the chunk"
                    );
                    buffer.truncate(remaining as usize);
                }

                file.write_all(&buffer).await.map_err(|e| {
                    error!(error = %e, chunk = chunk.display(), "Failed to write partial file");
                    DoveError::storage(self.ctx.storage.part_path(chunk), e)
                })?;

                let first_commit = *written == 0;
                *written += buffer.len() as u64;
                if first_commit && chunk.index == 0 {
                    self.ctx.report_started(&self.job).await;
                }

                let bytes_now = chunk.start_byte + *written;
                let update = self.tracker.update(bytes_now, Instant::now());
                let current = self.tracker.current(bytes_now);
                self.job
                    .update(|state| {
                        state.bytes_downloaded = bytes_now;
                        state.current_chunk_index = chunk.index;
                        state.speed = current.speed;
                        state.eta_seconds = current.eta_seconds;
                    })
                    .await;
                if let Some(update) = update {
                    self.emit_progress(update);
                }
            }
        }

        if *written < size {
            return Err(DoveError::IoError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "stream ended after {} of {} bytes of chunk {}",
                    written, size, chunk.index
                ),
            )));
        }
        Ok(None)
    }

    /// Blocks while the job is paused or the bandwidth policy forbids transfers.
    ///
    /// Returns the outcome to stop with when the job is cancelled or interrupted
    /// while held, `None` once the transfer may continue.
    async fn hold(&mut self, bytes_now: u64) -> Option<FetchOutcome> {
        let mut held: Option<PauseReason> = None;

        loop {
            let user_paused = *self.control.borrow_and_update() == Command::Pause;
            let allowed = self.ctx.policy.is_transfer_allowed();
            if !user_paused && allowed {
                break;
            }

            let reason = if user_paused {
                PauseReason::User
            } else {
                PauseReason::Policy
            };
            if held != Some(reason) {
                info!(job_id = %self.job.id, ?reason, "Transfer paused");
                self.job.mark_paused(reason).await;
                self.ctx.emit(DownloadEvent::Paused {
                    job_id: self.job.id.clone(),
                    reason,
                });
                if held.is_none() {
                    self.publish(self.tracker.unknown_eta(bytes_now)).await;
                }
                held = Some(reason);
            }

            tokio::select! {
                biased;
                _ = self.job.cancel_token().cancelled() => return Some(self.stop_outcome().await),
                _ = self.control.changed() => {}
                _ = tokio::time::sleep(self.ctx.config.policy_poll_interval) => {}
            }
        }

        if held.is_some() {
            info!(job_id = %self.job.id, "Transfer resumed");
            self.job.mark_playing().await;
            self.ctx.emit(DownloadEvent::Resumed {
                job_id: self.job.id.clone(),
            });
            self.tracker.reset(bytes_now, Instant::now());
            self.publish(self.tracker.current(bytes_now)).await;
        }
        None
    }

    /// Distinguishes a user cancel from an orchestrator shutdown
    async fn stop_outcome(&self) -> FetchOutcome {
        if self.job.status().await == JobStatus::Cancelled {
            FetchOutcome::Cancelled
        } else {
            FetchOutcome::Interrupted
        }
    }

    /// Stores `update` in the job state and emits it.
    async fn publish(&self, update: ProgressUpdate) {
        self.job
            .update(|state| {
                state.bytes_downloaded = update.bytes_downloaded;
                state.speed = update.speed;
                state.eta_seconds = update.eta_seconds;
            })
            .await;
        self.emit_progress(update);
    }

    fn emit_progress(&self, update: ProgressUpdate) {
        trace!(
            job_id = %self.job.id,
            bytes = update.bytes_downloaded,
            percent = update.percent,
            eta = update.eta_seconds,
            "Progress"
        );
        self.ctx.emit(DownloadEvent::Progress {
            job_id: self.job.id.clone(),
            bytes_downloaded: update.bytes_downloaded,
            percent: update.percent,
            eta_seconds: update.eta_seconds,
        });
    }
}
