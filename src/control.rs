//! Per-job control primitives shared between the orchestrator and a job's pipeline

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::chunk::Chunk;
use crate::job::{JobId, JobSnapshot, JobState, JobStatus, PauseReason};

/// What the owner of a job wants its transfer to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Run,
    Pause,
}

/// Everything the orchestrator keeps about one job.
///
/// Every job owns its own pause channel and cancellation token; pausing or
/// cancelling one job never touches the primitives of another.
#[derive(Debug)]
pub(crate) struct JobHandle {
    pub id: JobId,
    pub url: Url,
    pub title: String,
    chunks: Mutex<Vec<Chunk>>,
    state: Mutex<JobState>,
    control: watch::Sender<Command>,
    cancel: CancellationToken,
}

impl JobHandle {
    pub fn new(
        id: JobId,
        url: Url,
        title: String,
        chunks: Vec<Chunk>,
        cancel: CancellationToken,
    ) -> Self {
        let total = chunks.first().map(|c| c.total_content_length).unwrap_or(0);
        let (control, _) = watch::channel(Command::Run);
        Self {
            id,
            url,
            title,
            chunks: Mutex::new(chunks),
            state: Mutex::new(JobState::new(total)),
            control,
            cancel,
        }
    }

    /// The chunk plan with the current `downloaded` marks
    pub async fn chunks(&self) -> Vec<Chunk> {
        self.chunks.lock().await.clone()
    }

    pub async fn mark_downloaded(&self, index: usize) {
        if let Some(chunk) = self.chunks.lock().await.get_mut(index) {
            chunk.downloaded = true;
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn subscribe_control(&self) -> watch::Receiver<Command> {
        self.control.subscribe()
    }

    pub fn request(&self, command: Command) {
        self.control.send_replace(command);
    }

    pub async fn snapshot(&self) -> JobSnapshot {
        self.state.lock().await.snapshot(&self.id)
    }

    pub async fn status(&self) -> JobStatus {
        self.state.lock().await.status
    }

    /// Runs `f` on the state unless the job already reached a terminal status.
    pub async fn update<R>(&self, f: impl FnOnce(&mut JobState) -> R) -> Option<R> {
        let mut state = self.state.lock().await;
        if state.status.is_terminal() {
            return None;
        }
        Some(f(&mut state))
    }

    /// Runs `f` on the state regardless of its status.
    pub async fn with_state<R>(&self, f: impl FnOnce(&mut JobState) -> R) -> R {
        let mut state = self.state.lock().await;
        f(&mut state)
    }

    /// Moves a live job to Paused, remembering why.
    pub async fn mark_paused(&self, reason: PauseReason) -> bool {
        self.update(|state| {
            let moved = state.transition(JobStatus::Paused);
            if moved {
                state.pause_reason = Some(reason);
                state.eta_seconds = -1;
            }
            moved
        })
        .await
        .unwrap_or(false)
    }

    pub async fn mark_playing(&self) -> bool {
        self.update(|state| state.transition(JobStatus::Playing))
            .await
            .unwrap_or(false)
    }
}
