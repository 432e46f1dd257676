//! Dove Chunked - A chunked, resumable and pausable download engine for very large archives
//!
//! This crate provides functionality for downloading files with the following features:
//! - Splitting resources into bounded-size sub-files named `name.chunkaa`, `name.chunkab`, ...
//! - Resuming interrupted downloads from the partial files on disk
//! - Per-job pause, resume and cancellation
//! - Bandwidth policies that hold transfers on metered networks
//! - Retries with linear backoff and progress events with speed and ETA
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dove_chunked::{
//!     AllowAll, DownloadConfig, DownloadEvent, DownloadOrchestrator, DoveResult, NoBookkeeping,
//!     StartRequest,
//! };
//!
//! #[tokio::main]
//! async fn main() -> DoveResult<()> {
//!     let orchestrator = DownloadOrchestrator::new(
//!         DownloadConfig::new().with_split_extension("zim"),
//!         "./downloads",
//!         Arc::new(AllowAll),
//!         Arc::new(NoBookkeeping),
//!     )?;
//!     let mut events = orchestrator.subscribe();
//!
//!     orchestrator
//!         .start(StartRequest::new("https://example.com/wikipedia_en_all.zim"))
//!         .await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             DownloadEvent::Progress { percent, .. } => println!("{}%", percent),
//!             DownloadEvent::Completed { final_path, .. } => {
//!                 println!("Saved to {}", final_path.display());
//!                 break;
//!             }
//!             DownloadEvent::Failed { failure, .. } => {
//!                 eprintln!("Failed: {}", failure.message);
//!                 break;
//!             }
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

mod bookkeeping;
mod chunk;
mod config;
mod control;
mod error;
mod event;
mod fetcher;
mod http;
mod job;
mod orchestrator;
mod policy;
mod progress;
mod storage;
mod task_manager;
mod utils;

pub use bookkeeping::{Bookkeeper, DownloadRecord, NoBookkeeping};
pub use chunk::{Chunk, ChunkPlanner, MAX_CHUNK_COUNT, PART_SUFFIX};
pub use config::{DownloadConfig, DEFAULT_MAX_CHUNK_SIZE};
pub use error::{DoveError, DoveResult};
pub use event::{DownloadEvent, FailureKind};
pub use fetcher::FetchOutcome;
pub use job::{JobFailure, JobId, JobSnapshot, JobStatus, PauseReason};
pub use orchestrator::{DownloadOrchestrator, StartRequest};
pub use policy::{AllowAll, BandwidthPolicy, SwitchPolicy};
pub use progress::{ProgressTracker, ProgressUpdate};
pub use storage::JobManifest;
pub use utils::{format_duration, format_size, format_speed};

#[macro_use]
extern crate tracing;
