//! Storage module for the chunked downloader
//!
//! This module owns the on-disk lifecycle of a job under the storage root: partial
//! `.part` files, renaming completed chunks, cleanup after cancellation, and the job
//! manifest that lets a restarted process find and validate interrupted downloads.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};

use crate::chunk::{Chunk, PART_SUFFIX};
use crate::error::{DoveError, DoveResult};
use crate::job::JobId;

const MANIFEST_SUFFIX: &str = ".dove.json";

/// Persisted description of a started job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobManifest {
    pub job_id: JobId,
    pub url: String,
    pub title: String,
    pub total_size: u64,
    /// Partial file names of every chunk, in plan order
    pub files: Vec<String>,
}

impl JobManifest {
    pub fn new(job_id: &JobId, title: &str, chunks: &[Chunk]) -> Self {
        let (url, total_size) = chunks
            .first()
            .map(|c| (c.source_url.to_string(), c.total_content_length))
            .unwrap_or_default();
        Self {
            job_id: job_id.clone(),
            url,
            title: title.to_string(),
            total_size,
            files: chunks.iter().map(|c| c.file_name.clone()).collect(),
        }
    }

    /// Whether this manifest describes the same resource as `other`
    pub fn matches(&self, other: &JobManifest) -> bool {
        self.url == other.url && self.total_size == other.total_size && self.files == other.files
    }
}

/// Manages the files of all jobs below one storage root
#[derive(Debug, Clone)]
pub struct StorageManager {
    root: PathBuf,
}

impl StorageManager {
    /// Creates a StorageManager, creating the root directory if needed
    pub fn new<P: AsRef<Path>>(root: P) -> DoveResult<Self> {
        let root = root.as_ref().to_path_buf();

        trace!(path = %root.display(), "Creating storage manager");
        std::fs::create_dir_all(&root).map_err(|e| {
            error!(
                error = %e,
                path = %root.display(),
                "Failed to create storage root",
            );
            DoveError::DirectoryCreationFailed {
                path: root.clone(),
                error: e,
            }
        })?;
        debug!(path = %root.display(), "Storage root ready");

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the chunk while it is incomplete
    pub fn part_path(&self, chunk: &Chunk) -> PathBuf {
        self.root.join(&chunk.file_name)
    }

    /// Path of the chunk once complete
    pub fn final_path(&self, chunk: &Chunk) -> PathBuf {
        self.root.join(chunk.final_name())
    }

    /// Bytes already on disk for the chunk's partial file
    pub async fn resume_offset(&self, chunk: &Chunk) -> DoveResult<u64> {
        let path = self.part_path(chunk);
        match fs::metadata(&path).await {
            Ok(metadata) => {
                debug!(path = %path.display(), size = metadata.len(), "Found partial file");
                Ok(metadata.len())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(DoveError::storage(path, e)),
        }
    }

    /// Whether the chunk's final file already exists with the exact chunk size
    pub async fn is_chunk_complete(&self, chunk: &Chunk) -> bool {
        match fs::metadata(self.final_path(chunk)).await {
            Ok(metadata) => metadata.is_file() && metadata.len() == chunk.size(),
            Err(_) => false,
        }
    }

    /// Opens the chunk's partial file for appending, creating it if needed
    pub async fn open_part(&self, chunk: &Chunk) -> DoveResult<File> {
        let path = self.part_path(chunk);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                error!(error = %e, path = %path.display(), "Failed to open partial file");
                DoveError::storage(path, e)
            })
    }

    /// Strips the `.part` suffix of a finished chunk
    pub async fn complete_chunk(&self, chunk: &Chunk) -> DoveResult<PathBuf> {
        let from = self.part_path(chunk);
        let to = self.final_path(chunk);
        if from == to {
            return Ok(to);
        }

        fs::rename(&from, &to).await.map_err(|e| {
            error!(error = %e, from = %from.display(), to = %to.display(), "Failed to rename chunk");
            DoveError::storage(&from, e)
        })?;
        debug!(from = %from.display(), to = %to.display(), "Chunk renamed to final name");
        Ok(to)
    }

    /// Makes sure every chunk carries its final name and returns the final paths
    pub async fn finalize(&self, chunks: &[Chunk]) -> DoveResult<Vec<PathBuf>> {
        let mut files = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if fs::metadata(self.part_path(chunk)).await.is_ok() {
                warn!(chunk = chunk.display(), "Renaming leftover partial file");
                self.complete_chunk(chunk).await?;
            }
            let path = self.final_path(chunk);
            if fs::metadata(&path).await.is_err() {
                return Err(DoveError::storage(
                    &path,
                    io::Error::new(io::ErrorKind::NotFound, "completed chunk file is missing"),
                ));
            }
            files.push(path);
        }
        info!(files = files.len(), "Download finalized");
        Ok(files)
    }

    /// Removes the partial file of one chunk
    pub async fn delete_part(&self, chunk: &Chunk) -> DoveResult<()> {
        remove_if_exists(&self.part_path(chunk)).await
    }

    /// Removes every partial and completed chunk file of a job
    pub async fn delete_job_files(&self, chunks: &[Chunk]) -> DoveResult<()> {
        for chunk in chunks {
            for path in [self.part_path(chunk), self.final_path(chunk)] {
                remove_if_exists(&path).await?;
            }
        }
        Ok(())
    }

    /// Bytes of the plan already on disk, counting completed and partial chunk files.
    ///
    /// A partial file larger than its chunk counts as empty since it is discarded
    /// before the chunk is fetched.
    pub async fn bytes_on_disk(&self, chunks: &[Chunk]) -> DoveResult<u64> {
        let mut total = 0;
        for chunk in chunks {
            total += if self.is_chunk_complete(chunk).await {
                chunk.size()
            } else {
                match self.resume_offset(chunk).await? {
                    offset if offset > chunk.size() => 0,
                    offset => offset,
                }
            };
        }
        Ok(total)
    }

    /// Removes the files named by a manifest that no longer matches its resource
    pub async fn delete_manifest_files(&self, manifest: &JobManifest) -> DoveResult<()> {
        for name in &manifest.files {
            // only plain file names directly below the root
            if Path::new(name).file_name().and_then(|n| n.to_str()) != Some(name.as_str()) {
                warn!(file = %name, "Ignoring manifest entry outside the storage root");
                continue;
            }
            let part = self.root.join(name);
            let complete = self.root.join(name.strip_suffix(PART_SUFFIX).unwrap_or(name));
            remove_if_exists(&part).await?;
            remove_if_exists(&complete).await?;
        }
        Ok(())
    }

    /// Checks if there's enough disk space below the root for `required_bytes`
    pub fn check_disk_space(&self, required_bytes: u64) -> DoveResult<()> {
        debug!("Checking disk space, required: {} bytes", required_bytes);

        match fs2::available_space(&self.root) {
            Ok(available) if available < required_bytes => {
                warn!(
                    "Insufficient disk space in storage root: needed={}, available={}",
                    required_bytes, available
                );
                Err(DoveError::InsufficientDiskSpace {
                    needed: required_bytes,
                    available,
                })
            }
            Ok(available) => {
                debug!("Available space in storage root: {} bytes", available);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Could not determine available space in storage root");
                Ok(())
            }
        }
    }

    fn manifest_path(&self, job_id: &JobId) -> PathBuf {
        self.root.join(format!("{}{}", job_id, MANIFEST_SUFFIX))
    }

    /// Saves the manifest of a job
    pub async fn save_manifest(&self, manifest: &JobManifest) -> DoveResult<()> {
        let path = self.manifest_path(&manifest.job_id);
        let json = serde_json::to_string(manifest).map_err(|e| {
            error!(error = %e, "Failed to serialize job manifest");
            DoveError::manifest_error("serialize", e.to_string())
        })?;

        fs::write(&path, json)
            .await
            .map_err(|e| DoveError::storage(&path, e))?;
        debug!(path = %path.display(), "Job manifest written");
        Ok(())
    }

    /// Loads the manifest of a job, if one exists
    pub async fn load_manifest(&self, job_id: &JobId) -> DoveResult<Option<JobManifest>> {
        let path = self.manifest_path(job_id);
        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DoveError::storage(path, e)),
        };

        serde_json::from_str(&json).map(Some).map_err(|e| {
            warn!(error = %e, path = %path.display(), "Failed to deserialize job manifest");
            DoveError::manifest_error("deserialize", e.to_string())
        })
    }

    /// Removes the manifest of a job
    pub async fn remove_manifest(&self, job_id: &JobId) -> DoveResult<()> {
        remove_if_exists(&self.manifest_path(job_id)).await
    }

    /// Lists the manifests of every job that started but neither finished nor was cancelled
    pub async fn list_manifests(&self) -> DoveResult<Vec<JobManifest>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| DoveError::storage(&self.root, e))?;

        let mut manifests = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DoveError::storage(&self.root, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(id) = name.strip_suffix(MANIFEST_SUFFIX) else {
                continue;
            };
            match self.load_manifest(&JobId::new(id)).await {
                Ok(Some(manifest)) => manifests.push(manifest),
                Ok(None) => {}
                Err(e) => warn!(error = %e, file = %name, "Skipping unreadable manifest"),
            }
        }
        manifests.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(manifests)
    }
}

async fn remove_if_exists(path: &Path) -> DoveResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "File removed");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to remove file");
            Err(DoveError::storage(path, e))
        }
    }
}
