use std::fmt::Display;

use url::Url;

use crate::config::DownloadConfig;
use crate::error::{DoveError, DoveResult};
use crate::job::JobId;
use crate::utils::extract_filename;

const ALPHABET: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";

/// Suffix carried by a chunk file until it is complete
pub const PART_SUFFIX: &str = ".part";

/// Two base-26 letters name at most 26 * 26 chunks.
pub const MAX_CHUNK_COUNT: u64 = 26 * 26;

/// Represents one sub-file of a resource to be downloaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Index of the chunk
    pub index: usize,
    /// Source of the whole resource
    pub source_url: Url,
    /// Name of the partial file, always ending in `.part`
    pub file_name: String,
    /// Start byte of the chunk (inclusive)
    pub start_byte: u64,
    /// End byte of the chunk (inclusive)
    pub end_byte: u64,
    /// Length of the whole resource
    pub total_content_length: u64,
    pub job_id: JobId,
    pub downloaded: bool,
}

impl Chunk {
    pub fn size(&self) -> u64 {
        self.end_byte - self.start_byte + 1
    }

    /// File name once the chunk is complete
    pub fn final_name(&self) -> &str {
        self.file_name
            .strip_suffix(PART_SUFFIX)
            .unwrap_or(&self.file_name)
    }

    /// `Range` header value for a transfer resuming `offset` bytes into the chunk
    pub fn range_header(&self, offset: u64) -> String {
        format!("bytes={}-{}", self.start_byte + offset, self.end_byte)
    }

    pub fn display(&self) -> tracing::field::DisplayValue<&Chunk> {
        tracing::field::display(self)
    }
}

impl Display for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Chunk {{ index: {}, start: {}, end: {}, file: {} }}",
            self.index, self.start_byte, self.end_byte, self.file_name
        )
    }
}

/// Splits a resource into bounded-size, contiguous chunks
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    max_chunk_size: u64,
    split_extension: String,
}

impl ChunkPlanner {
    pub fn new(max_chunk_size: u64, split_extension: impl Into<String>) -> Self {
        Self {
            max_chunk_size: max_chunk_size.max(1),
            split_extension: split_extension.into(),
        }
    }

    pub fn from_config(config: &DownloadConfig) -> Self {
        Self::new(config.max_chunk_size, config.split_extension.clone())
    }

    pub fn max_chunk_size(&self) -> u64 {
        self.max_chunk_size
    }

    /// Number of chunks needed for `total_content_length` bytes
    pub fn chunk_count(&self, total_content_length: u64) -> u64 {
        total_content_length.div_ceil(self.max_chunk_size)
    }

    /// Plans the chunks of the resource at `url`, naming them after its last path segment.
    pub fn plan(
        &self,
        url: &Url,
        total_content_length: u64,
        job_id: &JobId,
    ) -> DoveResult<Vec<Chunk>> {
        let base = extract_filename(url).unwrap_or_else(|| "download".to_string());
        self.plan_named(url, &base, total_content_length, job_id)
    }

    /// Plans the chunks of a resource using an explicit base file name.
    pub fn plan_named(
        &self,
        url: &Url,
        base_name: &str,
        total_content_length: u64,
        job_id: &JobId,
    ) -> DoveResult<Vec<Chunk>> {
        if total_content_length == 0 {
            return Err(DoveError::FileSizeUnknown(
                "cannot plan an empty resource".to_string(),
            ));
        }

        let count = self.chunk_count(total_content_length);
        if count > MAX_CHUNK_COUNT {
            return Err(DoveError::TooManyChunks {
                total_size: total_content_length,
                chunks: count,
                limit: MAX_CHUNK_COUNT,
            });
        }

        let names = self.file_names(base_name, count as usize);
        let chunks = names
            .into_iter()
            .enumerate()
            .map(|(index, file_name)| {
                let start_byte = index as u64 * self.max_chunk_size;
                let end_byte = (start_byte + self.max_chunk_size - 1).min(total_content_length - 1);
                Chunk {
                    index,
                    source_url: url.clone(),
                    file_name,
                    start_byte,
                    end_byte,
                    total_content_length,
                    job_id: job_id.clone(),
                    downloaded: false,
                }
            })
            .collect::<Vec<_>>();

        debug!(
            job_id = %job_id,
            total = total_content_length,
            chunks = chunks.len(),
            "Planned chunks"
        );
        Ok(chunks)
    }

    fn file_names(&self, base_name: &str, count: usize) -> Vec<String> {
        if count == 1 {
            return vec![format!("{base_name}{PART_SUFFIX}")];
        }

        let stem = match base_name.rfind('.') {
            Some(position) if position > 0 => &base_name[..position],
            _ => base_name,
        };

        (0..count)
            .map(|i| {
                format!(
                    "{stem}.{ext}{suffix}{PART_SUFFIX}",
                    ext = self.split_extension,
                    suffix = split_suffix(i)
                )
            })
            .collect()
    }
}

/// Two-letter suffix of the `index`-th chunk: `aa`, `ab`, ..., `az`, `ba`, ...
pub fn split_suffix(index: usize) -> String {
    let first = ALPHABET[(index / 26) % 26] as char;
    let second = ALPHABET[index % 26] as char;
    format!("{first}{second}")
}
