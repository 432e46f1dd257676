//! Configuration module for the chunked downloader
//!
//! This module provides configuration options for the engine: chunk planning limits,
//! read buffer size, retry strategy, sampling cadence and HTTP client settings.

use std::time::Duration;

/// Largest sub-file the planner produces, 2 GiB minus one byte.
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 2 * 1024 * 1024 * 1024 - 1;

/// Configuration for the download engine
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Maximum size of one chunk file in bytes
    pub max_chunk_size: u64,
    /// Extension inserted before the two-letter suffix of multi-chunk file names
    pub split_extension: String,
    /// Size of one read buffer in bytes
    pub buffer_size: usize,
    /// Number of attempts per chunk before the job fails
    pub max_attempts: u32,
    /// Base delay of the linear retry backoff (`attempt * retry_delay`)
    pub retry_delay: Duration,
    /// Accepted difference between the announced and the expected range length
    pub size_tolerance: u64,
    /// Minimum wall-clock time between two speed samples
    pub sample_interval: Duration,
    /// How often a policy-paused job re-checks the bandwidth policy
    pub policy_poll_interval: Duration,
    /// Connection timeout
    pub connection_timeout: Duration,
    /// Read timeout for download operations
    pub read_timeout: Duration,
    /// Whether to follow redirects
    pub follow_redirects: bool,
    /// User agent string
    pub user_agent: String,
    /// Whether to verify SSL certificates
    pub verify_ssl: bool,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
    /// Whether to refuse a start when the storage root lacks free space
    pub check_disk_space: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            split_extension: "chunk".to_string(),
            buffer_size: 2048,
            max_attempts: 100,
            retry_delay: Duration::from_millis(1000),
            size_tolerance: 10,
            sample_interval: Duration::from_millis(1000),
            policy_poll_interval: Duration::from_secs(1),
            connection_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: format!("dove-chunked/{}", env!("CARGO_PKG_VERSION")),
            verify_ssl: true,
            event_capacity: 1024,
            check_disk_space: true,
        }
    }
}

impl DownloadConfig {
    /// Creates a new download configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum chunk size in bytes
    pub fn with_max_chunk_size(mut self, size: u64) -> Self {
        self.max_chunk_size = size.clamp(1, DEFAULT_MAX_CHUNK_SIZE + 1);
        self
    }

    /// Sets the extension used for multi-chunk file names, e.g. `zim` for `name.zimaa`
    pub fn with_split_extension(mut self, extension: impl Into<String>) -> Self {
        self.split_extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    /// Sets the read buffer size in bytes
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(256);
        self
    }

    /// Sets the number of attempts per chunk
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base delay of the linear retry backoff
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the tolerated Content-Length deviation in bytes
    pub fn with_size_tolerance(mut self, tolerance: u64) -> Self {
        self.size_tolerance = tolerance;
        self
    }

    /// Sets the minimum interval between speed samples
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval.max(Duration::from_millis(10));
        self
    }

    /// Sets how often a policy-paused job re-checks the bandwidth policy
    pub fn with_policy_poll_interval(mut self, interval: Duration) -> Self {
        self.policy_poll_interval = interval.max(Duration::from_millis(10));
        self
    }

    /// Sets the connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Sets the read timeout for download operations
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Sets the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets whether to verify SSL certificates
    pub fn with_verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = verify;
        self
    }

    /// Sets the capacity of the event channel
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(16);
        self
    }

    /// Sets whether the free space of the storage root is checked on start
    pub fn with_check_disk_space(mut self, check: bool) -> Self {
        self.check_disk_space = check;
        self
    }

    /// Backoff before the given (1-based) retry attempt
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }
}
