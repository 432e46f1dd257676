//! Progress tracking module for the chunked downloader
//!
//! This module turns the stream of committed bytes of one job into speed samples,
//! completion percentages and an estimated time remaining, and decides when an
//! update is worth reporting.

use std::time::{Duration, Instant};

/// One progress observation of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub bytes_downloaded: u64,
    pub percent: u8,
    /// Bytes per second of the latest sample
    pub speed: u64,
    /// Estimated seconds remaining, -1 when unknown
    pub eta_seconds: i64,
}

/// Tracks the download progress of a single job.
///
/// Speed is sampled at most once per `sample_interval` as
/// `bytes since last sample / seconds since last sample`. After a pause or a retry
/// the sampling window restarts and the ETA is unknown until the next sample.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_size: u64,
    sample_interval: Duration,
    last_sample_time: Instant,
    bytes_at_last_sample: u64,
    speed: u64,
    eta_seconds: i64,
    last_percent: Option<u8>,
}

impl ProgressTracker {
    pub fn new(total_size: u64, sample_interval: Duration, bytes_now: u64, now: Instant) -> Self {
        trace!(total_size, bytes_now, "Creating progress tracker");
        Self {
            total_size,
            sample_interval,
            last_sample_time: now,
            bytes_at_last_sample: bytes_now,
            speed: 0,
            eta_seconds: -1,
            last_percent: None,
        }
    }

    /// Records the committed byte count; returns an update when one should be reported.
    ///
    /// An update is produced when a new speed sample is taken or when the
    /// percentage changed since the last reported update.
    pub fn update(&mut self, bytes_now: u64, now: Instant) -> Option<ProgressUpdate> {
        let elapsed = now.saturating_duration_since(self.last_sample_time);
        let sampled = elapsed >= self.sample_interval;

        if sampled {
            let bytes = bytes_now.saturating_sub(self.bytes_at_last_sample);
            let secs = elapsed.as_secs_f64();
            let speed = if secs > 0.0 { bytes as f64 / secs } else { 0.0 };

            self.speed = speed as u64;
            self.eta_seconds = if speed > 0.0 {
                (self.total_size.saturating_sub(bytes_now) as f64 / speed) as i64
            } else {
                -1
            };
            self.last_sample_time = now;
            self.bytes_at_last_sample = bytes_now;

            trace!(
                bytes,
                secs,
                speed = self.speed,
                eta = self.eta_seconds,
                "Took speed sample"
            );
        }

        let percent = self.percent(bytes_now);
        if sampled || self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            return Some(self.current(bytes_now));
        }
        None
    }

    /// Restarts the sampling window, e.g. after a pause or before a retry
    pub fn reset(&mut self, bytes_now: u64, now: Instant) {
        debug!(bytes_now, "Resetting speed sampling");
        self.last_sample_time = now;
        self.bytes_at_last_sample = bytes_now;
        self.speed = 0;
        self.eta_seconds = -1;
    }

    /// The current figures without taking a new sample
    pub fn current(&self, bytes_now: u64) -> ProgressUpdate {
        ProgressUpdate {
            bytes_downloaded: bytes_now,
            percent: self.percent(bytes_now),
            speed: self.speed,
            eta_seconds: self.eta_seconds,
        }
    }

    /// Same figures with the ETA forced to unknown, as reported while paused
    pub fn unknown_eta(&self, bytes_now: u64) -> ProgressUpdate {
        ProgressUpdate {
            eta_seconds: -1,
            ..self.current(bytes_now)
        }
    }

    fn percent(&self, bytes_now: u64) -> u8 {
        if self.total_size == 0 {
            return 0;
        }
        ((bytes_now.min(self.total_size) as u128 * 100) / self.total_size as u128) as u8
    }
}
