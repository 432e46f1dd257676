use std::sync::Arc;

use reqwest::header::{ACCEPT_RANGES, CONTENT_RANGE, ETAG, LAST_MODIFIED, RANGE};
use reqwest::{Client, Response, StatusCode};
use url::Url;

use crate::chunk::Chunk;
use crate::config::DownloadConfig;
use crate::error::{DoveError, DoveResult};
use crate::utils::{create_client, parse_content_length};

/// Handles HTTP operations for downloading
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: Arc<DownloadConfig>,
}

impl HttpClient {
    pub fn new(config: Arc<DownloadConfig>) -> DoveResult<Self> {
        debug!("Creating new HTTP client with config: {:?}", config);
        let client = create_client(config.as_ref())?;
        debug!("HTTP client created successfully");

        Ok(Self { client, config })
    }

    /// Sends a HEAD request to get file information
    ///
    /// Servers that omit Content-Length on HEAD are asked for the first byte instead,
    /// and the total is read from `Content-Range`.
    pub async fn get_file_info(&self, url: &Url) -> DoveResult<FileInfo> {
        debug!(url = %url, "Sending HEAD request to get file information");

        let head_resp = self.client.head(url.clone()).send().await.map_err(|e| {
            error!(error = %e, url = %url, "Failed to send HEAD request");
            DoveError::HttpError(e)
        })?;

        debug!(status = %head_resp.status(), "HEAD response received");

        if !head_resp.status().is_success() {
            warn!(
                status = %head_resp.status(),
                url = %url,
                "HEAD request failed with non-success status"
            );
            return Err(DoveError::server_error(
                head_resp.status().as_u16(),
                head_resp.status().to_string(),
            ));
        }

        let total_size = match parse_content_length(&head_resp).filter(|size| *size > 0) {
            Some(size) => size,
            None => {
                warn!(url = %url, "Content-Length missing in HEAD response, probing with a range request");
                self.probe_total_size(url).await?
            }
        };
        debug!(size = total_size, "Content length determined");

        let supports_range = head_resp
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("bytes"))
            .unwrap_or(false);

        let etag = head_resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let last_modified = head_resp
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        info!(
            url = %url,
            size = total_size,
            supports_range = supports_range,
            ?etag,
            ?last_modified,
            "File information retrieved successfully"
        );

        Ok(FileInfo {
            total_size,
            supports_range,
            etag,
            last_modified,
        })
    }

    async fn probe_total_size(&self, url: &Url) -> DoveResult<u64> {
        let resp = self
            .client
            .get(url.clone())
            .header(RANGE, "bytes=0-0")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(DoveError::server_error(
                resp.status().as_u16(),
                resp.status().to_string(),
            ));
        }

        resp.headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| {
                DoveError::FileSizeUnknown("Content-Length and Content-Range missing".to_string())
            })
    }

    /// Requests the bytes of `chunk` starting `offset` bytes into it.
    ///
    /// The response is rejected when its status is not a success, when a resumed request
    /// is not answered with `206 Partial Content` starting at the requested byte, or when
    /// the announced length deviates from the remaining range by more than the configured
    /// tolerance.
    pub async fn open_range(&self, chunk: &Chunk, offset: u64) -> DoveResult<Response> {
        let range_header = chunk.range_header(offset);
        debug!(
            url = %chunk.source_url,
            range = %range_header,
            chunk_index = chunk.index,
            "Sending range request"
        );

        let resp = self
            .client
            .get(chunk.source_url.clone())
            .header(RANGE, &range_header)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, chunk = chunk.display(), "Error sending request");
                DoveError::HttpError(e)
            })?;

        debug!(
            "Response received for chunk {}, status: {}",
            chunk.index,
            resp.status()
        );

        if !resp.status().is_success() {
            warn!(
                status = %resp.status(),
                chunk_index = chunk.index,
                "Received non-success status code for chunk download"
            );
            return Err(DoveError::server_error(
                resp.status().as_u16(),
                resp.status().to_string(),
            ));
        }

        let expected_start = chunk.start_byte + offset;
        let content_range = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let partial = resp.status() == StatusCode::PARTIAL_CONTENT;
        let start_matches = content_range
            .as_deref()
            .map(|v| parse_content_range_start(v) == Some(expected_start))
            .unwrap_or(true);
        if (expected_start > 0 && !partial) || !start_matches {
            warn!(
                chunk_index = chunk.index,
                status = %resp.status(),
                expected_start,
                content_range = ?content_range,
                "Server did not honour the range request"
            );
            return Err(DoveError::RangeIgnored {
                expected_start,
                status: resp.status().as_u16(),
                content_range,
            });
        }

        let expected = chunk.size().saturating_sub(offset);
        if let Some(actual) = parse_content_length(&resp) {
            if actual.abs_diff(expected) > self.config.size_tolerance {
                warn!(
                    chunk_index = chunk.index,
                    expected, actual, "Server broadcasting wrong size"
                );
                return Err(DoveError::SizeMismatch { expected, actual });
            }
        }

        Ok(resp)
    }
}

/// Extracts the first byte from a `Content-Range: bytes 1000-1999/2500` value
fn parse_content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    range.split('-').next()?.trim().parse().ok()
}

/// Extracts the total length from a `Content-Range: bytes 0-0/1234` value
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

/// Information about a file to be downloaded
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub total_size: u64,
    pub supports_range: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}
