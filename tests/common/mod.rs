#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dove_chunked::{DownloadConfig, DownloadEvent, JobId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes a response body is written in, and the unit throttling applies to
const WRITE_SLICE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub range: Option<(u64, u64)>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Statuses answered to the next GET requests, front first
    failing_gets: Vec<u16>,
    /// Status answered to every GET request
    status: Option<u16>,
    /// `(range start, bytes sent before the connection drops)`, each used once
    drops: Vec<(u64, usize)>,
    /// Pause after every written slice
    throttle: Option<Duration>,
    /// GET requests still to be answered with `200` and the whole body, `Range` ignored
    ignored_ranges: usize,
    /// Bytes added to the announced `Content-Length` of the next GET requests
    inflated_lengths: Vec<u64>,
}

struct State {
    body: Vec<u8>,
    requests: Mutex<Vec<RecordedRequest>>,
    faults: Mutex<Faults>,
}

/// Minimal HTTP/1.1 server with `Range` support serving the same body on every path
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<State>,
}

impl TestServer {
    pub async fn start(body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State {
            body,
            requests: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
        });

        let server_state = state.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, server_state.clone()));
            }
        });

        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    pub fn body(&self) -> &[u8] {
        &self.state.body
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Ranges of every GET request received so far
    pub fn get_ranges(&self) -> Vec<(u64, u64)> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "GET")
            .filter_map(|r| r.range)
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.requests.lock().unwrap().clear();
    }

    pub fn fail_next_gets(&self, count: usize, status: u16) {
        let mut faults = self.state.faults.lock().unwrap();
        faults.failing_gets.extend(std::iter::repeat(status).take(count));
    }

    pub fn set_status(&self, status: Option<u16>) {
        self.state.faults.lock().unwrap().status = status;
    }

    /// Drops the connection after `after` body bytes of the next GET starting at `range_start`
    pub fn drop_once(&self, range_start: u64, after: usize) {
        self.state
            .faults
            .lock()
            .unwrap()
            .drops
            .push((range_start, after));
    }

    /// Answers the next `count` GET requests as if `Range` was not supported
    pub fn ignore_ranges(&self, count: usize) {
        self.state.faults.lock().unwrap().ignored_ranges = count;
    }

    /// Announces `extra` more bytes than sent in the next GET response
    pub fn inflate_next_length(&self, extra: u64) {
        self.state.faults.lock().unwrap().inflated_lengths.push(extra);
    }

    pub fn set_throttle(&self, delay: Option<Duration>) {
        self.state.faults.lock().unwrap().throttle = delay;
    }
}

async fn serve(socket: TcpStream, state: Arc<State>) {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    let len = state.body.len() as u64;

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut range = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            return;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("range") {
                range = parse_range(value.trim(), len);
            }
        }
    }

    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path,
        range,
    });

    if method == "HEAD" {
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {len}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n"
        );
        let _ = writer.write_all(head.as_bytes()).await;
        return;
    }

    let (status, drop_after, throttle, ignore_range, extra_length) = {
        let mut faults = state.faults.lock().unwrap();
        let status = if faults.failing_gets.is_empty() {
            faults.status
        } else {
            Some(faults.failing_gets.remove(0))
        };
        let start = range.map(|(start, _)| start).unwrap_or(0);
        let drop_after = faults
            .drops
            .iter()
            .position(|(s, _)| *s == start)
            .map(|i| faults.drops.remove(i).1);
        let ignore_range = faults.ignored_ranges > 0;
        if ignore_range {
            faults.ignored_ranges -= 1;
        }
        let extra_length = if faults.inflated_lengths.is_empty() {
            0
        } else {
            faults.inflated_lengths.remove(0)
        };
        (status, drop_after, faults.throttle, ignore_range, extra_length)
    };

    if let Some(status) = status {
        let head = format!(
            "HTTP/1.1 {status} Injected\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
        let _ = writer.write_all(head.as_bytes()).await;
        return;
    }

    let range = range.filter(|_| !ignore_range);
    let (start, end) = range.unwrap_or((0, len - 1));
    let announced = end - start + 1 + extra_length;
    let head = if range.is_some() {
        format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {start}-{end}/{len}\r\nContent-Length: {announced}\r\nConnection: close\r\n\r\n"
        )
    } else {
        format!("HTTP/1.1 200 OK\r\nContent-Length: {announced}\r\nConnection: close\r\n\r\n")
    };
    if writer.write_all(head.as_bytes()).await.is_err() {
        return;
    }

    let body = &state.body[start as usize..=end as usize];
    let limit = drop_after.unwrap_or(body.len()).min(body.len());
    for slice in body[..limit].chunks(WRITE_SLICE) {
        if writer.write_all(slice).await.is_err() {
            return;
        }
        let _ = writer.flush().await;
        if let Some(delay) = throttle {
            tokio::time::sleep(delay).await;
        }
    }
    let _ = writer.flush().await;
    // dropping the socket closes the connection, mid-body when a drop was injected
}

fn parse_range(value: &str, len: u64) -> Option<(u64, u64)> {
    let bounds = value.strip_prefix("bytes=")?;
    let (start, end) = bounds.split_once('-')?;
    let start = start.parse().ok()?;
    let end = match end {
        "" => len - 1,
        end => end.parse::<u64>().ok()?.min(len - 1),
    };
    Some((start, end))
}

/// Deterministic, non-repeating-looking fixture
pub fn fixture(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Engine settings scaled down for fast tests: 1000-byte chunks, 256-byte buffers
pub fn test_config() -> DownloadConfig {
    DownloadConfig::new()
        .with_max_chunk_size(1000)
        .with_buffer_size(256)
        .with_retry_delay(Duration::from_millis(10))
        .with_sample_interval(Duration::from_millis(10))
        .with_policy_poll_interval(Duration::from_millis(10))
        .with_read_timeout(Duration::from_secs(5))
        .with_check_disk_space(false)
}

/// Next event of `job`, skipping events of other jobs
pub async fn next_event(rx: &mut broadcast::Receiver<DownloadEvent>, job: &JobId) -> DownloadEvent {
    loop {
        let event = timeout(TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed");
        if event.job_id() == job {
            return event;
        }
    }
}

/// Events of `job` up to and including the first one matching `stop`
pub async fn events_until(
    rx: &mut broadcast::Receiver<DownloadEvent>,
    job: &JobId,
    stop: impl Fn(&DownloadEvent) -> bool,
) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx, job).await;
        let done = stop(&event);
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Events of `job` that are already queued, without waiting
pub fn drain(rx: &mut broadcast::Receiver<DownloadEvent>, job: &JobId) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.job_id() == job {
            events.push(event);
        }
    }
    events
}

/// Concatenation of the given files
pub fn read_all(files: &[impl AsRef<Path>]) -> Vec<u8> {
    files
        .iter()
        .flat_map(|f| std::fs::read(f).unwrap())
        .collect()
}

/// Names of the files below `dir`, sorted
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
