//! Background image download
//!
//! `Downloader::start` opens the destination file, then streams the image on
//! a dedicated thread so the page stays responsive. The thread never touches
//! view state: it reports through a single `mpsc` channel that the
//! orchestrator drains on its own thread.
//!
//! # Job lifecycle
//!
//! ```text
//! Pending ──► Running ──┬──► Succeeded   (all bytes written, supervisor alive)
//!                       ├──► Failed      (HTTP ≠ 200, connection/read error)
//!                       └──► Aborted     (supervisor gone at a chunk boundary)
//! ```
//!
//! Failed and Aborted runs delete the partial file. Terminal states are final;
//! a retry is a new job.

use crate::error::{DeployError, Result};
use crate::probe::local_copy_path;
use crate::process_guard::{SupervisorToken, WorkerTicket};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// Download job states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl JobState {
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }

    /// Whether `self → to` is a legal transition
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Aborted)
        )
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Downloading",
            Self::Succeeded => "Download complete",
            Self::Failed => "Download failed",
            Self::Aborted => "Download aborted",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors from illegal job state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobTransitionError {
    #[error("Cannot leave terminal state {from}")]
    FromTerminalState { from: JobState },

    #[error("Cannot move from {from} to {to}")]
    Invalid { from: JobState, to: JobState },
}

/// Snapshot of one download attempt
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub url: Url,
    pub destination: PathBuf,
    /// From `content-length`; `None` for chunked responses
    pub total_bytes: Option<u64>,
    pub transferred_bytes: u64,
    pub started_at: Option<Instant>,
    pub state: JobState,
    /// Failure description for `Failed` jobs
    pub message: Option<String>,
}

impl DownloadJob {
    fn new(url: Url, destination: PathBuf) -> Self {
        Self {
            url,
            destination,
            total_bytes: None,
            transferred_bytes: 0,
            started_at: None,
            state: JobState::Pending,
            message: None,
        }
    }

    /// Move to `to`, enforcing the lifecycle
    pub fn transition(&mut self, to: JobState) -> std::result::Result<(), JobTransitionError> {
        if self.state.is_terminal() {
            return Err(JobTransitionError::FromTerminalState { from: self.state });
        }
        if !self.state.can_transition_to(to) {
            return Err(JobTransitionError::Invalid {
                from: self.state,
                to,
            });
        }
        if to == JobState::Running {
            self.started_at = Some(Instant::now());
        }
        tracing::debug!("Download job {}: {} -> {}", self.url, self.state, to);
        self.state = to;
        Ok(())
    }

    /// Completed share in percent; `None` when the size is unknown
    pub fn percentage(&self) -> Option<u8> {
        let total = self.total_bytes.filter(|total| *total > 0)?;
        let pct = self.transferred_bytes.saturating_mul(100) / total;
        Some(pct.min(100) as u8)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Average throughput since the job started
    pub fn throughput(&self) -> String {
        format_throughput(self.transferred_bytes, self.elapsed())
    }
}

/// Messages sent from the download thread to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Progress {
        /// `None` when the server did not announce a size
        percentage: Option<u8>,
        throughput: String,
        transferred: u64,
    },
    Terminal {
        state: JobState,
        message: Option<String>,
        destination: PathBuf,
    },
}

/// Format bytes over time as B/s, KB/s, MB/s or GB/s (1024 per step)
pub fn format_throughput(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64().max(0.001);
    format_rate(bytes as f64 / secs)
}

/// Scale a bytes-per-second rate to the largest unit where it stays ≥ 1
pub fn format_rate(bytes_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];
    let mut value = bytes_per_sec.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Connection-level transport failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Response head plus a streaming body
pub struct TransportResponse {
    pub status: u16,
    pub reason: Option<String>,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

/// Streaming GET, the network seam of the downloader
pub trait Transport: Send + Sync {
    fn get(&self, url: &Url) -> std::result::Result<TransportResponse, TransportError>;
}

/// `Transport` over a blocking reqwest client
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Build a client with a bounded connect phase and no overall timeout.
    /// Transparent decompression stays off so byte counts match
    /// `content-length`.
    pub fn new(connect_timeout: Duration, accept_invalid_certs: bool) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(None::<Duration>)
            .no_gzip()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| DeployError::network(format!("could not build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &Url) -> std::result::Result<TransportResponse, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT_ENCODING, "identity")
            .send()
            .map_err(|e| TransportError(e.to_string()))?;

        let status = response.status();
        Ok(TransportResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
            content_length: response.content_length(),
            body: Box::new(response),
        })
    }
}

/// Handle to a running or finished download
pub struct JobHandle {
    job: Arc<Mutex<DownloadJob>>,
    thread: Option<JoinHandle<()>>,
}

impl JobHandle {
    /// Read-only copy of the job for rendering
    pub fn snapshot(&self) -> DownloadJob {
        self.job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> JobState {
        self.job.lock().unwrap_or_else(PoisonError::into_inner).state
    }

    /// Wait for the download thread and return the final state
    pub fn join(mut self) -> JobState {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Download thread panicked");
            }
        }
        self.state()
    }
}

/// Starts background downloads
#[derive(Clone)]
pub struct Downloader {
    transport: Arc<dyn Transport>,
    chunk_size: usize,
}

impl Downloader {
    pub fn new(transport: Arc<dyn Transport>, chunk_size: usize) -> Self {
        Self {
            transport,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Begin fetching `url` into `dest_dir/basename(url)`.
    ///
    /// The destination is created exclusively before the thread starts, so
    /// an existing file or an unwritable directory is reported here.
    /// Everything after that arrives as `DownloadEvent`s.
    ///
    /// Only one download may run per orchestrator; the caller enforces it.
    pub fn start(
        &self,
        url: Url,
        dest_dir: &Path,
        events: Sender<DownloadEvent>,
        supervisor: SupervisorToken,
    ) -> Result<JobHandle> {
        let destination = local_copy_path(dest_dir, url.path()).ok_or_else(|| {
            DeployError::invalid_request(format!("could not determine a file name from {}", url))
        })?;

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&destination)?;

        let mut job = DownloadJob::new(url, destination.clone());
        if let Err(e) = job.transition(JobState::Running) {
            remove_partial(&destination);
            return Err(DeployError::internal(e.to_string()));
        }
        tracing::info!("Downloading {} to {}", job.url, job.destination.display());

        let job = Arc::new(Mutex::new(job));
        supervisor.register_partial(&destination);
        let task = DownloadTask {
            job: Arc::clone(&job),
            transport: Arc::clone(&self.transport),
            chunk_size: self.chunk_size,
            events,
            _ticket: supervisor.worker(),
            supervisor: supervisor.clone(),
        };

        let spawned = thread::Builder::new()
            .name("image-download".to_string())
            .spawn(move || task.run(file));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                remove_partial(&destination);
                supervisor.release_partial(&destination);
                return Err(e.into());
            }
        };

        Ok(JobHandle {
            job,
            thread: Some(thread),
        })
    }
}

/// How a run ended, before cleanup
enum RunEnd {
    Completed,
    Failed(String),
    Aborted,
}

/// State moved onto the download thread
struct DownloadTask {
    job: Arc<Mutex<DownloadJob>>,
    transport: Arc<dyn Transport>,
    chunk_size: usize,
    events: Sender<DownloadEvent>,
    supervisor: SupervisorToken,
    _ticket: WorkerTicket,
}

impl DownloadTask {
    fn with_job<R>(&self, f: impl FnOnce(&mut DownloadJob) -> R) -> R {
        let mut job = self.job.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut job)
    }

    fn run(self, file: File) {
        let (url, destination) = self.with_job(|job| (job.url.clone(), job.destination.clone()));

        let end = self.stream(&url, file);

        let (state, message) = match end {
            RunEnd::Completed => (JobState::Succeeded, None),
            RunEnd::Failed(message) => {
                tracing::error!("{}", message);
                remove_partial(&destination);
                (JobState::Failed, Some(message))
            }
            RunEnd::Aborted => {
                tracing::warn!("Supervisor gone, aborting download of {}", url);
                remove_partial(&destination);
                (JobState::Aborted, None)
            }
        };

        self.with_job(|job| {
            job.message = message.clone();
            if let Err(e) = job.transition(state) {
                tracing::error!("Download job transition rejected: {}", e);
            }
        });
        self.supervisor.release_partial(&destination);

        if state == JobState::Aborted || !self.supervisor.is_alive() {
            return;
        }
        if state == JobState::Succeeded {
            tracing::info!("Download of {} complete", url);
        }
        let terminal = DownloadEvent::Terminal {
            state,
            message,
            destination,
        };
        if self.events.send(terminal).is_err() {
            tracing::debug!("Terminal event receiver dropped");
        }
    }

    /// Copy the body into `file` chunk by chunk. Each chunk boundary is a
    /// cancellation checkpoint.
    fn stream(&self, url: &Url, mut file: File) -> RunEnd {
        let response = match self.transport.get(url) {
            Ok(response) => response,
            Err(e) => return RunEnd::Failed(format!("Failed to download {}: {}", url, e)),
        };

        if response.status != 200 {
            return RunEnd::Failed(format!(
                "Failed to download {}: server returned HTTP {}{}",
                url,
                response.status,
                response
                    .reason
                    .as_deref()
                    .map(|r| format!(" {}", r))
                    .unwrap_or_default()
            ));
        }

        let total = response.content_length;
        self.with_job(|job| job.total_bytes = total);
        if total.is_none() {
            tracing::debug!("No content-length for {}, progress is indeterminate", url);
        }

        let mut body = response.body;
        let mut buf = Vec::with_capacity(self.chunk_size);
        loop {
            buf.clear();
            let read = match (&mut body).take(self.chunk_size as u64).read_to_end(&mut buf) {
                Ok(read) => read,
                Err(e) => return RunEnd::Failed(format!("Error while downloading {}: {}", url, e)),
            };
            if read == 0 {
                break;
            }
            if let Err(e) = file.write_all(&buf) {
                return RunEnd::Failed(format!("Could not write image: {}", e));
            }

            let (percentage, throughput, transferred) = self.with_job(|job| {
                job.transferred_bytes += read as u64;
                (job.percentage(), job.throughput(), job.transferred_bytes)
            });

            if !self.supervisor.is_alive() {
                return RunEnd::Aborted;
            }
            let progress = DownloadEvent::Progress {
                percentage,
                throughput,
                transferred,
            };
            if self.events.send(progress).is_err() {
                tracing::debug!("Progress receiver dropped");
                return RunEnd::Aborted;
            }
        }

        if let Err(e) = file.sync_all() {
            return RunEnd::Failed(format!("Could not write image: {}", e));
        }

        let transferred = self.with_job(|job| job.transferred_bytes);
        if let Some(total) = total {
            if transferred < total {
                return RunEnd::Failed(format!(
                    "Connection closed after {} of {} bytes from {}",
                    transferred, total, url
                ));
            }
        }

        if !self.supervisor.is_alive() {
            return RunEnd::Aborted;
        }
        RunEnd::Completed
    }
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::error!("Could not remove partial file {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_guard::SupervisorGuard;
    use std::io::Cursor;
    use std::sync::mpsc;
    use tempfile::TempDir;

    /// Serves one canned response
    struct CannedTransport {
        status: u16,
        content_length: Option<u64>,
        body: Vec<u8>,
    }

    impl Transport for CannedTransport {
        fn get(&self, _url: &Url) -> std::result::Result<TransportResponse, TransportError> {
            Ok(TransportResponse {
                status: self.status,
                reason: None,
                content_length: self.content_length,
                body: Box::new(Cursor::new(self.body.clone())),
            })
        }
    }

    struct RefusingTransport;

    impl Transport for RefusingTransport {
        fn get(&self, _url: &Url) -> std::result::Result<TransportResponse, TransportError> {
            Err(TransportError("connection refused".to_string()))
        }
    }

    fn url() -> Url {
        Url::parse("http://host/pub/engine.iso").unwrap()
    }

    #[test]
    fn test_transition_rules() {
        let mut job = DownloadJob::new(url(), PathBuf::from("/tmp/x"));
        assert!(job.transition(JobState::Succeeded).is_err());
        job.transition(JobState::Running).unwrap();
        assert!(job.started_at.is_some());
        job.transition(JobState::Failed).unwrap();
        assert_eq!(
            job.transition(JobState::Running),
            Err(JobTransitionError::FromTerminalState {
                from: JobState::Failed
            })
        );
    }

    #[test]
    fn test_percentage() {
        let mut job = DownloadJob::new(url(), PathBuf::from("/tmp/x"));
        assert_eq!(job.percentage(), None);
        job.total_bytes = Some(200);
        job.transferred_bytes = 50;
        assert_eq!(job.percentage(), Some(25));
        job.transferred_bytes = 400;
        assert_eq!(job.percentage(), Some(100));
    }

    #[test]
    fn test_format_rate_units() {
        assert_eq!(format_rate(512.0), "512.0 B/s");
        assert_eq!(format_rate(1024.0), "1.0 KB/s");
        assert_eq!(format_rate(1.5 * 1024.0 * 1024.0), "1.5 MB/s");
        assert_eq!(format_rate(3.0 * 1024.0 * 1024.0 * 1024.0), "3.0 GB/s");
        assert_eq!(format_rate(4096.0 * 1024.0 * 1024.0 * 1024.0), "4096.0 GB/s");
    }

    #[test]
    fn test_successful_download_reports_progress() {
        let dir = TempDir::new().unwrap();
        let body = vec![7u8; 10_000];
        let downloader = Downloader::new(
            Arc::new(CannedTransport {
                status: 200,
                content_length: Some(body.len() as u64),
                body: body.clone(),
            }),
            4096,
        );
        let guard = SupervisorGuard::new();
        let (tx, rx) = mpsc::channel();

        let handle = downloader.start(url(), dir.path(), tx, guard.token()).unwrap();
        assert_eq!(handle.join(), JobState::Succeeded);

        let events: Vec<DownloadEvent> = rx.try_iter().collect();
        let progress: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                DownloadEvent::Progress { percentage, .. } => Some(*percentage),
                _ => None,
            })
            .collect();
        assert_eq!(progress.len(), 3);
        assert_eq!(progress.last(), Some(&Some(100)));

        match events.last() {
            Some(DownloadEvent::Terminal {
                state, destination, ..
            }) => {
                assert_eq!(*state, JobState::Succeeded);
                assert_eq!(fs::read(destination).unwrap(), body);
            }
            other => panic!("expected terminal event, got {:?}", other),
        }
    }

    #[test]
    fn test_http_error_deletes_partial_file() {
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(
            Arc::new(CannedTransport {
                status: 404,
                content_length: None,
                body: b"not found".to_vec(),
            }),
            4096,
        );
        let guard = SupervisorGuard::new();
        let (tx, rx) = mpsc::channel();

        let handle = downloader.start(url(), dir.path(), tx, guard.token()).unwrap();
        let snapshot_dest = handle.snapshot().destination;
        assert_eq!(handle.join(), JobState::Failed);
        assert!(!snapshot_dest.exists());

        match rx.try_iter().last() {
            Some(DownloadEvent::Terminal { state, message, .. }) => {
                assert_eq!(state, JobState::Failed);
                assert!(message.unwrap().contains("404"));
            }
            other => panic!("expected terminal event, got {:?}", other),
        }
    }

    #[test]
    fn test_connection_error_reports_cause() {
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(Arc::new(RefusingTransport), 4096);
        let guard = SupervisorGuard::new();
        let (tx, rx) = mpsc::channel();

        let handle = downloader.start(url(), dir.path(), tx, guard.token()).unwrap();
        assert_eq!(handle.join(), JobState::Failed);
        assert!(!dir.path().join("engine.iso").exists());

        let last = rx.try_iter().last();
        assert!(matches!(
            last,
            Some(DownloadEvent::Terminal { message: Some(ref m), .. }) if m.contains("connection refused")
        ));
    }

    #[test]
    fn test_failure_with_receiver_gone_still_finishes() {
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(Arc::new(RefusingTransport), 4096);
        let guard = SupervisorGuard::new();
        let (tx, rx) = mpsc::channel();
        drop(rx);

        let handle = downloader.start(url(), dir.path(), tx, guard.token()).unwrap();
        assert_eq!(handle.join(), JobState::Failed);
        assert!(!dir.path().join("engine.iso").exists());
    }

    #[test]
    fn test_finished_downloads_release_their_file() {
        let dir = TempDir::new().unwrap();
        let guard = SupervisorGuard::new();
        let token = guard.token();
        let (tx, _rx) = mpsc::channel();

        let ok = Downloader::new(
            Arc::new(CannedTransport {
                status: 200,
                content_length: Some(64),
                body: vec![3u8; 64],
            }),
            16,
        );
        let handle = ok.start(url(), dir.path(), tx.clone(), token.clone()).unwrap();
        assert_eq!(handle.join(), JobState::Succeeded);
        assert!(token.pending_partials().is_empty());

        // A stale sweep after completion keeps the finished image
        token.remove_stale_partials();
        assert!(dir.path().join("engine.iso").exists());

        let failing = Downloader::new(Arc::new(RefusingTransport), 16);
        let other = Url::parse("http://host/pub/other.iso").unwrap();
        let handle = failing.start(other, dir.path(), tx, token.clone()).unwrap();
        assert_eq!(handle.join(), JobState::Failed);
        assert!(token.pending_partials().is_empty());
    }

    #[test]
    fn test_truncated_body_fails() {
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(
            Arc::new(CannedTransport {
                status: 200,
                content_length: Some(100),
                body: vec![1u8; 40],
            }),
            16,
        );
        let guard = SupervisorGuard::new();
        let (tx, _rx) = mpsc::channel();

        let handle = downloader.start(url(), dir.path(), tx, guard.token()).unwrap();
        assert_eq!(handle.join(), JobState::Failed);
        assert!(!dir.path().join("engine.iso").exists());
    }

    #[test]
    fn test_existing_destination_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("engine.iso"), b"already here").unwrap();
        let downloader = Downloader::new(Arc::new(RefusingTransport), 4096);
        let guard = SupervisorGuard::new();
        let (tx, _rx) = mpsc::channel();

        let err = downloader.start(url(), dir.path(), tx, guard.token()).err().unwrap();
        assert!(matches!(err, DeployError::Io(_)));
        assert_eq!(fs::read(dir.path().join("engine.iso")).unwrap(), b"already here");
    }
}
