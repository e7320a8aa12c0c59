//! Resource downloader — §4.8, grounded in `cl_http.rs`'s
//! `AsyncHttpDownloadManager` (a dedicated thread running its own tokio
//! runtime, progress reported back over a channel, a shared `AtomicBool`
//! cancel flag honored between chunks) generalized from one file at a time
//! to the manifest-then-archive, SHA-256-verified pair this system needs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tracing::warn;

use aeon_script::client_resource::ResourcePayload;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// One resource a server has announced as available, carrying everything
/// needed to fetch and verify it without touching the archive's own
/// manifest (§4.8: "the only thing a client needs to fetch before deciding
/// whether to download the archive at all").
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub name: String,
    pub manifest_path: String,
    pub archive_path: String,
    pub manifest_sha256: String,
    pub archive_sha256: String,
    pub archive_size: u64,
}

#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub server_host: String,
    pub server_port: u16,
    /// Always begins with `/`; joined with a descriptor's (sanitized) path.
    pub download_base_prefix: String,
    /// Appended as `?token=...` when non-empty.
    pub download_token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadState {
    Idle,
    Consent,
    Downloading,
    Ready,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone)]
enum WorkerEvent {
    Progress { name: String, completed: usize, total: usize },
    Ready(Vec<ResourcePayload>),
    Failed(String),
    Cancelled,
}

/// Progress/result events a caller drains via [`ResourceDownloader::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadProgress {
    Downloading { name: String, completed: usize, total: usize },
}

/// Strip backslashes and any leading slash so a descriptor path can't escape
/// the configured base prefix (§4.8's "paths are sanitized").
fn sanitize_path(raw: &str) -> String {
    raw.replace('\\', "/").trim_start_matches('/').to_string()
}

fn build_url(config: &DownloaderConfig, path: &str) -> String {
    let base = if config.download_base_prefix.starts_with('/') {
        config.download_base_prefix.clone()
    } else {
        format!("/{}", config.download_base_prefix)
    };
    let token = if config.download_token.is_empty() {
        String::new()
    } else {
        format!("?token={}", config.download_token)
    };
    format!(
        "http://{}:{}{}/{}{}",
        config.server_host,
        config.server_port,
        base.trim_end_matches('/'),
        sanitize_path(path),
        token
    )
}

enum FetchOutcome {
    Ok(Vec<u8>),
    Cancelled,
    Failed(String),
}

async fn fetch_verified(
    client: &reqwest::Client,
    url: &str,
    expected_sha256: &str,
    expected_size: Option<u64>,
    cancel: &AtomicBool,
) -> FetchOutcome {
    let response = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => return FetchOutcome::Failed(format!("GET {url}: {e}")),
    };
    if !response.status().is_success() {
        return FetchOutcome::Failed(format!("GET {url}: HTTP {}", response.status()));
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        if cancel.load(Ordering::SeqCst) {
            return FetchOutcome::Cancelled;
        }
        match chunk {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(e) => return FetchOutcome::Failed(format!("reading {url}: {e}")),
        }
    }

    if let Some(expected_size) = expected_size {
        if bytes.len() as u64 != expected_size {
            return FetchOutcome::Failed(format!(
                "{url}: expected {expected_size} bytes, got {}",
                bytes.len()
            ));
        }
    }

    let actual_sha256 = hex(&Sha256::digest(&bytes));
    if actual_sha256 != expected_sha256 {
        return FetchOutcome::Failed(format!("{url}: sha256 mismatch (expected {expected_sha256}, got {actual_sha256})"));
    }

    FetchOutcome::Ok(bytes)
}

async fn download_one(
    client: &reqwest::Client,
    config: &DownloaderConfig,
    descriptor: &ResourceDescriptor,
    cancel: &AtomicBool,
) -> Result<ResourcePayload, FetchOutcome> {
    let manifest_url = build_url(config, &descriptor.manifest_path);
    let manifest_bytes = match fetch_verified(client, &manifest_url, &descriptor.manifest_sha256, None, cancel).await {
        FetchOutcome::Ok(bytes) => bytes,
        other => return Err(other),
    };
    let manifest_json = match String::from_utf8(manifest_bytes) {
        Ok(s) => s,
        Err(e) => return Err(FetchOutcome::Failed(format!("{}: manifest is not valid utf-8: {e}", descriptor.name))),
    };

    let archive_url = build_url(config, &descriptor.archive_path);
    let archive_bytes = match fetch_verified(
        client,
        &archive_url,
        &descriptor.archive_sha256,
        Some(descriptor.archive_size),
        cancel,
    )
    .await
    {
        FetchOutcome::Ok(bytes) => bytes,
        other => return Err(other),
    };

    Ok(ResourcePayload {
        name: descriptor.name.clone(),
        manifest_json,
        archive_bytes,
    })
}

async fn run_downloads(
    descriptors: Vec<ResourceDescriptor>,
    config: DownloaderConfig,
    cancel: Arc<AtomicBool>,
    events_tx: std_mpsc::Sender<WorkerEvent>,
) {
    let client = reqwest::Client::new();
    let total = descriptors.len();
    let mut payloads = Vec::with_capacity(total);

    for (index, descriptor) in descriptors.into_iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            let _ = events_tx.send(WorkerEvent::Cancelled);
            return;
        }
        match download_one(&client, &config, &descriptor, &cancel).await {
            Ok(payload) => {
                payloads.push(payload);
                let _ = events_tx.send(WorkerEvent::Progress {
                    name: descriptor.name,
                    completed: index + 1,
                    total,
                });
            }
            Err(FetchOutcome::Cancelled) => {
                let _ = events_tx.send(WorkerEvent::Cancelled);
                return;
            }
            Err(FetchOutcome::Failed(reason)) => {
                let _ = events_tx.send(WorkerEvent::Failed(reason));
                return;
            }
            Err(FetchOutcome::Ok(_)) => unreachable!("download_one never returns Err(Ok(..))"),
        }
    }

    let _ = events_tx.send(WorkerEvent::Ready(payloads));
}

/// Drives the `Idle -> Consent -> Downloading -> Ready|Failed|Cancelled`
/// state machine for one batch of announced resources.
pub struct ResourceDownloader {
    config: DownloaderConfig,
    descriptors: Vec<ResourceDescriptor>,
    state: DownloadState,
    cancel_flag: Arc<AtomicBool>,
    events_rx: Option<std_mpsc::Receiver<WorkerEvent>>,
    worker: Option<JoinHandle<()>>,
}

impl ResourceDownloader {
    pub fn new(config: DownloaderConfig) -> Self {
        Self {
            config,
            descriptors: Vec::new(),
            state: DownloadState::Idle,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            events_rx: None,
            worker: None,
        }
    }

    pub fn state(&self) -> &DownloadState {
        &self.state
    }

    /// §4.8's `AnnounceResources`: stashes the descriptor list announced by
    /// the server. Replaces any previous announcement that was never
    /// downloaded.
    pub fn announce_resources(&mut self, descriptors: Vec<ResourceDescriptor>) {
        self.descriptors = descriptors;
        self.state = DownloadState::Idle;
    }

    pub fn total_bytes(&self) -> u64 {
        self.descriptors.iter().map(|d| d.archive_size).sum()
    }

    /// §4.8's `BeginDownload`: computes the total size, asks `consent` for
    /// permission (skipped if `auto_consent` is set), then spawns the worker
    /// thread. `consent` is only called when a decision is actually needed.
    pub fn begin_download(&mut self, auto_consent: bool, consent: impl FnOnce(u64) -> bool) {
        if self.descriptors.is_empty() {
            self.state = DownloadState::Ready;
            return;
        }

        self.state = DownloadState::Consent;
        let total = self.total_bytes();
        if !auto_consent && !consent(total) {
            self.state = DownloadState::Failed("declined".to_string());
            return;
        }

        self.state = DownloadState::Downloading;
        self.cancel_flag.store(false, Ordering::SeqCst);

        let (events_tx, events_rx) = std_mpsc::channel();
        let descriptors = self.descriptors.clone();
        let config = self.config.clone();
        let cancel = self.cancel_flag.clone();

        let worker = thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_multi_thread().worker_threads(2).enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = events_tx.send(WorkerEvent::Failed(format!("failed to start download runtime: {e}")));
                    return;
                }
            };
            rt.block_on(run_downloads(descriptors, config, cancel, events_tx));
        });

        self.events_rx = Some(events_rx);
        self.worker = Some(worker);
    }

    /// §4.8's `StopDownload`: the worker checks this between chunks, not
    /// instantly, so [`Self::state`] stays `Downloading` until the next
    /// [`Self::poll`] observes the `Cancelled` event.
    pub fn stop_download(&mut self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    /// Drains every event the worker has produced since the last call,
    /// updating `state` and returning [`DownloadProgress`] entries for a
    /// caller to show. Returns the finished payloads once, the moment the
    /// state transitions to `Ready`.
    pub fn poll(&mut self) -> (Vec<DownloadProgress>, Option<Vec<ResourcePayload>>) {
        let mut progress = Vec::new();
        let mut ready_payloads = None;

        let Some(rx) = self.events_rx.as_ref() else {
            return (progress, ready_payloads);
        };

        while let Ok(event) = rx.try_recv() {
            match event {
                WorkerEvent::Progress { name, completed, total } => {
                    progress.push(DownloadProgress::Downloading { name, completed, total });
                }
                WorkerEvent::Ready(payloads) => {
                    self.state = DownloadState::Ready;
                    ready_payloads = Some(payloads);
                }
                WorkerEvent::Failed(reason) => {
                    warn!(%reason, "resource download failed");
                    self.state = DownloadState::Failed(reason);
                }
                WorkerEvent::Cancelled => {
                    self.state = DownloadState::Cancelled;
                }
            }
        }

        if matches!(self.state, DownloadState::Ready | DownloadState::Failed(_) | DownloadState::Cancelled) {
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
            self.events_rx = None;
        }

        (progress, ready_payloads)
    }
}
