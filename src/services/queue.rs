use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::transfer::{fetch_to_file, DEFAULT_USER_AGENT};
use super::{
    CompletionListener, DownloadQueue, DownloadRequest, DownloadStatus, DownloadStatusRow,
    ListenerId, RequestId,
};
use crate::types::{FailureReason, UpdaterError, APK_MIME_TYPE};

/// Finished rows kept for requests nobody queried.
const MAX_FINISHED_ROWS: usize = 32;

/// In-process download queue.
///
/// Every submitted request runs on its own task. When it finishes, the
/// queue records a status row and notifies every registered listener with
/// the request id, whichever request the listener cares about.
///
/// A finished row is handed out once: querying it removes it.
#[derive(Clone)]
pub struct LocalDownloadQueue {
    http: Client,
    timeout: Option<Duration>,
    state: Arc<QueueState>,
}

#[derive(Default)]
struct QueueState {
    next_request: AtomicU64,
    next_listener: AtomicU64,
    rows: Mutex<HashMap<RequestId, DownloadStatusRow>>,
    listeners: Mutex<HashMap<ListenerId, Arc<dyn CompletionListener>>>,
}

impl LocalDownloadQueue {
    pub fn new(timeout: Option<Duration>) -> Result<Self, UpdaterError> {
        let http = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(UpdaterError::Http)?;
        Ok(Self {
            http,
            timeout,
            state: Arc::new(QueueState::default()),
        })
    }

    pub fn listener_count(&self) -> usize {
        self.state.listeners.lock().len()
    }
}

impl QueueState {
    fn set_row(&self, id: RequestId, row: DownloadStatusRow) {
        let mut rows = self.rows.lock();
        rows.insert(id, row);

        let mut finished: Vec<RequestId> = rows
            .iter()
            .filter(|(_, row)| is_finished(row.status))
            .map(|(id, _)| *id)
            .collect();
        if finished.len() > MAX_FINISHED_ROWS {
            finished.sort_unstable();
            let excess = finished.len() - MAX_FINISHED_ROWS;
            for stale in &finished[..excess] {
                rows.remove(stale);
            }
            debug!(evicted = excess, "Dropped unqueried status rows");
        }
    }

    fn take_row(&self, id: RequestId) -> Option<DownloadStatusRow> {
        let mut rows = self.rows.lock();
        let finished = rows.get(&id).is_some_and(|row| is_finished(row.status));
        if finished {
            rows.remove(&id)
        } else {
            rows.get(&id).cloned()
        }
    }

    fn broadcast(&self, id: RequestId) {
        let listeners: Vec<Arc<dyn CompletionListener>> =
            self.listeners.lock().values().cloned().collect();
        debug!(request = %id, listeners = listeners.len(), "Broadcasting completion");
        for listener in listeners {
            listener.on_complete(id);
        }
    }
}

#[async_trait]
impl DownloadQueue for LocalDownloadQueue {
    async fn submit(&self, request: DownloadRequest) -> Result<RequestId, UpdaterError> {
        Url::parse(&request.url)
            .map_err(|err| UpdaterError::Queue(format!("Invalid URL {}: {err}", request.url)))?;

        let id = RequestId(self.state.next_request.fetch_add(1, Ordering::SeqCst) + 1);
        self.state.set_row(id, status_row(DownloadStatus::Pending));
        info!(
            request = %id,
            title = %request.title,
            description = %request.description,
            url = %request.url,
            destination = %request.destination.display(),
            "Download queued"
        );

        let http = self.http.clone();
        let timeout = self.timeout;
        let state = self.state.clone();
        tokio::spawn(async move {
            state.set_row(id, status_row(DownloadStatus::Running));
            let row = run_download(&http, &request, timeout).await;
            info!(request = %id, status = ?row.status, reason = ?row.reason, "Download finished");
            state.set_row(id, row);
            state.broadcast(id);
        });

        Ok(id)
    }

    async fn query_status(
        &self,
        id: RequestId,
    ) -> Result<Option<DownloadStatusRow>, UpdaterError> {
        Ok(self.state.take_row(id))
    }

    fn register_listener(&self, listener: Arc<dyn CompletionListener>) -> ListenerId {
        let id = ListenerId(self.state.next_listener.fetch_add(1, Ordering::SeqCst) + 1);
        self.state.listeners.lock().insert(id, listener);
        id
    }

    fn unregister_listener(&self, id: ListenerId) -> bool {
        self.state.listeners.lock().remove(&id).is_some()
    }
}

fn is_finished(status: DownloadStatus) -> bool {
    matches!(status, DownloadStatus::Successful | DownloadStatus::Failed)
}

fn status_row(status: DownloadStatus) -> DownloadStatusRow {
    DownloadStatusRow {
        status,
        reason: None,
        local_uri: None,
        mime_type: None,
    }
}

fn failed_row(code: i64) -> DownloadStatusRow {
    DownloadStatusRow {
        status: DownloadStatus::Failed,
        reason: Some(code),
        local_uri: None,
        mime_type: None,
    }
}

async fn run_download(
    http: &Client,
    request: &DownloadRequest,
    timeout: Option<Duration>,
) -> DownloadStatusRow {
    match fetch_into_destination(http, request, timeout).await {
        Ok(row) => row,
        Err(err) => {
            warn!(url = %request.url, error = ?err, "Download failed");
            failed_row(reason_code(&err))
        }
    }
}

async fn fetch_into_destination(
    http: &Client,
    request: &DownloadRequest,
    timeout: Option<Duration>,
) -> Result<DownloadStatusRow, UpdaterError> {
    let destination = std::path::absolute(&request.destination)?;
    let dir = destination
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&dir).await?;

    // Written next to the destination so the final rename stays on one filesystem.
    let partial = NamedTempFile::new_in(&dir)?;

    let downloaded = fetch_to_file(http, &request.url, partial.path(), timeout).await?;

    partial
        .persist(&destination)
        .map_err(|err| UpdaterError::Io(err.error))?;

    let local_uri = Url::from_file_path(&destination)
        .map_err(|_| {
            UpdaterError::Queue(format!(
                "Cannot express {} as a file URI",
                destination.display()
            ))
        })?
        .to_string();
    let mime_type = downloaded
        .content_type
        .filter(|ct| ct != "application/octet-stream")
        .or_else(|| guess_mime_type(&destination));

    debug!(bytes = downloaded.bytes, uri = %local_uri, mime = ?mime_type, "Artifact stored");
    Ok(DownloadStatusRow {
        status: DownloadStatus::Successful,
        reason: None,
        local_uri: Some(local_uri),
        mime_type,
    })
}

fn guess_mime_type(path: &Path) -> Option<String> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("apk") => Some(APK_MIME_TYPE.to_string()),
        _ => None,
    }
}

/// Map a transfer error onto the queue's reason codes.
fn reason_code(err: &UpdaterError) -> i64 {
    match err {
        UpdaterError::Http(http) => {
            if let Some(status) = http.status() {
                i64::from(status.as_u16())
            } else if http.is_redirect() {
                FailureReason::TOO_MANY_REDIRECTS_CODE
            } else if http.is_body() || http.is_decode() {
                FailureReason::HTTP_DATA_ERROR_CODE
            } else {
                FailureReason::UNKNOWN_CODE
            }
        }
        UpdaterError::Io(_) => FailureReason::FILE_ERROR_CODE,
        _ => FailureReason::UNKNOWN_CODE,
    }
}
