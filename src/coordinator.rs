//! Submits a download to the queue and waits for its completion notification.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::pending::PendingDownload;
use crate::services::{
    DownloadQueue, DownloadRequest, DownloadStatus, DownloadStatusRow, ListenerId, RequestId,
};
use crate::types::{DownloadOutcome, FailureReason, UpdaterError};

/// Naming and labelling of the downloaded artifact.
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub downloads_dir: PathBuf,
    /// Installer filename, e.g. `WhatsApp.apk`; the destination becomes `WhatsApp_<version>.apk`.
    pub artifact_name: String,
    pub title: String,
    pub description: String,
    pub completion_timeout: Option<Duration>,
}

impl DownloadSettings {
    pub fn destination_for(&self, version: &str) -> PathBuf {
        let artifact = Path::new(&self.artifact_name);
        let stem = artifact
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("artifact");
        let file_name = match artifact.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{stem}_{version}.{ext}"),
            None => format!("{stem}_{version}"),
        };
        self.downloads_dir.join(file_name)
    }
}

/// The listener registration belonging to the download in flight.
struct ActiveDownload {
    listener_id: ListenerId,
    pending: Arc<PendingDownload>,
}

/// Releases the listener when the submitting call ends, however it ends.
struct Registration<'a> {
    coordinator: &'a DownloadCoordinator,
    listener_id: ListenerId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.coordinator.release(self.listener_id);
    }
}

pub struct DownloadCoordinator {
    queue: Arc<dyn DownloadQueue>,
    settings: DownloadSettings,
    active: Mutex<Option<ActiveDownload>>,
}

impl DownloadCoordinator {
    pub fn new(queue: Arc<dyn DownloadQueue>, settings: DownloadSettings) -> Self {
        Self {
            queue,
            settings,
            active: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &DownloadSettings {
        &self.settings
    }

    pub fn is_busy(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Download `url` for `version` and wait for the queue to finish it.
    ///
    /// Errors are reserved for misuse (a second concurrent call, an unusable
    /// version token) and for the queue refusing the submission. Every
    /// terminal state of an accepted request comes back as a `DownloadOutcome`.
    pub async fn submit_download(
        &self,
        version: &str,
        url: &str,
    ) -> Result<DownloadOutcome, UpdaterError> {
        validate_version(version)?;

        let (pending, completion) = PendingDownload::new();
        let pending = Arc::new(pending);
        let listener_id = {
            let mut active = self.active.lock();
            if active.is_some() {
                return Err(UpdaterError::DownloadInProgress);
            }
            let listener_id = self.queue.register_listener(pending.clone());
            *active = Some(ActiveDownload {
                listener_id,
                pending: pending.clone(),
            });
            listener_id
        };
        let registration = Registration {
            coordinator: self,
            listener_id,
        };
        debug!(listener = listener_id.0, "Registered completion listener");

        let destination = self.settings.destination_for(version);
        remove_stale_artifact(&destination).await;

        let request = DownloadRequest {
            url: url.to_string(),
            title: self.settings.title.clone(),
            description: self.settings.description.clone(),
            destination,
        };
        let id = self.queue.submit(request).await?;
        info!(request = %id, version, url, "Download submitted");
        pending.track(id);

        let matched = match self.settings.completion_timeout {
            Some(limit) => match tokio::time::timeout(limit, completion).await {
                Ok(result) => result.ok(),
                Err(_) => {
                    warn!(request = %id, timeout = ?limit, "No completion notification in time");
                    return Ok(DownloadOutcome::failure(FailureReason::TimedOut));
                }
            },
            None => completion.await.ok(),
        };
        drop(registration);

        if matched.is_none() {
            info!(request = %id, "Download abandoned");
            return Ok(DownloadOutcome::failure(FailureReason::Abandoned));
        }

        let outcome = match self.queue.query_status(id).await {
            Ok(Some(row)) => outcome_from_row(id, row),
            Ok(None) => {
                error!(request = %id, "Failed to get download properties");
                DownloadOutcome::failure(FailureReason::QueryInconsistent)
            }
            Err(err) => {
                error!(request = %id, error = ?err, "Failed to query download status");
                DownloadOutcome::failure(FailureReason::QueryInconsistent)
            }
        };
        Ok(outcome)
    }

    /// Drop the listener of any in-flight download and wake its waiter.
    /// Safe to call at any time, any number of times.
    pub fn teardown(&self) {
        let active = self.active.lock().take();
        if let Some(active) = active {
            debug!(listener = active.listener_id.0, "Tearing down pending download");
            self.queue.unregister_listener(active.listener_id);
            active.pending.abandon();
        }
    }

    fn release(&self, listener_id: ListenerId) {
        let mut active = self.active.lock();
        let ours = active
            .as_ref()
            .is_some_and(|current| current.listener_id == listener_id);
        if ours {
            *active = None;
            drop(active);
            self.queue.unregister_listener(listener_id);
            debug!(listener = listener_id.0, "Unregistered completion listener");
        }
    }
}

fn outcome_from_row(id: RequestId, row: DownloadStatusRow) -> DownloadOutcome {
    if row.status != DownloadStatus::Successful {
        let reason = row
            .reason
            .map(FailureReason::from_code)
            .unwrap_or(FailureReason::Unknown);
        info!(request = %id, status = ?row.status, %reason, "Download failed");
        return DownloadOutcome::failure(reason);
    }

    match row.local_uri.filter(|uri| !uri.is_empty()) {
        Some(uri) => {
            info!(request = %id, uri = %uri, "Download done");
            DownloadOutcome::success(uri, row.mime_type.filter(|mime| !mime.is_empty()))
        }
        None => {
            error!(request = %id, "Successful download reported without a location");
            DownloadOutcome::failure(FailureReason::QueryInconsistent)
        }
    }
}

fn validate_version(version: &str) -> Result<(), UpdaterError> {
    let usable = !version.is_empty()
        && version != "."
        && version != ".."
        && !version.contains(['/', '\\'])
        && !version.chars().any(char::is_whitespace);
    if usable {
        Ok(())
    } else {
        Err(UpdaterError::InvalidVersion(version.to_string()))
    }
}

async fn remove_stale_artifact(destination: &Path) {
    match fs::remove_file(destination).await {
        Ok(()) => info!(path = %destination.display(), "Deleted stale artifact"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(path = %destination.display(), error = ?err, "Failed to delete stale artifact")
        }
    }
}
