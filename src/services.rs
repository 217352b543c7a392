//! External collaborators the update flow talks to.
//!
//! Each capability is a trait so the controller can run against the host
//! implementations in the submodules or against test doubles.

mod device;
mod network;
mod page;
mod queue;
mod system;
mod transfer;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::pending::InstallResultRouter;
use crate::types::{InstalledVersion, UpdaterError};

pub use device::{CommandInstaller, CommandRegistry};
pub use network::SysfsNetworkMonitor;
pub use page::HttpPageSource;
pub use queue::LocalDownloadQueue;
pub use system::run_command;
pub use transfer::{fetch_to_file, TransferProgress, Transferred, DEFAULT_USER_AGENT};

/// Opaque identifier handed out by the download queue for each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub title: String,
    pub description: String,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    Running,
    Paused,
    Successful,
    Failed,
}

/// Status row the queue reports for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadStatusRow {
    pub status: DownloadStatus,
    pub reason: Option<i64>,
    pub local_uri: Option<String>,
    pub mime_type: Option<String>,
}

/// Receives a notification for every request the queue completes.
/// May be invoked from any thread.
pub trait CompletionListener: Send + Sync {
    fn on_complete(&self, id: RequestId);
}

#[async_trait]
pub trait DownloadQueue: Send + Sync {
    async fn submit(&self, request: DownloadRequest) -> Result<RequestId, UpdaterError>;

    /// `None` when the queue has no row for `id`.
    async fn query_status(&self, id: RequestId)
        -> Result<Option<DownloadStatusRow>, UpdaterError>;

    fn register_listener(&self, listener: Arc<dyn CompletionListener>) -> ListenerId;

    /// Returns false if the listener was not registered.
    fn unregister_listener(&self, id: ListenerId) -> bool;
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, UpdaterError>;
}

#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Whether the current connection qualifies for fetching and downloading.
    async fn is_eligible(&self) -> bool;
}

#[async_trait]
pub trait PackageRegistry: Send + Sync {
    async fn installed_version(&self, package_id: &str) -> Result<InstalledVersion, UpdaterError>;
}

/// Launches the platform install prompt for a downloaded artifact.
///
/// The call returns once the request is issued; the outcome is delivered
/// later through `results` under `request_code`.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn request_install(
        &self,
        artifact_uri: &str,
        mime_type: &str,
        request_code: i32,
        results: Arc<InstallResultRouter>,
    ) -> Result<(), UpdaterError>;
}
