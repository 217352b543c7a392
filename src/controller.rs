//! Session state machine driving check, download and install.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Url;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::coordinator::{DownloadCoordinator, DownloadSettings};
use crate::pending::InstallResultRouter;
use crate::scraper::VersionScraper;
use crate::services::{DownloadQueue, Installer, NetworkMonitor, PackageRegistry, PageSource};
use crate::types::{
    DownloadOutcome, FailureReason, InstallResult, UnavailableReason, UpdateInfo, UpdaterError,
    APK_MIME_TYPE, UNKNOWN_VERSION,
};
use crate::version::is_update_available;

/// Correlation tag for the platform install prompt.
pub const INSTALL_REQUEST_CODE: i32 = 4711;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    Checking,
    Ready { availability: Availability },
    Downloading { version: String },
    Installing { version: String },
}

impl ControllerState {
    fn busy_with(&self) -> Option<&'static str> {
        match self {
            Self::Checking => Some("update check"),
            Self::Downloading { .. } => Some("download"),
            Self::Installing { .. } => Some("install"),
            Self::Idle | Self::Ready { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Availability {
    UpdateAvailable,
    UpToDate,
    Unavailable(UnavailableReason),
}

/// Something the front-end should show the user once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    DownloadFailed { reason: FailureReason },
    InstallFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum InstallReport {
    Installed,
    Cancelled,
    InstallFailed(String),
    DownloadFailed(FailureReason),
}

/// Everything the front-end renders.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateView {
    pub state: ControllerState,
    pub installed_version: Option<String>,
    pub latest_version: Option<String>,
    pub install_enabled: bool,
    pub notice: Option<Notice>,
    pub checked_at: Option<DateTime<Utc>>,
}

/// The external collaborators a controller drives.
#[derive(Clone)]
pub struct Services {
    pub page: Arc<dyn PageSource>,
    pub network: Arc<dyn NetworkMonitor>,
    pub registry: Arc<dyn PackageRegistry>,
    pub queue: Arc<dyn DownloadQueue>,
    pub installer: Arc<dyn Installer>,
}

struct Session {
    /// Bumped by every operation start and by teardown. An operation may only
    /// move the state while the epoch it started under is still current.
    epoch: u64,
    state: ControllerState,
    update_info: Option<UpdateInfo>,
    installed_display: Option<String>,
    installed_version: Option<String>,
    notice: Option<Notice>,
    checked_at: Option<DateTime<Utc>>,
}

impl Session {
    fn view(&self) -> UpdateView {
        UpdateView {
            state: self.state.clone(),
            installed_version: self.installed_display.clone(),
            latest_version: self.update_info.as_ref().map(|info| info.version.clone()),
            install_enabled: matches!(self.state, ControllerState::Ready { .. })
                && self
                    .update_info
                    .as_ref()
                    .is_some_and(UpdateInfo::is_available),
            notice: self.notice.clone(),
            checked_at: self.checked_at,
        }
    }

    fn availability(&self) -> Option<Availability> {
        self.update_info
            .as_ref()
            .map(|info| availability_for(info, self.installed_version.as_deref()))
    }

    /// Enter a busy state and return the epoch the operation runs under.
    fn begin(&mut self, state: ControllerState) -> u64 {
        self.epoch += 1;
        self.state = state;
        self.notice = None;
        self.epoch
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    /// Leave the busy state entered under `epoch`. Returns false when the
    /// session was torn down or taken over by a later operation meanwhile.
    fn settle(&mut self, epoch: u64, notice: Option<Notice>) -> bool {
        if !self.is_current(epoch) || self.state.busy_with().is_none() {
            return false;
        }
        self.state = match self.availability() {
            Some(availability) => ControllerState::Ready { availability },
            None => ControllerState::Idle,
        };
        self.notice = notice;
        true
    }
}

/// Settles the session if the operation that owns it ends without doing so,
/// e.g. when its future is dropped mid-flight.
struct OperationGuard<'a> {
    controller: &'a UpdateController,
    epoch: u64,
    done: bool,
}

impl<'a> OperationGuard<'a> {
    fn new(controller: &'a UpdateController, epoch: u64) -> Self {
        Self {
            controller,
            epoch,
            done: false,
        }
    }

    fn settle(mut self, notice: Option<Notice>) {
        self.done = true;
        self.controller.session.lock().settle(self.epoch, notice);
    }

    /// The operation already left its busy state itself.
    fn complete(mut self) {
        self.done = true;
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut session = self.controller.session.lock();
        if session.settle(self.epoch, None) {
            warn!(epoch = self.epoch, "Operation dropped before completion");
            self.controller.install_results.disarm();
        }
    }
}

fn availability_for(info: &UpdateInfo, installed: Option<&str>) -> Availability {
    if let Some(reason) = info.unavailable_reason() {
        return Availability::Unavailable(reason);
    }
    if is_update_available(installed, &info.version) {
        Availability::UpdateAvailable
    } else {
        Availability::UpToDate
    }
}

pub struct UpdateController {
    package_id: String,
    page_url: String,
    scraper: VersionScraper,
    coordinator: DownloadCoordinator,
    page: Arc<dyn PageSource>,
    network: Arc<dyn NetworkMonitor>,
    registry: Arc<dyn PackageRegistry>,
    installer: Arc<dyn Installer>,
    install_results: Arc<InstallResultRouter>,
    session: Mutex<Session>,
}

impl UpdateController {
    pub fn from_config(config: &Config, services: Services) -> Result<Self, UpdaterError> {
        let scraper = VersionScraper::new(&config.artifact_name, config.scrape_pattern)?;
        let settings = DownloadSettings {
            downloads_dir: config.downloads_path()?,
            artifact_name: config.artifact_name.clone(),
            title: config.download_title.clone(),
            description: config.download_description.clone(),
            completion_timeout: config.completion_timeout(),
        };
        let coordinator = DownloadCoordinator::new(services.queue.clone(), settings);

        Ok(Self {
            package_id: config.package_id.clone(),
            page_url: config.page_url.clone(),
            scraper,
            coordinator,
            page: services.page,
            network: services.network,
            registry: services.registry,
            installer: services.installer,
            install_results: Arc::new(InstallResultRouter::new()),
            session: Mutex::new(Session {
                epoch: 0,
                state: ControllerState::Idle,
                update_info: None,
                installed_display: None,
                installed_version: None,
                notice: None,
                checked_at: None,
            }),
        })
    }

    pub fn view(&self) -> UpdateView {
        self.session.lock().view()
    }

    pub fn state(&self) -> ControllerState {
        self.session.lock().state.clone()
    }

    pub fn update_info(&self) -> Option<UpdateInfo> {
        self.session.lock().update_info.clone()
    }

    /// Refresh the installed and latest versions.
    ///
    /// Rejected with `Busy` while a check, download or install is running.
    pub async fn check_for_update(&self) -> Result<UpdateView, UpdaterError> {
        let epoch = {
            let mut session = self.session.lock();
            if let Some(activity) = session.state.busy_with() {
                return Err(UpdaterError::Busy(activity));
            }
            session.begin(ControllerState::Checking)
        };
        let guard = OperationGuard::new(self, epoch);

        let (installed_display, installed_version) = self.lookup_installed().await;
        let info = self.latest_version().await;
        let availability = availability_for(&info, installed_version.as_deref());
        info!(
            installed = %installed_display,
            latest = %info.version,
            ?availability,
            "Update check finished"
        );

        let mut session = self.session.lock();
        guard.complete();
        if !session.is_current(epoch) {
            debug!(epoch, "Check result discarded, session moved on");
            return Ok(session.view());
        }
        session.installed_display = Some(installed_display);
        session.installed_version = installed_version;
        session.update_info = Some(info);
        session.state = ControllerState::Ready { availability };
        session.checked_at = Some(Utc::now());
        Ok(session.view())
    }

    /// Download the discovered update, install it and delete the artifact.
    pub async fn install_update(&self) -> Result<InstallReport, UpdaterError> {
        let (epoch, version, url) = {
            let mut session = self.session.lock();
            if let Some(activity) = session.state.busy_with() {
                return Err(UpdaterError::Busy(activity));
            }
            let Some(UpdateInfo {
                version,
                download_url: Some(url),
            }) = session.update_info.clone()
            else {
                return Err(UpdaterError::NoUpdateAvailable);
            };
            let epoch = session.begin(ControllerState::Downloading {
                version: version.clone(),
            });
            (epoch, version, url)
        };
        let guard = OperationGuard::new(self, epoch);

        info!(url = %url, "Download ...");
        let outcome = match self.coordinator.submit_download(&version, &url).await {
            Ok(outcome) => outcome,
            Err(err @ (UpdaterError::DownloadInProgress | UpdaterError::InvalidVersion(_))) => {
                warn!(error = %err, "Download refused");
                guard.settle(None);
                return Err(err);
            }
            Err(err) => {
                error!(error = ?err, "Download could not be started");
                DownloadOutcome::failure(FailureReason::Unknown)
            }
        };

        let artifact = match (outcome.succeeded, outcome.artifact_location) {
            (true, Some(artifact)) => artifact,
            _ => {
                let reason = outcome.failure_reason.unwrap_or(FailureReason::Unknown);
                info!(%reason, "... download failed");
                guard.settle(Some(Notice::DownloadFailed { reason }));
                return Ok(InstallReport::DownloadFailed(reason));
            }
        };
        info!("... download done");

        let mime_type = outcome
            .mime_type
            .unwrap_or_else(|| APK_MIME_TYPE.to_string());
        let still_active = {
            let mut session = self.session.lock();
            let current = session.is_current(epoch)
                && matches!(session.state, ControllerState::Downloading { .. });
            if current {
                session.state = ControllerState::Installing {
                    version: version.clone(),
                };
            }
            current
        };
        if !still_active {
            info!("Session torn down during download");
            guard.complete();
            delete_artifact(&artifact).await;
            return Ok(InstallReport::Cancelled);
        }

        info!(artifact = %artifact, "Install ...");
        let result = self.await_install(&artifact, &mime_type).await;
        delete_artifact(&artifact).await;
        info!(?result, "... install done");

        let (report, notice) = match result {
            InstallResult::Installed => (InstallReport::Installed, None),
            InstallResult::Cancelled => (InstallReport::Cancelled, None),
            InstallResult::Failed(message) => (
                InstallReport::InstallFailed(message.clone()),
                Some(Notice::InstallFailed { message }),
            ),
        };
        guard.settle(notice);
        Ok(report)
    }

    /// Entry point for the platform's install result callback.
    pub fn on_install_result(&self, request_code: i32, result: InstallResult) -> bool {
        self.install_results.deliver(request_code, result)
    }

    /// Release listeners and pending slots when the hosting view goes away.
    /// Operations still awaiting complete as abandoned/cancelled.
    pub fn teardown(&self) {
        self.coordinator.teardown();
        if self.install_results.disarm() {
            debug!("Dropped pending install");
        }
        let mut session = self.session.lock();
        session.epoch += 1;
        session.state = ControllerState::Idle;
    }

    async fn await_install(&self, artifact: &str, mime_type: &str) -> InstallResult {
        let completion = match self.install_results.arm(INSTALL_REQUEST_CODE) {
            Ok(completion) => completion,
            Err(err) => return InstallResult::Failed(err.to_string()),
        };

        if let Err(err) = self
            .installer
            .request_install(
                artifact,
                mime_type,
                INSTALL_REQUEST_CODE,
                self.install_results.clone(),
            )
            .await
        {
            warn!(error = ?err, "Install request failed");
            self.install_results.disarm();
            return InstallResult::Failed(err.to_string());
        }

        match completion.await {
            Ok(result) => result,
            Err(_) => {
                info!("Install abandoned");
                InstallResult::Cancelled
            }
        }
    }

    async fn lookup_installed(&self) -> (String, Option<String>) {
        match self.registry.installed_version(&self.package_id).await {
            Ok(installed) => (
                installed.display(),
                installed.version().map(str::to_string),
            ),
            Err(err) => {
                warn!(package = %self.package_id, error = ?err, "Installed version lookup failed");
                (UNKNOWN_VERSION.to_string(), None)
            }
        }
    }

    async fn latest_version(&self) -> UpdateInfo {
        if !self.network.is_eligible().await {
            info!("No eligible network, skipping page fetch");
            return UpdateInfo::no_network();
        }
        info!(url = %self.page_url, "GetLatestVersion ...");
        self.scraper.latest(self.page.as_ref(), &self.page_url).await
    }
}

impl Drop for UpdateController {
    fn drop(&mut self) {
        self.coordinator.teardown();
        self.install_results.disarm();
    }
}

fn artifact_path(artifact: &str) -> PathBuf {
    Url::parse(artifact)
        .ok()
        .filter(|url| url.scheme() == "file")
        .and_then(|url| url.to_file_path().ok())
        .unwrap_or_else(|| PathBuf::from(artifact))
}

/// Best-effort removal of the downloaded artifact.
async fn delete_artifact(artifact: &str) {
    let path = artifact_path(artifact);
    match fs::remove_file(&path).await {
        Ok(()) => info!(path = %path.display(), "Deleted downloaded artifact"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Artifact already gone")
        }
        Err(err) => warn!(path = %path.display(), error = ?err, "Failed to delete artifact"),
    }
}
