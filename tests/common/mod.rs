#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use whats_updater::pending::InstallResultRouter;
use whats_updater::services::{
    CompletionListener, DownloadQueue, DownloadRequest, DownloadStatus, DownloadStatusRow,
    Installer, ListenerId, NetworkMonitor, PackageRegistry, PageSource, RequestId,
};
use whats_updater::{
    Config, InstallResult, InstalledVersion, Services, UpdateController, UpdaterError,
};

pub const PAGE_URL: &str = "https://vendor.example/android/";
pub const LATEST: &str = "2.21.4.18";
pub const DOWNLOAD_URL: &str = "https://cdn.example.net/android/2.21.4.18/App.apk";

pub fn vendor_page() -> String {
    [
        "<html>".to_string(),
        "<body>".to_string(),
        "<p>Latest release</p>".to_string(),
        format!(r#"<a class="button" href="{DOWNLOAD_URL}">Download</a>"#),
        "</body>".to_string(),
        "</html>".to_string(),
    ]
    .join("\n")
}

/// How the fake queue finishes a submitted request.
#[derive(Clone)]
pub enum Completion {
    /// Writes the artifact and reports success.
    Succeed { mime_type: Option<String> },
    /// Reports a failed status with the given reason code.
    Fail { reason: i64 },
    /// Notifies completion but keeps no status row.
    Vanish,
    /// Does nothing until the test calls `finish`.
    Manual,
}

type Listeners = Arc<Mutex<HashMap<ListenerId, Arc<dyn CompletionListener>>>>;

pub struct FakeQueue {
    completion: Mutex<Completion>,
    noise: Vec<u64>,
    next_id: AtomicU64,
    next_listener: AtomicU64,
    listeners: Listeners,
    rows: Arc<Mutex<HashMap<RequestId, DownloadStatusRow>>>,
    pub submissions: Mutex<Vec<(RequestId, DownloadRequest)>>,
    pub registrations: AtomicUsize,
    pub unregistrations: AtomicUsize,
    pub fail_submit: AtomicBool,
}

impl FakeQueue {
    pub fn new(completion: Completion) -> Arc<Self> {
        Arc::new(Self {
            completion: Mutex::new(completion),
            // Completions for other requests that reach every listener first.
            noise: vec![7, 8, 9],
            next_id: AtomicU64::new(100),
            next_listener: AtomicU64::new(1),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            rows: Arc::new(Mutex::new(HashMap::new())),
            submissions: Mutex::new(Vec::new()),
            registrations: AtomicUsize::new(0),
            unregistrations: AtomicUsize::new(0),
            fail_submit: AtomicBool::new(false),
        })
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }

    pub fn last_submission(&self) -> Option<(RequestId, DownloadRequest)> {
        self.submissions.lock().last().cloned()
    }

    pub fn notify(&self, id: RequestId) {
        broadcast(&self.listeners, id);
    }

    /// Complete a `Manual` request.
    pub fn finish(&self, id: RequestId, row: Option<DownloadStatusRow>) {
        if let Some(row) = row {
            self.rows.lock().insert(id, row);
        }
        self.notify(id);
    }

    pub async fn wait_for_submission(&self) -> RequestId {
        self.wait_for_submissions(1).await
    }

    /// Id of the `count`-th submission, once it has happened.
    pub async fn wait_for_submissions(&self, count: usize) -> RequestId {
        for _ in 0..200 {
            if let Some((id, _)) = self.submissions.lock().get(count - 1) {
                return *id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} submissions, saw {}", self.submission_count());
    }
}

fn broadcast(listeners: &Listeners, id: RequestId) {
    let snapshot: Vec<_> = listeners.lock().values().cloned().collect();
    for listener in snapshot {
        listener.on_complete(id);
    }
}

pub fn file_uri(path: &Path) -> String {
    Url::from_file_path(path).unwrap().to_string()
}

pub fn success_row(destination: &Path, mime_type: Option<String>) -> DownloadStatusRow {
    DownloadStatusRow {
        status: DownloadStatus::Successful,
        reason: None,
        local_uri: Some(file_uri(destination)),
        mime_type,
    }
}

pub fn failed_row(reason: i64) -> DownloadStatusRow {
    DownloadStatusRow {
        status: DownloadStatus::Failed,
        reason: Some(reason),
        local_uri: None,
        mime_type: None,
    }
}

#[async_trait]
impl DownloadQueue for FakeQueue {
    async fn submit(&self, request: DownloadRequest) -> Result<RequestId, UpdaterError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(UpdaterError::Queue("queue unavailable".to_string()));
        }
        let id = RequestId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.submissions.lock().push((id, request.clone()));

        let completion = self.completion.lock().clone();
        let row = match completion {
            Completion::Manual => return Ok(id),
            Completion::Succeed { mime_type } => {
                if let Some(parent) = request.destination.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&request.destination, b"artifact")?;
                Some(success_row(&request.destination, mime_type))
            }
            Completion::Fail { reason } => Some(failed_row(reason)),
            Completion::Vanish => None,
        };
        if let Some(row) = row {
            self.rows.lock().insert(id, row);
        }

        let listeners = self.listeners.clone();
        let noise = self.noise.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            for other in noise {
                broadcast(&listeners, RequestId(other));
            }
            broadcast(&listeners, id);
        });
        Ok(id)
    }

    async fn query_status(
        &self,
        id: RequestId,
    ) -> Result<Option<DownloadStatusRow>, UpdaterError> {
        Ok(self.rows.lock().get(&id).cloned())
    }

    fn register_listener(&self, listener: Arc<dyn CompletionListener>) -> ListenerId {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().insert(id, listener);
        id
    }

    fn unregister_listener(&self, id: ListenerId) -> bool {
        self.unregistrations.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().remove(&id).is_some()
    }
}

pub struct FakePage {
    body: Option<String>,
    pub calls: AtomicUsize,
}

impl FakePage {
    pub fn serving(body: String) -> Arc<Self> {
        Arc::new(Self {
            body: Some(body),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            body: None,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PageSource for FakePage {
    async fn fetch(&self, _url: &str) -> Result<String, UpdaterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.body
            .clone()
            .ok_or_else(|| UpdaterError::Command("connection refused".to_string()))
    }
}

pub struct FakeNetwork(pub bool);

#[async_trait]
impl NetworkMonitor for FakeNetwork {
    async fn is_eligible(&self) -> bool {
        self.0
    }
}

pub struct FakeRegistry(pub Option<InstalledVersion>);

#[async_trait]
impl PackageRegistry for FakeRegistry {
    async fn installed_version(&self, _package_id: &str) -> Result<InstalledVersion, UpdaterError> {
        self.0
            .clone()
            .ok_or_else(|| UpdaterError::Command("adb: device offline".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct InstallCall {
    pub artifact_uri: String,
    pub mime_type: String,
    pub request_code: i32,
    pub artifact_existed: bool,
}

pub struct FakeInstaller {
    /// `None` leaves the result to the test.
    respond_with: Option<InstallResult>,
    /// Fail the request itself instead of answering later.
    refuse: bool,
    pub calls: Mutex<Vec<InstallCall>>,
}

impl FakeInstaller {
    pub fn responding(result: InstallResult) -> Arc<Self> {
        Arc::new(Self {
            respond_with: Some(result),
            refuse: false,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn manual() -> Arc<Self> {
        Arc::new(Self {
            respond_with: None,
            refuse: false,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            respond_with: None,
            refuse: true,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub async fn wait_for_call(&self) {
        for _ in 0..200 {
            if self.call_count() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("installer was never asked");
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Installer for FakeInstaller {
    async fn request_install(
        &self,
        artifact_uri: &str,
        mime_type: &str,
        request_code: i32,
        results: Arc<InstallResultRouter>,
    ) -> Result<(), UpdaterError> {
        let path = Url::parse(artifact_uri)
            .ok()
            .and_then(|url| url.to_file_path().ok())
            .unwrap_or_else(|| PathBuf::from(artifact_uri));
        self.calls.lock().push(InstallCall {
            artifact_uri: artifact_uri.to_string(),
            mime_type: mime_type.to_string(),
            request_code,
            artifact_existed: path.exists(),
        });

        if self.refuse {
            return Err(UpdaterError::Command("no activity handles the package".to_string()));
        }

        if let Some(result) = self.respond_with.clone() {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                results.deliver(request_code, result);
            });
        }
        Ok(())
    }
}

pub struct Harness {
    pub controller: Arc<UpdateController>,
    pub queue: Arc<FakeQueue>,
    pub page: Arc<FakePage>,
    pub installer: Arc<FakeInstaller>,
    pub downloads: tempfile::TempDir,
}

pub struct HarnessBuilder {
    pub network: bool,
    pub installed: Option<InstalledVersion>,
    pub page: Arc<FakePage>,
    pub completion: Completion,
    pub installer: Arc<FakeInstaller>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            network: true,
            installed: Some(InstalledVersion::Installed("2.20.1".to_string())),
            page: FakePage::serving(vendor_page()),
            completion: Completion::Succeed {
                mime_type: Some("application/vnd.android.package-archive".to_string()),
            },
            installer: FakeInstaller::responding(InstallResult::Installed),
        }
    }
}

impl HarnessBuilder {
    pub fn build(self) -> Harness {
        let downloads = tempfile::tempdir().unwrap();
        let config = Config {
            page_url: PAGE_URL.to_string(),
            artifact_name: "App.apk".to_string(),
            downloads_dir: Some(downloads.path().to_string_lossy().into_owned()),
            ..Config::default()
        };
        let queue = FakeQueue::new(self.completion);
        let services = Services {
            page: self.page.clone(),
            network: Arc::new(FakeNetwork(self.network)),
            registry: Arc::new(FakeRegistry(self.installed)),
            queue: queue.clone(),
            installer: self.installer.clone(),
        };
        let controller = Arc::new(UpdateController::from_config(&config, services).unwrap());
        Harness {
            controller,
            queue,
            page: self.page,
            installer: self.installer,
            downloads,
        }
    }
}

impl Harness {
    pub fn artifact_path(&self) -> PathBuf {
        self.downloads.path().join(format!("App_{LATEST}.apk"))
    }
}
