use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const NOT_FOUND: &str = "not found";
pub const REQUEST_FAILED: &str = "request failed";
pub const NO_NETWORK: &str = "no network";
pub const NOT_INSTALLED: &str = "not installed";
pub const UNKNOWN_VERSION: &str = "unknown";

pub const APK_MIME_TYPE: &str = "application/vnd.android.package-archive";

#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Command failed: {0}")]
    Command(String),
    #[error("Download queue error: {0}")]
    Queue(String),
    #[error("Busy: {0} in progress")]
    Busy(&'static str),
    #[error("No update available to install")]
    NoUpdateAvailable,
    #[error("A download is already pending")]
    DownloadInProgress,
    #[error("An install is already pending")]
    InstallInProgress,
    #[error("Invalid version token: {0}")]
    InvalidVersion(String),
}

/// Latest version as discovered on the vendor page.
///
/// A missing `download_url` means the version string carries an
/// informational sentinel instead of a real version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub version: String,
    pub download_url: Option<String>,
}

impl UpdateInfo {
    pub fn found(version: impl Into<String>, download_url: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            download_url: Some(download_url.into()),
        }
    }

    pub fn not_found() -> Self {
        Self::sentinel(NOT_FOUND)
    }

    pub fn request_failed() -> Self {
        Self::sentinel(REQUEST_FAILED)
    }

    pub fn no_network() -> Self {
        Self::sentinel(NO_NETWORK)
    }

    fn sentinel(text: &str) -> Self {
        Self {
            version: text.to_string(),
            download_url: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.download_url.is_some()
    }

    /// Why no update could be offered, if that is the case.
    pub fn unavailable_reason(&self) -> Option<UnavailableReason> {
        if self.download_url.is_some() {
            return None;
        }
        Some(match self.version.as_str() {
            NO_NETWORK => UnavailableReason::NoNetwork,
            REQUEST_FAILED => UnavailableReason::RequestFailed,
            _ => UnavailableReason::NotFound,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    NoNetwork,
    RequestFailed,
    NotFound,
}

/// Why a download did not produce a usable artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "code")]
pub enum FailureReason {
    Unknown,
    FileError,
    UnhandledHttpCode,
    HttpDataError,
    TooManyRedirects,
    InsufficientSpace,
    DeviceNotFound,
    CannotResume,
    FileAlreadyExists,
    HttpStatus(u16),
    Other(i64),
    /// The queue had no status row for a request it just reported complete.
    QueryInconsistent,
    /// No completion arrived within the configured timeout.
    TimedOut,
    /// The session was torn down while the download was pending.
    Abandoned,
}

impl FailureReason {
    pub const UNKNOWN_CODE: i64 = 1000;
    pub const FILE_ERROR_CODE: i64 = 1001;
    pub const HTTP_DATA_ERROR_CODE: i64 = 1004;
    pub const TOO_MANY_REDIRECTS_CODE: i64 = 1005;

    pub fn from_code(code: i64) -> Self {
        match code {
            1000 => Self::Unknown,
            1001 => Self::FileError,
            1002 => Self::UnhandledHttpCode,
            1004 => Self::HttpDataError,
            1005 => Self::TooManyRedirects,
            1006 => Self::InsufficientSpace,
            1007 => Self::DeviceNotFound,
            1008 => Self::CannotResume,
            1009 => Self::FileAlreadyExists,
            100..=599 => Self::HttpStatus(code as u16),
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown error"),
            Self::FileError => write!(f, "storage error"),
            Self::UnhandledHttpCode => write!(f, "unhandled HTTP code"),
            Self::HttpDataError => write!(f, "HTTP data error"),
            Self::TooManyRedirects => write!(f, "too many redirects"),
            Self::InsufficientSpace => write!(f, "insufficient space"),
            Self::DeviceNotFound => write!(f, "storage device not found"),
            Self::CannotResume => write!(f, "cannot resume"),
            Self::FileAlreadyExists => write!(f, "file already exists"),
            Self::HttpStatus(code) => write!(f, "HTTP status {code}"),
            Self::Other(code) => write!(f, "reason code {code}"),
            Self::QueryInconsistent => write!(f, "download status unavailable"),
            Self::TimedOut => write!(f, "timed out waiting for completion"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Result of one download request, produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadOutcome {
    pub succeeded: bool,
    pub artifact_location: Option<String>,
    pub mime_type: Option<String>,
    pub failure_reason: Option<FailureReason>,
}

impl DownloadOutcome {
    pub fn success(artifact_location: String, mime_type: Option<String>) -> Self {
        Self {
            succeeded: true,
            artifact_location: Some(artifact_location),
            mime_type,
            failure_reason: None,
        }
    }

    pub fn failure(reason: FailureReason) -> Self {
        Self {
            succeeded: false,
            artifact_location: None,
            mime_type: None,
            failure_reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallResult {
    Installed,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstalledVersion {
    Installed(String),
    NotInstalled,
}

impl InstalledVersion {
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::Installed(version) => Some(version),
            Self::NotInstalled => None,
        }
    }

    pub fn display(&self) -> String {
        match self {
            Self::Installed(version) => version.clone(),
            Self::NotInstalled => NOT_INSTALLED.to_string(),
        }
    }
}
