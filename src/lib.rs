//! Checks a vendor page for a newer release of a package, downloads it
//! through a download queue and hands it to the platform installer.

pub mod config;
pub mod controller;
pub mod coordinator;
pub mod pending;
pub mod scraper;
pub mod services;
pub mod types;
pub mod version;

pub use config::{Config, NetworkPolicy, ScrapePattern};
pub use controller::{
    Availability, ControllerState, InstallReport, Notice, Services, UpdateController, UpdateView,
    INSTALL_REQUEST_CODE,
};
pub use coordinator::{DownloadCoordinator, DownloadSettings};
pub use scraper::VersionScraper;
pub use types::{
    DownloadOutcome, FailureReason, InstallResult, InstalledVersion, UnavailableReason,
    UpdateInfo, UpdaterError,
};
