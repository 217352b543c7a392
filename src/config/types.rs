use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the updater application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_package_id")]
    pub package_id: String,

    #[serde(default = "default_page_url")]
    pub page_url: String,

    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,

    #[serde(default)]
    pub scrape_pattern: ScrapePattern,

    #[serde(default)]
    pub downloads_dir: Option<String>,

    #[serde(default)]
    pub network_policy: NetworkPolicy,

    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,

    #[serde(default = "default_version_command")]
    pub version_command: Vec<String>,

    #[serde(default = "default_download_title")]
    pub download_title: String,

    #[serde(default = "default_download_description")]
    pub download_description: String,

    /// Upper bound on waiting for the download queue's completion notification.
    /// Unset means wait indefinitely.
    #[serde(default)]
    pub completion_timeout_secs: Option<u64>,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

/// Which line pattern the scraper applies to the vendor page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapePattern {
    /// One anchor pattern yields both the URL and the version embedded in its path.
    #[default]
    Combined,
    /// A `Version x.y.z` pattern and an anchor pattern must both match the same line.
    CoOccurring,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
    #[default]
    Wifi,
    Any,
    Always,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            package_id: default_package_id(),
            page_url: default_page_url(),
            artifact_name: default_artifact_name(),
            scrape_pattern: ScrapePattern::default(),
            downloads_dir: None,
            network_policy: NetworkPolicy::default(),
            install_command: default_install_command(),
            version_command: default_version_command(),
            download_title: default_download_title(),
            download_description: default_download_description(),
            completion_timeout_secs: None,
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl Config {
    pub fn completion_timeout(&self) -> Option<Duration> {
        self.completion_timeout_secs.map(Duration::from_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn downloads_dir_override(&self) -> Option<PathBuf> {
        self.downloads_dir
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
    }
}

fn default_package_id() -> String {
    "com.whatsapp".to_string()
}

fn default_page_url() -> String {
    "http://www.whatsapp.com/android/".to_string()
}

fn default_artifact_name() -> String {
    "WhatsApp.apk".to_string()
}

fn default_install_command() -> Vec<String> {
    ["adb", "install", "-r", "{artifact}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_version_command() -> Vec<String> {
    ["adb", "shell", "dumpsys", "package", "{package}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_download_title() -> String {
    "WhatsApp".to_string()
}

fn default_download_description() -> String {
    "Downloading update".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: Config = serde_json::from_str(concat!(
            r#"{ "artifact_name": "App.apk", "scrape_pattern": "co_occurring","#,
            r#" "network_policy": "any" }"#,
        ))
        .unwrap();

        assert_eq!(config.artifact_name, "App.apk");
        assert_eq!(config.scrape_pattern, ScrapePattern::CoOccurring);
        assert_eq!(config.network_policy, NetworkPolicy::Any);
        assert_eq!(config.package_id, "com.whatsapp");
        assert_eq!(config.install_command[0], "adb");
        assert!(config.completion_timeout().is_none());
    }

    #[test]
    fn blank_downloads_dir_is_ignored() {
        let config = Config {
            downloads_dir: Some("  ".to_string()),
            ..Config::default()
        };
        assert!(config.downloads_dir_override().is_none());
    }
}
