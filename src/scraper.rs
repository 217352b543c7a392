//! Extracts the latest (version, download URL) pair from the vendor page.

use regex::Regex;
use tracing::{info, warn};

use crate::config::ScrapePattern;
use crate::services::PageSource;
use crate::types::{UpdateInfo, UpdaterError};

const VERSION_TOKEN: &str = r"\d+(?:\.\d+)*";

pub struct VersionScraper {
    mode: ScrapePattern,
    combined: Regex,
    version_line: Regex,
    download_link: Regex,
}

impl VersionScraper {
    /// Build the patterns for the given installer filename, e.g. `WhatsApp.apk`.
    pub fn new(artifact_name: &str, mode: ScrapePattern) -> Result<Self, UpdaterError> {
        let artifact = regex::escape(artifact_name);
        let combined = Regex::new(&format!(
            r#"href="(?P<url>https?://\S*?/(?P<version>{VERSION_TOKEN})/{artifact})""#
        ))?;
        let version_line = Regex::new(&format!(r"Version\s*(?P<version>{VERSION_TOKEN})"))?;
        let download_link = Regex::new(&format!(
            r#"href="(?P<url>https?://\S*?/{VERSION_TOKEN}/{artifact})""#
        ))?;

        Ok(Self {
            mode,
            combined,
            version_line,
            download_link,
        })
    }

    pub fn mode(&self) -> ScrapePattern {
        self.mode
    }

    /// Scan the document line by line; the first matching line wins.
    pub fn extract(&self, document: &str) -> UpdateInfo {
        for line in document.lines().filter(|line| !line.trim().is_empty()) {
            if let Some(info) = self.match_line(line) {
                info!(version = %info.version, url = ?info.download_url, "Found latest version");
                return info;
            }
        }
        info!("No version found on page");
        UpdateInfo::not_found()
    }

    /// Fetch the page and extract from it. Transport failures become the
    /// `request failed` sentinel.
    pub async fn latest(&self, source: &dyn PageSource, url: &str) -> UpdateInfo {
        match source.fetch(url).await {
            Ok(document) => self.extract(&document),
            Err(err) => {
                warn!(url, error = ?err, "Page request failed");
                UpdateInfo::request_failed()
            }
        }
    }

    fn match_line(&self, line: &str) -> Option<UpdateInfo> {
        match self.mode {
            ScrapePattern::Combined => {
                let caps = self.combined.captures(line)?;
                Some(UpdateInfo::found(&caps["version"], &caps["url"]))
            }
            ScrapePattern::CoOccurring => {
                let version = self.version_line.captures(line)?;
                let link = self.download_link.captures(line)?;
                Some(UpdateInfo::found(&version["version"], &link["url"]))
            }
        }
    }
}
