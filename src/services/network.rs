use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use super::NetworkMonitor;
use crate::config::NetworkPolicy;

const SYSFS_NET: &str = "/sys/class/net";

/// Decides eligibility from the interfaces listed under `/sys/class/net`.
///
/// `Wifi` needs a wireless interface whose `operstate` is `up`; `Any`
/// accepts any non-loopback interface that is up.
pub struct SysfsNetworkMonitor {
    root: PathBuf,
    policy: NetworkPolicy,
}

impl SysfsNetworkMonitor {
    pub fn new(policy: NetworkPolicy) -> Self {
        Self::with_root(SYSFS_NET, policy)
    }

    pub fn with_root(root: impl Into<PathBuf>, policy: NetworkPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    async fn qualifying_interface(&self) -> Option<String> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %self.root.display(), error = ?err, "Cannot list network interfaces");
                return None;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "lo" {
                continue;
            }
            let iface = entry.path();
            if !is_up(&iface).await {
                continue;
            }
            if self.policy == NetworkPolicy::Wifi && !is_wireless(&iface).await {
                continue;
            }
            return Some(name);
        }
        None
    }
}

async fn is_up(iface: &Path) -> bool {
    match fs::read_to_string(iface.join("operstate")).await {
        Ok(state) => state.trim() == "up",
        Err(_) => false,
    }
}

async fn is_wireless(iface: &Path) -> bool {
    fs::metadata(iface.join("wireless")).await.is_ok()
        || fs::metadata(iface.join("phy80211")).await.is_ok()
}

#[async_trait]
impl NetworkMonitor for SysfsNetworkMonitor {
    async fn is_eligible(&self) -> bool {
        if self.policy == NetworkPolicy::Always {
            return true;
        }
        match self.qualifying_interface().await {
            Some(iface) => {
                debug!(iface = %iface, policy = ?self.policy, "Network eligible");
                true
            }
            None => {
                debug!(policy = ?self.policy, "No qualifying network interface");
                false
            }
        }
    }
}
