//! Streams a single HTTP response body to disk for the local queue.

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::types::UpdaterError;

pub const DEFAULT_USER_AGENT: &str = "whats-updater";

/// Bytes received so far against the advertised length.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferProgress {
    pub received: u64,
    pub expected: Option<u64>,
}

impl TransferProgress {
    pub fn percent(&self) -> Option<u8> {
        self.expected.map(|total| {
            if total == 0 {
                100
            } else {
                (self.received.saturating_mul(100) / total).min(100) as u8
            }
        })
    }
}

/// What the server told us about a completed transfer.
#[derive(Debug, Clone)]
pub struct Transferred {
    pub bytes: u64,
    pub content_type: Option<String>,
}

/// GET `url` into `target`, logging whenever the whole percentage moves.
pub async fn fetch_to_file(
    client: &Client,
    url: &str,
    target: &Path,
    timeout: Option<Duration>,
) -> Result<Transferred, UpdaterError> {
    let mut request = client.get(url);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    let mut response = request.send().await?.error_for_status()?;
    let content_type = media_type(&response);
    let mut progress = TransferProgress {
        received: 0,
        expected: response.content_length(),
    };
    let mut logged = None;

    let mut file = File::create(target).await?;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        progress.received = progress.received.saturating_add(chunk.len() as u64);
        let percent = progress.percent();
        if percent != logged {
            debug!(url, percent = ?percent, bytes = progress.received, "Download progress");
            logged = percent;
        }
    }
    file.flush().await?;

    Ok(Transferred {
        bytes: progress.received,
        content_type,
    })
}

/// Content type without parameters, e.g. `text/html` for `text/html; charset=utf-8`.
fn media_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
