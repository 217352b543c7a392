use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::transfer::DEFAULT_USER_AGENT;
use super::PageSource;
use crate::types::UpdaterError;

/// Plain HTTP GET of the vendor page.
#[derive(Clone)]
pub struct HttpPageSource {
    http: Client,
}

impl HttpPageSource {
    pub fn new(timeout: Duration) -> Result<Self, UpdaterError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(UpdaterError::Http)?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, url: &str) -> Result<String, UpdaterError> {
        debug!(url, "Fetching page");
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}
