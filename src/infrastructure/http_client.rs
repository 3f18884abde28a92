//! HTTP client for page fetching
//!
//! Thin wrapper over reqwest with the crawling-relevant knobs set: cookie
//! store, gzip, a configurable user agent and a hard per-request timeout.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::infrastructure::extractor::ExtractorError;

pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, ExtractorError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .cookie_store(true)
            .gzip(true)
            .build()
            .map_err(|e| ExtractorError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    /// Fetches one page and returns its body. Timeouts are reported as
    /// their own variant so the queue can classify them as retryable.
    pub async fn fetch_html(&self, url: &str) -> Result<String, ExtractorError> {
        debug!(%url, "fetching page");
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ExtractorError::Timeout(url.to_string())
            } else {
                ExtractorError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractorError::Network(format!(
                "{url} returned HTTP {status}"
            )));
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                ExtractorError::Timeout(url.to_string())
            } else {
                ExtractorError::Network(e.to_string())
            }
        })
    }
}
