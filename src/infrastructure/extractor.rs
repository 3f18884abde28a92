//! Extraction executor seam
//!
//! Job processors never talk to the network directly; they go through the
//! [`ExtractionExecutor`] trait, which hands back backend-neutral page
//! snapshots. The production implementation fetches over HTTP behind the
//! request gate; tests substitute fixture executors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::http_client::HttpClient;
use crate::infrastructure::rate_limiter::{GateError, RequestGate};
use crate::selector::PageSnapshot;

/// Errors crossing the executor boundary
#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(#[from] GateError),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ExtractorError {
    /// Network hiccups and timeouts are worth a retry; a hard rate-limit
    /// ceiling or a bad URL is not going to improve by itself soon.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

/// Opaque page source used by the job processors
#[async_trait]
pub trait ExtractionExecutor: Send + Sync {
    /// Fetches the category overview page
    async fn fetch_categories(&self) -> Result<PageSnapshot, ExtractorError>;

    /// Fetches one page of a category's listings
    async fn fetch_listing_page(&self, category: &str, page: u32) -> Result<PageSnapshot, ExtractorError>;

    /// Fetches a single listing's detail page
    async fn fetch_detail(&self, url: &str) -> Result<PageSnapshot, ExtractorError>;
}

/// HTTP-backed executor: reqwest client behind the request gate
pub struct HttpExtractionExecutor {
    client: HttpClient,
    gate: Arc<RequestGate>,
    base_url: Url,
}

impl HttpExtractionExecutor {
    pub fn new(config: &EngineConfig, gate: Arc<RequestGate>) -> Result<Self, ExtractorError> {
        let client = HttpClient::new(
            &config.user_agent,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        let base_url = Url::parse(&config.base_url)?;
        Ok(Self {
            client,
            gate,
            base_url,
        })
    }

    async fn fetch_snapshot(&self, url: &str) -> Result<PageSnapshot, ExtractorError> {
        self.gate.acquire().await?;
        let html = self.client.fetch_html(url).await?;
        let mut snapshot = PageSnapshot::from_html(&html);
        snapshot.source_url = Some(url.to_string());
        Ok(snapshot)
    }
}

#[async_trait]
impl ExtractionExecutor for HttpExtractionExecutor {
    async fn fetch_categories(&self) -> Result<PageSnapshot, ExtractorError> {
        let url = self.base_url.join("categories")?;
        self.fetch_snapshot(url.as_str()).await
    }

    async fn fetch_listing_page(&self, category: &str, page: u32) -> Result<PageSnapshot, ExtractorError> {
        let mut url = self.base_url.join(&format!("listings/{category}"))?;
        url.query_pairs_mut().append_pair("page", &page.to_string());
        self.fetch_snapshot(url.as_str()).await
    }

    async fn fetch_detail(&self, url: &str) -> Result<PageSnapshot, ExtractorError> {
        // detail links may be relative to the marketplace root
        let absolute = self.base_url.join(url)?;
        self.fetch_snapshot(absolute.as_str()).await
    }
}
