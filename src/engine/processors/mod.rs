//! Typed job processors
//!
//! One processor per job type. Each is a function of the job's config:
//! side effects are confined to selector-generator lookups, dedup-store
//! writes, health recording and follow-on `add_job` calls. Record-level
//! problems are absorbed and counted here; only infrastructure failures
//! propagate to the queue's retry logic.

pub mod category_scan;
pub mod detail_fetch;
pub mod listing_scan;
pub mod statistics;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::domain::job::{Job, JobOutcome, JobType};
use crate::domain::listing::{ListingRecord, ListingStatus};
use crate::domain::selector::{DataType, SelectorCandidate};
use crate::engine::error::EngineError;
use crate::engine::progress::ProgressSender;
use crate::engine::queue_manager::QueueManager;
use crate::engine::session::SessionManager;
use crate::health::HealthMonitor;
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::extractor::ExtractionExecutor;
use crate::infrastructure::listing_repository::ListingStore;
use crate::selector::discovery::{parse_currency, parse_multiple};
use crate::selector::{PageSnapshot, SelectorGenerator};

/// Everything a processor may touch
#[derive(Clone)]
pub struct ProcessorContext {
    pub config: Arc<EngineConfig>,
    pub store: Arc<ListingStore>,
    pub generator: Arc<SelectorGenerator>,
    pub monitor: Arc<HealthMonitor>,
    pub executor: Arc<dyn ExtractionExecutor>,
    pub sessions: Arc<SessionManager>,
    pub progress: ProgressSender,
    pub queue: QueueManager,
}

/// One typed job handler
#[async_trait]
pub trait JobProcessor: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn process(&self, job: &Job, ctx: &ProcessorContext) -> Result<JobOutcome, EngineError>;
}

pub type ProcessorRegistry = HashMap<JobType, Arc<dyn JobProcessor>>;

/// The standard processor set, one handler per job type
#[must_use]
pub fn default_registry() -> ProcessorRegistry {
    let processors: Vec<Arc<dyn JobProcessor>> = vec![
        Arc::new(category_scan::CategoryScanProcessor),
        Arc::new(listing_scan::ListingScanProcessor),
        Arc::new(detail_fetch::DetailFetchProcessor),
        Arc::new(statistics::StatisticsProcessor),
    ];
    processors
        .into_iter()
        .map(|p| (p.job_type(), p))
        .collect()
}

/// Field data types extracted per listing
pub(crate) const LISTING_FIELDS: [DataType; 5] = [
    DataType::Title,
    DataType::Price,
    DataType::Revenue,
    DataType::Multiple,
    DataType::Status,
];

/// Finds the repeating card containers on a listing page: the largest
/// group of sibling elements sharing a structural signature with at least
/// two members and real content underneath.
pub(crate) fn discover_listing_cards(page: &PageSnapshot) -> Vec<usize> {
    let mut groups: HashMap<(Option<usize>, (String, Vec<String>, usize)), Vec<usize>> =
        HashMap::new();
    for el in page.elements() {
        if el.child_count < 2 {
            continue;
        }
        groups
            .entry((el.parent, el.structural_signature()))
            .or_default()
            .push(el.index);
    }

    let mut best: Option<Vec<usize>> = None;
    for (_, members) in groups {
        if members.len() < 2 {
            continue;
        }
        let better = match &best {
            None => true,
            Some(current) => {
                members.len() > current.len()
                    || (members.len() == current.len() && members[0] < current[0])
            }
        };
        if better {
            best = Some(members);
        }
    }
    let mut cards = best.unwrap_or_default();
    cards.sort_unstable();
    cards
}

/// True when `el` sits inside the subtree rooted at `root`
pub(crate) fn is_within(page: &PageSnapshot, root: usize, el_index: usize) -> bool {
    let mut cursor = page.elements()[el_index].parent;
    while let Some(idx) = cursor {
        if idx == root {
            return true;
        }
        cursor = page.elements()[idx].parent;
    }
    false
}

/// First text the selector yields inside one card's subtree
pub(crate) fn field_text_in_card(
    page: &PageSnapshot,
    card: usize,
    candidate: &SelectorCandidate,
) -> Option<String> {
    page.select(&candidate.expression)
        .into_iter()
        .find(|el| is_within(page, card, el.index))
        .map(|el| el.text.clone())
}

/// Active selector for a data type, discovering and adopting one from the
/// live page when none exists yet
pub(crate) fn ensure_selector(
    ctx: &ProcessorContext,
    page: &PageSnapshot,
    data_type: DataType,
) -> Option<SelectorCandidate> {
    if let Some(active) = ctx.generator.active_for(data_type) {
        return Some(active);
    }
    let discovered = ctx.generator.discover_patterns(page, data_type);
    let best = discovered.into_iter().next()?;
    ctx.generator.adopt(best.clone());
    Some(best)
}

/// Stable listing id and url pulled from a card: an explicit
/// data-listing-id wins, otherwise the first listing link's trailing path
/// segment.
pub(crate) fn identify_card(page: &PageSnapshot, card: usize) -> Option<(String, String)> {
    let card_el = &page.elements()[card];

    let link = page
        .elements()
        .iter()
        .filter(|el| el.index == card || is_within(page, card, el.index))
        .find_map(|el| {
            if el.tag == "a" {
                el.attr("href").map(str::to_string)
            } else {
                None
            }
        });

    if let Some(id) = card_el.attr("data-listing-id") {
        let url = link.unwrap_or_default();
        return Some((id.to_string(), url));
    }

    let href = link?;
    let id = href
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())?
        .to_string();
    Some((id, href))
}

/// Raw field values extracted from one card
#[derive(Debug, Default)]
pub(crate) struct ExtractedFields {
    pub title: Option<String>,
    pub price: Option<String>,
    pub revenue: Option<String>,
    pub multiple: Option<String>,
    pub status: Option<String>,
}

impl ExtractedFields {
    pub(crate) fn set(&mut self, data_type: DataType, value: Option<String>) {
        match data_type {
            DataType::Title => self.title = value,
            DataType::Price => self.price = value,
            DataType::Revenue => self.revenue = value,
            DataType::Multiple => self.multiple = value,
            DataType::Status => self.status = value,
        }
    }
}

/// Builds a listing record from extracted card fields. Returns None when
/// the card yields no usable identity.
pub(crate) fn build_record(
    category: &str,
    id: &str,
    url: &str,
    fields: &ExtractedFields,
) -> Option<ListingRecord> {
    let title = fields.title.clone()?;
    let mut record = ListingRecord::new(id, title, category);
    record.url = url.to_string();
    record.asking_price = fields.price.as_deref().and_then(parse_currency);
    record.monthly_revenue = fields.revenue.as_deref().and_then(parse_currency);
    record.profit_multiple = fields.multiple.as_deref().and_then(parse_multiple);
    record.listing_status = fields
        .status
        .as_deref()
        .and_then(ListingStatus::parse_lenient)
        .unwrap_or(ListingStatus::Active);
    record.raw_snapshot = json!({
        "title": fields.title,
        "price": fields.price,
        "revenue": fields.revenue,
        "multiple": fields.multiple,
        "status": fields.status,
        "url": url,
    });
    Some(record)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use crate::engine::progress::progress_channel;
    use crate::engine::queue_manager::QueueManager;
    use crate::engine::session::SessionManager;
    use crate::health::{HealthMonitor, HealthThresholds};
    use crate::infrastructure::config::EngineConfig;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use crate::infrastructure::extractor::{ExtractionExecutor, ExtractorError};
    use crate::infrastructure::listing_repository::ListingStore;
    use crate::selector::{PageSnapshot, SelectorGenerator};

    use super::ProcessorContext;

    /// Serves canned page snapshots and records the requested URLs
    pub struct FixtureExecutor {
        pub categories: String,
        pub listing_pages: Vec<String>,
        pub detail: String,
        pub requests: Mutex<Vec<String>>,
        pub fail_with: Option<ExtractorError>,
    }

    impl Default for FixtureExecutor {
        fn default() -> Self {
            Self {
                categories: "<html><body></body></html>".to_string(),
                listing_pages: Vec::new(),
                detail: "<html><body></body></html>".to_string(),
                requests: Mutex::new(Vec::new()),
                fail_with: None,
            }
        }
    }

    #[async_trait]
    impl ExtractionExecutor for FixtureExecutor {
        async fn fetch_categories(&self) -> Result<PageSnapshot, ExtractorError> {
            if let Some(e) = &self.fail_with {
                return Err(clone_error(e));
            }
            self.requests.lock().await.push("categories".to_string());
            Ok(PageSnapshot::from_html(&self.categories))
        }

        async fn fetch_listing_page(
            &self,
            category: &str,
            page: u32,
        ) -> Result<PageSnapshot, ExtractorError> {
            if let Some(e) = &self.fail_with {
                return Err(clone_error(e));
            }
            self.requests
                .lock()
                .await
                .push(format!("{category}:{page}"));
            let html = self
                .listing_pages
                .get((page as usize).saturating_sub(1))
                .cloned()
                .unwrap_or_else(|| "<html><body></body></html>".to_string());
            Ok(PageSnapshot::from_html(&html))
        }

        async fn fetch_detail(&self, url: &str) -> Result<PageSnapshot, ExtractorError> {
            if let Some(e) = &self.fail_with {
                return Err(clone_error(e));
            }
            self.requests.lock().await.push(format!("detail:{url}"));
            Ok(PageSnapshot::from_html(&self.detail))
        }
    }

    fn clone_error(e: &ExtractorError) -> ExtractorError {
        match e {
            ExtractorError::Network(m) => ExtractorError::Network(m.clone()),
            ExtractorError::Timeout(m) => ExtractorError::Timeout(m.clone()),
            other => ExtractorError::Network(other.to_string()),
        }
    }

    /// Full context over an in-memory store and a fixture executor
    pub async fn context(executor: FixtureExecutor) -> ProcessorContext {
        let config = Arc::new(EngineConfig::default());
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let store = Arc::new(ListingStore::new(db.pool().clone(), config.store.chunk_size));
        let (progress, _progress_rx) = progress_channel();
        ProcessorContext {
            queue: QueueManager::new(config.queue.clone()),
            store,
            generator: Arc::new(SelectorGenerator::new()),
            monitor: Arc::new(HealthMonitor::new(HealthThresholds::default())),
            executor: Arc::new(executor),
            sessions: Arc::new(SessionManager::new()),
            progress,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRID: &str = r#"
        <html><body>
          <div class="results">
            <div class="listing-card" data-listing-id="fl-1">
              <a href="/listing/fl-1"><h3 class="listing-title">Profitable SaaS analytics tool</h3></a>
              <span class="price">$120,000</span>
            </div>
            <div class="listing-card" data-listing-id="fl-2">
              <a href="/listing/fl-2"><h3 class="listing-title">Established content website</h3></a>
              <span class="price">$45,000</span>
            </div>
          </div>
        </body></html>
    "#;

    #[test]
    fn card_discovery_finds_the_repeating_group() {
        let page = PageSnapshot::from_html(GRID);
        let cards = discover_listing_cards(&page);
        assert_eq!(cards.len(), 2);
        for idx in cards {
            assert!(page.elements()[idx]
                .classes
                .contains(&"listing-card".to_string()));
        }
    }

    #[test]
    fn card_identity_prefers_data_attribute() {
        let page = PageSnapshot::from_html(GRID);
        let cards = discover_listing_cards(&page);
        let (id, url) = identify_card(&page, cards[0]).unwrap();
        assert_eq!(id, "fl-1");
        assert_eq!(url, "/listing/fl-1");
    }

    #[test]
    fn record_building_parses_money_and_defaults_status() {
        let mut fields = ExtractedFields::default();
        fields.set(DataType::Title, Some("Profitable SaaS analytics tool".into()));
        fields.set(DataType::Price, Some("$120,000".into()));
        fields.set(DataType::Multiple, Some("3.2x".into()));
        let record = build_record("saas", "fl-1", "/listing/fl-1", &fields).unwrap();
        assert_eq!(record.asking_price, Some(120_000.0));
        assert_eq!(record.profit_multiple, Some(3.2));
        assert_eq!(record.listing_status, ListingStatus::Active);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn titleless_card_yields_no_record() {
        let fields = ExtractedFields::default();
        assert!(build_record("saas", "fl-1", "", &fields).is_none());
    }
}
