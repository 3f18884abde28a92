//! Marketplace listing entity and record validation
//!
//! A [`ListingRecord`] is one marketplace listing keyed by its stable
//! external id. Incoming records are validated (schema plus plausibility)
//! before they reach the store; validation failures are counted by the
//! processors, never thrown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marketplace listing lifecycle states as shown on the site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    UnderOffer,
    Sold,
    Ended,
}

impl ListingStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::UnderOffer => "under_offer",
            Self::Sold => "sold",
            Self::Ended => "ended",
        }
    }

    /// Parses the loosely formatted status labels the site renders
    #[must_use]
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "active" | "open" | "for_sale" => Some(Self::Active),
            "under_offer" | "pending" => Some(Self::UnderOffer),
            "sold" => Some(Self::Sold),
            "ended" | "closed" | "expired" => Some(Self::Ended),
            _ => None,
        }
    }
}

/// One marketplace listing record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    /// Stable external id, globally unique in the store
    pub listing_id: String,
    pub title: String,
    pub url: String,
    pub asking_price: Option<f64>,
    pub monthly_revenue: Option<f64>,
    pub monthly_profit: Option<f64>,
    pub profit_multiple: Option<f64>,
    pub revenue_multiple: Option<f64>,
    pub category: String,
    pub listing_status: ListingStatus,
    /// Opaque snapshot of everything extracted from the page
    pub raw_snapshot: serde_json::Value,
    /// Externally verified revenue/traffic figures
    pub verified: bool,
    pub scraped_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl ListingRecord {
    /// Creates a record with timestamps stamped now
    #[must_use]
    pub fn new(listing_id: impl Into<String>, title: impl Into<String>, category: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            listing_id: listing_id.into(),
            title: title.into(),
            url: String::new(),
            asking_price: None,
            monthly_revenue: None,
            monthly_profit: None,
            profit_multiple: None,
            revenue_multiple: None,
            category: category.into(),
            listing_status: ListingStatus::Active,
            raw_snapshot: serde_json::Value::Null,
            verified: false,
            scraped_at: now,
            last_updated: now,
        }
    }

    /// blake3 hash of the raw snapshot, used for cheap drift detection on
    /// the opaque column without participating in CHANGED classification
    #[must_use]
    pub fn snapshot_hash(&self) -> String {
        let canonical = self.raw_snapshot.to_string();
        blake3::hash(canonical.as_bytes()).to_hex().to_string()
    }

    /// High-value predicate used to gate `detail_fetch` follow-ons
    #[must_use]
    pub fn is_high_value(&self, threshold: f64) -> bool {
        self.verified || self.asking_price.is_some_and(|p| p >= threshold)
    }

    /// Schema and plausibility validation. Returns all issues found so
    /// callers can count and log them in one pass.
    pub fn validate(&self) -> Result<(), Vec<ValidationIssue>> {
        let mut issues = Vec::new();

        if self.listing_id.trim().is_empty() {
            issues.push(ValidationIssue::MissingField("listing_id"));
        }
        if self.title.trim().is_empty() {
            issues.push(ValidationIssue::MissingField("title"));
        }
        if self.category.trim().is_empty() {
            issues.push(ValidationIssue::MissingField("category"));
        }

        if let Some(price) = self.asking_price {
            if !(1.0..=1_000_000_000.0).contains(&price) {
                issues.push(ValidationIssue::Implausible {
                    field: "asking_price",
                    value: price,
                });
            }
        }
        for (field, value) in [
            ("monthly_revenue", self.monthly_revenue),
            ("monthly_profit", self.monthly_profit),
        ] {
            if let Some(v) = value {
                if !(0.0..=100_000_000.0).contains(&v) {
                    issues.push(ValidationIssue::Implausible { field, value: v });
                }
            }
        }
        for (field, value) in [
            ("profit_multiple", self.profit_multiple),
            ("revenue_multiple", self.revenue_multiple),
        ] {
            if let Some(m) = value {
                if !(0.1..=1000.0).contains(&m) {
                    issues.push(ValidationIssue::Implausible { field, value: m });
                }
            }
        }
        // Profit above revenue is a parse artifact, not a real business
        if let (Some(profit), Some(revenue)) = (self.monthly_profit, self.monthly_revenue) {
            if revenue > 0.0 && profit > revenue * 1.01 {
                issues.push(ValidationIssue::ProfitExceedsRevenue { profit, revenue });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    /// Normalizes a detail-page record before upsert: trims text fields,
    /// rounds money to cents and backfills multiples where derivable.
    pub fn normalize(&mut self) {
        self.title = self.title.trim().to_string();
        self.category = self.category.trim().to_lowercase();

        let round_cents = |v: f64| (v * 100.0).round() / 100.0;
        self.asking_price = self.asking_price.map(round_cents);
        self.monthly_revenue = self.monthly_revenue.map(round_cents);
        self.monthly_profit = self.monthly_profit.map(round_cents);

        // Annualized multiples derived from monthly figures
        if self.profit_multiple.is_none() {
            if let (Some(price), Some(profit)) = (self.asking_price, self.monthly_profit) {
                if profit > 0.0 {
                    self.profit_multiple = Some(round_cents(price / (profit * 12.0)));
                }
            }
        }
        if self.revenue_multiple.is_none() {
            if let (Some(price), Some(revenue)) = (self.asking_price, self.monthly_revenue) {
                if revenue > 0.0 {
                    self.revenue_multiple = Some(round_cents(price / (revenue * 12.0)));
                }
            }
        }
    }
}

/// How a tracked field changed, for the price history log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    AskingPrice,
    ProfitMultiple,
    RevenueMultiple,
    ListingStatus,
}

impl ChangeKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AskingPrice => "askingPrice",
            Self::ProfitMultiple => "profitMultiple",
            Self::RevenueMultiple => "revenueMultiple",
            Self::ListingStatus => "listingStatus",
        }
    }
}

/// One logged change of a tracked field, appended before the update that
/// caused it commits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub listing_id: String,
    pub field_type: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Per-record validation problems. Absorbed at the processor boundary and
/// surfaced only as counts in the job result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationIssue {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("implausible {field}: {value}")]
    Implausible { field: &'static str, value: f64 },

    #[error("monthly profit {profit} exceeds monthly revenue {revenue}")]
    ProfitExceedsRevenue { profit: f64, revenue: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ListingRecord {
        let mut rec = ListingRecord::new("fl-1001", "Profitable SaaS tool", "saas");
        rec.url = "https://market.example/listing/fl-1001".to_string();
        rec.asking_price = Some(120_000.0);
        rec.monthly_revenue = Some(5_000.0);
        rec.monthly_profit = Some(4_000.0);
        rec.raw_snapshot = json!({"title": "Profitable SaaS tool"});
        rec
    }

    #[test]
    fn valid_record_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn missing_id_and_absurd_price_are_both_reported() {
        let mut rec = sample();
        rec.listing_id = "  ".to_string();
        rec.asking_price = Some(-5.0);
        let issues = rec.validate().unwrap_err();
        assert_eq!(issues.len(), 2);
        assert!(issues.contains(&ValidationIssue::MissingField("listing_id")));
    }

    #[test]
    fn profit_above_revenue_is_flagged() {
        let mut rec = sample();
        rec.monthly_profit = Some(9_000.0);
        let issues = rec.validate().unwrap_err();
        assert!(matches!(
            issues[0],
            ValidationIssue::ProfitExceedsRevenue { .. }
        ));
    }

    #[test]
    fn normalize_backfills_multiples() {
        let mut rec = sample();
        rec.normalize();
        // 120_000 / (4_000 * 12) = 2.5
        assert_eq!(rec.profit_multiple, Some(2.5));
        assert_eq!(rec.revenue_multiple, Some(2.0));
    }

    #[test]
    fn snapshot_hash_tracks_content() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a.snapshot_hash(), b.snapshot_hash());
        b.raw_snapshot = json!({"title": "Different"});
        assert_ne!(a.snapshot_hash(), b.snapshot_hash());
    }

    #[test]
    fn high_value_predicate_price_or_verified() {
        let mut rec = sample();
        assert!(rec.is_high_value(100_000.0));
        rec.asking_price = Some(10_000.0);
        assert!(!rec.is_high_value(100_000.0));
        rec.verified = true;
        assert!(rec.is_high_value(100_000.0));
    }

    #[test]
    fn status_parses_site_labels() {
        assert_eq!(
            ListingStatus::parse_lenient(" Under Offer "),
            Some(ListingStatus::UnderOffer)
        );
        assert_eq!(ListingStatus::parse_lenient("SOLD"), Some(ListingStatus::Sold));
        assert_eq!(ListingStatus::parse_lenient("banana"), None);
    }
}
