//! Health records shared by the monitor and its report surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome class of one extraction attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Success,
    /// Some expected fields extracted, others missing
    Partial,
    Failed,
}

/// One extraction outcome as reported by a processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub data_type: String,
    pub strategy: String,
    pub status: ExtractionStatus,
    pub occurred_at: DateTime<Utc>,
}

impl ExtractionResult {
    #[must_use]
    pub fn new(data_type: impl Into<String>, strategy: impl Into<String>, status: ExtractionStatus) -> Self {
        Self {
            data_type: data_type.into(),
            strategy: strategy.into(),
            status,
            occurred_at: Utc::now(),
        }
    }
}

/// Overall system status folded from the health axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

/// State of a single health axis or metric bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisState {
    Healthy,
    Degraded,
    /// Per-strategy buckets below the critical success threshold
    Failing,
    Critical,
}

impl AxisState {
    /// Counts toward the "degraded axes" fold in the overall status
    #[must_use]
    pub const fn is_unhealthy(&self) -> bool {
        !matches!(self, Self::Healthy)
    }
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Kinds of alerts the monitor raises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    PerformanceDegraded,
    ErrorBurst,
    ExtractionCritical,
    StrategyFailing,
}

impl AlertType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PerformanceDegraded => "performance_degraded",
            Self::ErrorBurst => "error_burst",
            Self::ExtractionCritical => "extraction_critical",
            Self::StrategyFailing => "strategy_failing",
        }
    }
}

/// An operator-facing alert. Never deleted, only marked resolved, so the
/// alert list doubles as an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub message: String,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
}

impl Alert {
    #[must_use]
    pub fn new(alert_type: AlertType, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            message: message.into(),
            severity,
            timestamp: Utc::now(),
            resolved: false,
        }
    }
}

/// Corrective action derived from current metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Machine-readable action: "refresh-strategies", "update-strategy",
    /// "train-patterns"
    pub action: String,
    /// Strategy or data type the action targets, when applicable
    pub target: Option<String>,
    pub reason: String,
}

/// Rolling counters for one metric bucket (global, per data type or per
/// strategy)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketCounters {
    pub total: u64,
    pub successful: u64,
    pub partial: u64,
    pub failed: u64,
}

impl BucketCounters {
    pub fn record(&mut self, status: ExtractionStatus) {
        self.total += 1;
        match status {
            ExtractionStatus::Success => self.successful += 1,
            ExtractionStatus::Partial => self.partial += 1,
            ExtractionStatus::Failed => self.failed += 1,
        }
    }

    /// Success rate in [0,1]; partial extractions count half
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.successful as f64 + self.partial as f64 * 0.5) / self.total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_counters_accumulate() {
        let mut b = BucketCounters::default();
        b.record(ExtractionStatus::Success);
        b.record(ExtractionStatus::Partial);
        b.record(ExtractionStatus::Failed);
        assert_eq!(b.total, 3);
        assert_eq!(b.successful, 1);
        assert_eq!(b.partial, 1);
        assert_eq!(b.failed, 1);
        assert!((b.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_bucket_reads_healthy() {
        assert!((BucketCounters::default().success_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn alert_starts_unresolved_with_unique_id() {
        let a = Alert::new(AlertType::ErrorBurst, AlertSeverity::Warning, "burst");
        let b = Alert::new(AlertType::ErrorBurst, AlertSeverity::Warning, "burst");
        assert!(!a.resolved);
        assert_ne!(a.id, b.id);
    }
}
