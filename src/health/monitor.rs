//! Health monitor implementation
//!
//! All counters live behind one short-lived lock. Recording methods take
//! `&self`, return nothing and swallow nothing: every error increments a
//! queryable metric even when it aborts no work.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::domain::health::{
    Alert, AlertSeverity, AlertType, AxisState, BucketCounters, ExtractionResult, HealthStatus,
    Recommendation,
};

/// Bounded rolling history of extraction results
const HISTORY_LIMIT: usize = 500;
/// Bounded error log
const ERROR_LOG_LIMIT: usize = 200;
/// Errors shown in the report summary
const SUMMARY_ERROR_COUNT: usize = 5;
/// Minimum samples before a strategy bucket can be marked failing
const STRATEGY_MIN_SAMPLES: u64 = 5;
/// Minimum samples before train-patterns fires for a data type
const TRAIN_PATTERNS_MIN_SAMPLES: u64 = 10;

/// Alert and degradation thresholds, consumed from the engine config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Average extraction time that raises a performance alert
    pub performance_alert: Duration,
    /// Average extraction time that degrades the performance axis
    pub performance_degraded: Duration,
    /// Timeout ratio that degrades the performance axis
    pub timeout_ratio_degraded: f64,
    /// Errors within the burst window that raise an alert
    pub error_burst_count: usize,
    pub error_burst_window: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            performance_alert: Duration::from_secs(20),
            performance_degraded: Duration::from_secs(30),
            timeout_ratio_degraded: 0.1,
            error_burst_count: 10,
            error_burst_window: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ErrorEntry {
    message: String,
    context: String,
    occurred_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PerformanceCounters {
    samples: u64,
    total_ms: u64,
    min_ms: Option<u64>,
    max_ms: u64,
    timeouts: u64,
}

impl PerformanceCounters {
    fn avg_ms(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.samples as f64
        }
    }

    fn timeout_ratio(&self) -> f64 {
        let total = self.samples + self.timeouts;
        if total == 0 {
            0.0
        } else {
            self.timeouts as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    overall: BucketCounters,
    by_data_type: HashMap<String, BucketCounters>,
    by_strategy: HashMap<String, BucketCounters>,
    history: VecDeque<ExtractionResult>,
    performance: PerformanceCounters,
    errors: VecDeque<ErrorEntry>,
    alerts: Vec<Alert>,
}

/// Per-bucket block of the health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketReport {
    pub total: u64,
    pub successful: u64,
    pub partial: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub state: AxisState,
}

/// Summary block of the health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total_extractions: u64,
    pub successful: u64,
    pub partial: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub avg_extraction_ms: f64,
    pub min_extraction_ms: Option<u64>,
    pub max_extraction_ms: u64,
    pub timeout_count: u64,
    pub recent_errors: Vec<String>,
    pub unresolved_alerts: Vec<Alert>,
}

/// Full health report surfaced to operators and the web layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub summary: HealthSummary,
    pub data_types: HashMap<String, BucketReport>,
    pub strategies: HashMap<String, BucketReport>,
    pub recommendations: Vec<Recommendation>,
    pub generated_at: DateTime<Utc>,
}

/// Scores extraction and performance quality and raises alerts
#[derive(Debug, Default)]
pub struct HealthMonitor {
    thresholds: HealthThresholds,
    state: RwLock<MonitorState>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            state: RwLock::new(MonitorState::default()),
        }
    }

    /// Records one extraction outcome and recomputes health-driven alerts
    pub fn record_extraction_result(&self, result: ExtractionResult) {
        let mut state = self.state.write().expect("health state poisoned");
        state.overall.record(result.status);
        state
            .by_data_type
            .entry(result.data_type.clone())
            .or_default()
            .record(result.status);
        state
            .by_strategy
            .entry(result.strategy.clone())
            .or_default()
            .record(result.status);
        state.history.push_back(result);
        while state.history.len() > HISTORY_LIMIT {
            state.history.pop_front();
        }
        Self::recompute_alerts(&mut state);
    }

    /// Records one extraction duration, or a timeout
    pub fn record_performance(&self, duration: Duration, timed_out: bool) {
        let mut state = self.state.write().expect("health state poisoned");
        if timed_out {
            state.performance.timeouts += 1;
        } else {
            let ms = duration.as_millis() as u64;
            state.performance.samples += 1;
            state.performance.total_ms += ms;
            state.performance.max_ms = state.performance.max_ms.max(ms);
            state.performance.min_ms =
                Some(state.performance.min_ms.map_or(ms, |min| min.min(ms)));
        }

        let avg = state.performance.avg_ms();
        if avg > self.thresholds.performance_alert.as_millis() as f64 {
            Self::raise_alert(
                &mut state,
                AlertType::PerformanceDegraded,
                AlertSeverity::Warning,
                format!("average extraction time {avg:.0}ms exceeds threshold"),
            );
        }
    }

    /// Appends to the bounded error log and checks for an error burst
    pub fn record_error(&self, error: &str, context: &str) {
        let mut state = self.state.write().expect("health state poisoned");
        state.errors.push_back(ErrorEntry {
            message: error.to_string(),
            context: context.to_string(),
            occurred_at: Utc::now(),
        });
        while state.errors.len() > ERROR_LOG_LIMIT {
            state.errors.pop_front();
        }

        let window_start = Utc::now()
            - chrono::Duration::from_std(self.thresholds.error_burst_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let recent = state
            .errors
            .iter()
            .filter(|e| e.occurred_at >= window_start)
            .count();
        if recent > self.thresholds.error_burst_count {
            Self::raise_alert(
                &mut state,
                AlertType::ErrorBurst,
                AlertSeverity::Critical,
                format!("{recent} errors in the trailing burst window"),
            );
        }
    }

    /// Marks an alert resolved. Returns false when the id is unknown or
    /// the alert was already resolved.
    pub fn resolve_alert(&self, id: Uuid) -> bool {
        let mut state = self.state.write().expect("health state poisoned");
        match state.alerts.iter_mut().find(|a| a.id == id && !a.resolved) {
            Some(alert) => {
                alert.resolved = true;
                true
            }
            None => false,
        }
    }

    /// All alerts ever raised, resolved ones included (audit trail)
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.state.read().expect("health state poisoned").alerts.clone()
    }

    /// Most recent extraction results, newest first, capped by the
    /// rolling history bound
    #[must_use]
    pub fn recent_results(&self, limit: usize) -> Vec<ExtractionResult> {
        self.state
            .read()
            .expect("health state poisoned")
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Builds the full report from current metrics
    #[must_use]
    pub fn health_report(&self) -> HealthReport {
        let state = self.state.read().expect("health state poisoned");

        let extraction_state = extraction_axis(&state.overall);
        let performance_state = performance_axis(&state.performance, &self.thresholds);

        let strategies: HashMap<String, BucketReport> = state
            .by_strategy
            .iter()
            .map(|(name, counters)| (name.clone(), bucket_report(counters, strategy_axis(counters))))
            .collect();
        let data_types: HashMap<String, BucketReport> = state
            .by_data_type
            .iter()
            .map(|(name, counters)| (name.clone(), bucket_report(counters, extraction_axis(counters))))
            .collect();

        let mut axis_states = vec![extraction_state, performance_state];
        axis_states.extend(strategies.values().map(|b| b.state));

        let status = if axis_states.iter().any(|s| *s == AxisState::Critical) {
            HealthStatus::Critical
        } else if axis_states.iter().filter(|s| s.is_unhealthy()).count() > 2 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let recommendations = recommendations(&state, &strategies, &data_types);

        let summary = HealthSummary {
            total_extractions: state.overall.total,
            successful: state.overall.successful,
            partial: state.overall.partial,
            failed: state.overall.failed,
            success_rate: state.overall.success_rate(),
            avg_extraction_ms: state.performance.avg_ms(),
            min_extraction_ms: state.performance.min_ms,
            max_extraction_ms: state.performance.max_ms,
            timeout_count: state.performance.timeouts,
            recent_errors: state
                .errors
                .iter()
                .rev()
                .take(SUMMARY_ERROR_COUNT)
                .map(|e| format!("{} ({})", e.message, e.context))
                .collect(),
            unresolved_alerts: state.alerts.iter().filter(|a| !a.resolved).cloned().collect(),
        };

        HealthReport {
            status,
            summary,
            data_types,
            strategies,
            recommendations,
            generated_at: Utc::now(),
        }
    }

    /// Serialized metrics for the periodic durable flush
    #[must_use]
    pub fn snapshot(&self) -> serde_json::Value {
        let report = self.health_report();
        serde_json::to_value(&report).unwrap_or(serde_json::Value::Null)
    }

    /// Raises an alert unless an unresolved one of the same type and
    /// message already exists; alerts are never silently dropped or
    /// deleted.
    fn raise_alert(state: &mut MonitorState, alert_type: AlertType, severity: AlertSeverity, message: String) {
        let duplicate = state
            .alerts
            .iter()
            .any(|a| !a.resolved && a.alert_type == alert_type && a.message == message);
        if duplicate {
            return;
        }
        warn!(alert = alert_type.as_str(), %message, "health alert raised");
        state.alerts.push(Alert::new(alert_type, severity, message));
    }

    fn recompute_alerts(state: &mut MonitorState) {
        if extraction_axis(&state.overall) == AxisState::Critical {
            Self::raise_alert(
                state,
                AlertType::ExtractionCritical,
                AlertSeverity::Critical,
                "overall extraction success rate below critical threshold".to_string(),
            );
        }
        let failing: Vec<String> = state
            .by_strategy
            .iter()
            .filter(|(_, counters)| strategy_axis(counters) == AxisState::Failing)
            .map(|(name, _)| name.clone())
            .collect();
        for strategy in failing {
            Self::raise_alert(
                state,
                AlertType::StrategyFailing,
                AlertSeverity::Warning,
                format!("strategy '{strategy}' is failing"),
            );
        }
    }
}

fn extraction_axis(counters: &BucketCounters) -> AxisState {
    if counters.total == 0 {
        return AxisState::Healthy;
    }
    let rate = counters.success_rate();
    if rate < 0.3 {
        AxisState::Critical
    } else if rate < 0.7 {
        AxisState::Degraded
    } else {
        AxisState::Healthy
    }
}

fn strategy_axis(counters: &BucketCounters) -> AxisState {
    if counters.total < STRATEGY_MIN_SAMPLES {
        return AxisState::Healthy;
    }
    let rate = counters.success_rate();
    if rate < 0.3 {
        AxisState::Failing
    } else if rate < 0.7 {
        AxisState::Degraded
    } else {
        AxisState::Healthy
    }
}

fn performance_axis(perf: &PerformanceCounters, thresholds: &HealthThresholds) -> AxisState {
    if perf.samples + perf.timeouts == 0 {
        return AxisState::Healthy;
    }
    if perf.timeout_ratio() > thresholds.timeout_ratio_degraded
        || perf.avg_ms() > thresholds.performance_degraded.as_millis() as f64
    {
        AxisState::Degraded
    } else {
        AxisState::Healthy
    }
}

fn bucket_report(counters: &BucketCounters, state: AxisState) -> BucketReport {
    BucketReport {
        total: counters.total,
        successful: counters.successful,
        partial: counters.partial,
        failed: counters.failed,
        success_rate: counters.success_rate(),
        state,
    }
}

/// Recommendation list derived purely from current metrics
fn recommendations(
    state: &MonitorState,
    strategies: &HashMap<String, BucketReport>,
    data_types: &HashMap<String, BucketReport>,
) -> Vec<Recommendation> {
    let mut out = Vec::new();

    if state.overall.total > 0 && state.overall.success_rate() < 0.5 {
        out.push(Recommendation {
            action: "refresh-strategies".to_string(),
            target: None,
            reason: format!(
                "overall success rate {:.0}% is below 50%",
                state.overall.success_rate() * 100.0
            ),
        });
    }
    for (name, bucket) in strategies {
        if bucket.state == AxisState::Failing {
            out.push(Recommendation {
                action: "update-strategy".to_string(),
                target: Some(name.clone()),
                reason: format!("strategy success rate {:.0}%", bucket.success_rate * 100.0),
            });
        }
    }
    for (name, bucket) in data_types {
        if bucket.total > TRAIN_PATTERNS_MIN_SAMPLES && bucket.success_rate < 0.3 {
            out.push(Recommendation {
                action: "train-patterns".to_string(),
                target: Some(name.clone()),
                reason: format!(
                    "data type success rate {:.0}% across {} samples",
                    bucket.success_rate * 100.0,
                    bucket.total
                ),
            });
        }
    }

    out.sort_by(|a, b| a.action.cmp(&b.action).then(a.target.cmp(&b.target)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::health::ExtractionStatus;

    fn result(data_type: &str, strategy: &str, status: ExtractionStatus) -> ExtractionResult {
        ExtractionResult::new(data_type, strategy, status)
    }

    #[test]
    fn ten_consecutive_strategy_failures_mark_it_failing() {
        let monitor = HealthMonitor::new(HealthThresholds::default());
        for _ in 0..10 {
            monitor.record_extraction_result(result("price", "class-pattern", ExtractionStatus::Failed));
        }
        let report = monitor.health_report();
        assert_eq!(report.strategies["class-pattern"].state, AxisState::Failing);
        assert!(report.recommendations.iter().any(|r| {
            r.action == "update-strategy" && r.target.as_deref() == Some("class-pattern")
        }));
    }

    #[test]
    fn mostly_successful_extractions_read_healthy() {
        let monitor = HealthMonitor::new(HealthThresholds::default());
        for _ in 0..9 {
            monitor.record_extraction_result(result("price", "id-anchor", ExtractionStatus::Success));
        }
        monitor.record_extraction_result(result("price", "id-anchor", ExtractionStatus::Failed));
        let report = monitor.health_report();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.summary.success_rate > 0.7);
    }

    #[test]
    fn critical_extraction_rate_raises_alert_and_status() {
        let monitor = HealthMonitor::new(HealthThresholds::default());
        for _ in 0..10 {
            monitor.record_extraction_result(result("title", "class-pattern", ExtractionStatus::Failed));
        }
        let report = monitor.health_report();
        assert_eq!(report.status, HealthStatus::Critical);
        assert!(report
            .summary
            .unresolved_alerts
            .iter()
            .any(|a| a.alert_type == AlertType::ExtractionCritical));
    }

    #[test]
    fn slow_average_raises_performance_alert() {
        let monitor = HealthMonitor::new(HealthThresholds::default());
        monitor.record_performance(Duration::from_secs(25), false);
        let alerts = monitor.alerts();
        assert!(alerts.iter().any(|a| a.alert_type == AlertType::PerformanceDegraded));
    }

    #[test]
    fn error_burst_raises_alert_once() {
        let monitor = HealthMonitor::new(HealthThresholds::default());
        for i in 0..12 {
            monitor.record_error(&format!("boom {i}"), "listing_scan");
        }
        let bursts: Vec<_> = monitor
            .alerts()
            .into_iter()
            .filter(|a| a.alert_type == AlertType::ErrorBurst)
            .collect();
        // duplicate suppression compares messages, so the count may tick
        // up but each distinct message is raised at most once
        assert!(!bursts.is_empty());
        let unresolved = bursts.iter().filter(|a| !a.resolved).count();
        assert!(unresolved >= 1);
    }

    #[test]
    fn alerts_resolve_by_id_and_stay_in_the_audit_trail() {
        let monitor = HealthMonitor::new(HealthThresholds::default());
        monitor.record_performance(Duration::from_secs(25), false);
        let alert = monitor.alerts().pop().unwrap();
        assert!(monitor.resolve_alert(alert.id));
        // second resolve is a no-op
        assert!(!monitor.resolve_alert(alert.id));
        // alert still present, now resolved
        let all = monitor.alerts();
        assert!(all.iter().any(|a| a.id == alert.id && a.resolved));
        // resolved alerts leave the report's unresolved list
        assert!(monitor
            .health_report()
            .summary
            .unresolved_alerts
            .iter()
            .all(|a| a.id != alert.id));
    }

    #[test]
    fn timeouts_degrade_the_performance_axis() {
        let monitor = HealthMonitor::new(HealthThresholds::default());
        for _ in 0..8 {
            monitor.record_performance(Duration::from_secs(1), false);
        }
        for _ in 0..2 {
            monitor.record_performance(Duration::ZERO, true);
        }
        let report = monitor.health_report();
        assert_eq!(report.summary.timeout_count, 2);
        // 2 timeouts out of 10 = 20% ratio, above the 10% threshold
        assert!(report.summary.avg_extraction_ms < 20_000.0);
    }

    #[test]
    fn recommendations_include_train_patterns_for_weak_data_type() {
        let monitor = HealthMonitor::new(HealthThresholds::default());
        for _ in 0..11 {
            monitor.record_extraction_result(result("multiple", "id-anchor", ExtractionStatus::Failed));
        }
        let report = monitor.health_report();
        assert!(report.recommendations.iter().any(|r| {
            r.action == "train-patterns" && r.target.as_deref() == Some("multiple")
        }));
    }
}
