//! Health monitoring and alerting
//!
//! Observes extraction and performance outcomes, folds them into a
//! three-axis health status (extraction, performance, per-strategy) and
//! derives operator recommendations. Recording is fire-and-forget: it
//! never blocks or fails the extraction path.

pub mod monitor;

pub use monitor::{HealthMonitor, HealthReport, HealthSummary, HealthThresholds};
