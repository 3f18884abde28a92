//! Listing Harvester - self-adapting marketplace collection engine
//!
//! This crate implements the data-collection core for a frequently-changing
//! marketplace site: a priority job queue with typed, chained processors, an
//! adaptive selector generation/evolution subsystem, a health monitor that
//! scores extraction quality, and a deduplicating persistence layer with
//! price-change history.

// Module declarations
pub mod domain;
pub mod engine;
pub mod health;
pub mod infrastructure;
pub mod selector;

// Re-export the external surface for easier access
pub use domain::job::{Job, JobConfig, JobId, JobPriority, JobStatus, JobType};
pub use domain::listing::{ListingRecord, ListingStatus};
pub use engine::HarvestEngine;
pub use infrastructure::config::EngineConfig;
