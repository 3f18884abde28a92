//! Domain module - core business entities and value types
//!
//! Contains the entities shared across the engine: jobs and their lifecycle,
//! marketplace listings, selector expressions, and health records. Everything
//! here is persistence- and transport-agnostic.

pub mod health;
pub mod job;
pub mod listing;
pub mod selector;

// Re-export commonly used items
pub use health::{Alert, AlertSeverity, AxisState, ExtractionResult, ExtractionStatus, HealthStatus};
pub use job::{Job, JobConfig, JobId, JobOutcome, JobPriority, JobStatus, JobType};
pub use listing::{ChangeKind, ListingRecord, ListingStatus, ValidationIssue};
pub use selector::{AttrMatch, Combinator, DataType, SelectorCandidate, SelectorExpression};
