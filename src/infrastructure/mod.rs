//! Infrastructure layer: configuration, logging, persistence and the
//! extraction executor
//!
//! Everything that touches the outside world lives here - the SQLite pool
//! and repositories, the HTTP client behind the extraction executor seam,
//! rate limiting, and engine configuration.

pub mod config;
pub mod database_connection;
pub mod extractor;
pub mod http_client;
pub mod listing_repository;
pub mod logging;
pub mod rate_limiter;

// Re-export commonly used items
pub use config::EngineConfig;
pub use database_connection::DatabaseConnection;
pub use extractor::{ExtractionExecutor, ExtractorError, HttpExtractionExecutor};
pub use listing_repository::{ListingStore, RecordClass, SaveStats};
pub use rate_limiter::RequestGate;
