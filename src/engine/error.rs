//! Engine error taxonomy
//!
//! Record-level problems (validation, single-selector misses) are absorbed
//! at the processor boundary and surface only as counts. Everything that
//! reaches the queue through this type is a job-level failure; the
//! dispatcher consults [`EngineError::is_retryable`] to decide between
//! backoff-retry and final failure.

use crate::domain::job::JobError;
use crate::engine::session::SessionError;
use crate::infrastructure::extractor::ExtractorError;

/// Job-level errors propagated to the queue manager
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The extraction executor failed (network, timeout, rate ceiling)
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractorError),

    /// Persistence completely unavailable; individual chunk/record
    /// failures are counted inside SaveStats instead
    #[error("persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),

    /// The single extraction session is already held elsewhere
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Job bookkeeping violation (illegal transition, exhausted attempts)
    #[error(transparent)]
    Job(#[from] JobError),

    /// No processor registered for the job type
    #[error("no processor registered for job type {0}")]
    NoProcessor(&'static str),

    /// Record-level validation escalated by a caller that wanted a batch
    /// to fail; processors normally absorb these
    #[error("validation failed: {0}")]
    Validation(String),
}

impl EngineError {
    /// Whether the queue should retry the job with backoff
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            // network hiccups, timeouts and rate ceilings pass with time
            Self::Extraction(
                ExtractorError::Network(_) | ExtractorError::Timeout(_) | ExtractorError::RateLimited(_),
            ) => true,
            Self::Extraction(ExtractorError::InvalidUrl(_)) => false,
            // the session frees up once the holding job finishes
            Self::Session(_) => true,
            Self::Persistence(_) => true,
            Self::Job(_) | Self::NoProcessor(_) | Self::Validation(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::rate_limiter::GateError;

    #[test]
    fn network_and_timeout_are_retryable() {
        assert!(EngineError::Extraction(ExtractorError::Timeout("x".into())).is_retryable());
        assert!(EngineError::Extraction(ExtractorError::Network("x".into())).is_retryable());
        assert!(
            EngineError::Extraction(ExtractorError::RateLimited(GateError::CeilingReached("hour")))
                .is_retryable()
        );
    }

    #[test]
    fn validation_is_not_retryable() {
        assert!(!EngineError::Validation("bad record".into()).is_retryable());
    }
}
