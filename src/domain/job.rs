//! Job entities for the collection pipeline
//!
//! A [`Job`] is one unit of queued work. Jobs carry a typed payload
//! ([`JobConfig`]), move through a fixed lifecycle and keep their own retry
//! bookkeeping. The queue manager owns all state transitions; this module
//! only enforces that transitions are legal.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for pipeline jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a new unique job ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    #[must_use]
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four job types the pipeline understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    CategoryScan,
    ListingScan,
    DetailFetch,
    StatisticsCalc,
}

impl JobType {
    /// Returns the job type as a string for telemetry and persistence
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CategoryScan => "category_scan",
            Self::ListingScan => "listing_scan",
            Self::DetailFetch => "detail_fetch",
            Self::StatisticsCalc => "statistics_calc",
        }
    }

    /// Parses a job type from its wire name
    pub fn parse(s: &str) -> Result<Self, JobError> {
        match s {
            "category_scan" => Ok(Self::CategoryScan),
            "listing_scan" => Ok(Self::ListingScan),
            "detail_fetch" => Ok(Self::DetailFetch),
            "statistics_calc" => Ok(Self::StatisticsCalc),
            other => Err(JobError::UnknownJobType(other.to_string())),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch priority. Lower numeric weight is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    Normal,
    Low,
}

impl JobPriority {
    /// Numeric weight used for heap ordering (high=1, normal=5, low=10)
    #[must_use]
    pub const fn weight(&self) -> u8 {
        match self {
            Self::High => 1,
            Self::Normal => 5,
            Self::Low => 10,
        }
    }

    /// Maps an asking price to a boosted priority for `detail_fetch`
    /// follow-ons. More expensive listings are fetched sooner.
    #[must_use]
    pub fn for_asking_price(asking_price: f64, high_value_threshold: f64) -> Self {
        if asking_price >= high_value_threshold * 5.0 {
            Self::High
        } else if asking_price >= high_value_threshold {
            Self::Normal
        } else {
            Self::Low
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    /// Legal transitions. A job never moves from `Queued` straight to
    /// `Completed`; it must pass through `Active`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Active)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Failed)
                | (Self::Failed, Self::Queued)
        )
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal states cannot be cancelled or retried out of band
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Typed payload carried by each job. The variant must agree with the
/// job's [`JobType`]; `add_job` rejects mismatches up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobConfig {
    CategoryScan {
        /// Listings per page used to size follow-on scan jobs
        page_size: u32,
    },
    ListingScan {
        category: String,
        max_pages: u32,
    },
    DetailFetch {
        listing_id: String,
        url: String,
    },
    StatisticsCalc {
        /// Single industry, or all active ones when absent
        industry: Option<String>,
        /// UTC day to aggregate; defaults to today when absent
        date: Option<chrono::NaiveDate>,
    },
}

impl JobConfig {
    /// The job type this payload belongs to
    #[must_use]
    pub const fn job_type(&self) -> JobType {
        match self {
            Self::CategoryScan { .. } => JobType::CategoryScan,
            Self::ListingScan { .. } => JobType::ListingScan,
            Self::DetailFetch { .. } => JobType::DetailFetch,
            Self::StatisticsCalc { .. } => JobType::StatisticsCalc,
        }
    }
}

/// Per-industry outcome line for statistics runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndustryOutcome {
    pub industry: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Structured result a processor reports on completion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutcome {
    CategoryScan {
        categories_found: usize,
        jobs_queued: usize,
    },
    ListingScan {
        listings_scraped: usize,
        listings_saved: usize,
        listings_invalid: usize,
        detail_jobs_queued: usize,
    },
    DetailFetch {
        success: bool,
        listing_id: String,
        errors: Vec<String>,
    },
    StatisticsCalc {
        industries_processed: usize,
        succeeded: usize,
        failed: usize,
        breakdown: Vec<IndustryOutcome>,
    },
}

/// One unit of queued work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub config: JobConfig,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<JobOutcome>,
    pub last_error: Option<String>,
    /// Set by `cancel_job` while active; honored at the next checkpoint
    pub cancel_requested: bool,
}

impl Job {
    /// Creates a freshly queued job
    #[must_use]
    pub fn new(config: JobConfig, priority: JobPriority, max_attempts: u32) -> Self {
        Self {
            id: JobId::new(),
            job_type: config.job_type(),
            config,
            priority,
            status: JobStatus::Queued,
            attempts_made: 0,
            max_attempts,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            last_error: None,
            cancel_requested: false,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::IllegalTransition {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Marks the job active and counts the attempt
    pub fn begin_attempt(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Active)?;
        self.attempts_made += 1;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Finalizes the job with a processor result
    pub fn complete(&mut self, outcome: JobOutcome) -> Result<(), JobError> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(outcome);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Records a failed attempt. The queue manager decides whether the job
    /// goes back to `Queued` (retry) or stays `Failed` (final).
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), JobError> {
        self.transition(JobStatus::Failed)?;
        self.last_error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Re-queues a failed job for another attempt
    pub fn requeue(&mut self) -> Result<(), JobError> {
        if self.attempts_made >= self.max_attempts {
            return Err(JobError::AttemptsExhausted { job_id: self.id });
        }
        self.transition(JobStatus::Queued)?;
        self.completed_at = None;
        Ok(())
    }

    /// True when another retry is still allowed
    #[must_use]
    pub fn has_attempts_left(&self) -> bool {
        self.attempts_made < self.max_attempts
    }
}

/// Job-level errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error("job {job_id}: illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {job_id}: retry attempts exhausted")]
    AttemptsExhausted { job_id: JobId },

    #[error("job {job_id}: cannot cancel a {status:?} job")]
    CancelFinalized { job_id: JobId, status: JobStatus },

    #[error("config payload does not match job type {expected}")]
    ConfigMismatch { expected: JobType },
}
