//! Structured progress reporting
//!
//! Processors push typed progress records onto an mpsc channel consumed by
//! the orchestrator; there are no named events or callbacks. Sending is
//! fire-and-forget: a closed channel drops the update, it never fails the
//! job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::domain::job::{JobId, JobType};

/// Fixed milestones listing scans report at
pub const MILESTONES: [u8; 4] = [10, 50, 80, 100];

/// One progress record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub job_id: JobId,
    pub job_type: JobType,
    pub percent: u8,
    pub message: String,
    pub at: DateTime<Utc>,
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressUpdate>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressUpdate>;

#[must_use]
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Milestone-deduplicating reporter held by a processor for one job run
#[derive(Debug)]
pub struct ProgressReporter {
    sender: ProgressSender,
    job_id: JobId,
    job_type: JobType,
    reported: u8,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(sender: ProgressSender, job_id: JobId, job_type: JobType) -> Self {
        Self {
            sender,
            job_id,
            job_type,
            reported: 0,
        }
    }

    /// Emits every fixed milestone newly crossed by `percent`
    pub fn advance(&mut self, percent: u8, message: &str) {
        let percent = percent.min(100);
        for milestone in MILESTONES {
            if milestone > self.reported && milestone <= percent {
                self.reported = milestone;
                let _ = self.sender.send(ProgressUpdate {
                    job_id: self.job_id,
                    job_type: self.job_type,
                    percent: milestone,
                    message: message.to_string(),
                    at: Utc::now(),
                });
            }
        }
    }
}

/// Orchestrator-side consumer: drains the channel into the log
pub fn spawn_progress_logger(mut receiver: ProgressReceiver) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = receiver.recv().await {
            info!(
                job_id = %update.job_id,
                job_type = %update.job_type,
                percent = update.percent,
                "{}",
                update.message
            );
        }
    })
}
