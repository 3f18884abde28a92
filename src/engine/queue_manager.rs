//! Priority job queue and dispatcher
//!
//! Jobs wait in a priority heap (lower weight serves first, FIFO within a
//! weight), retries sit in a delayed heap keyed by their next run time,
//! and a semaphore-free active counter bounds concurrency. The dispatcher
//! catches every processor error, increments the attempt counter and
//! either reschedules with exponential backoff or finalizes the job as
//! failed with its last error retained.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::job::{Job, JobConfig, JobId, JobPriority, JobStatus};
use crate::engine::processors::{ProcessorContext, ProcessorRegistry};
use crate::infrastructure::config::QueueSettings;

/// Options accepted by `add_job`
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub priority: JobPriority,
    /// Override for the configured attempt budget
    pub max_attempts: Option<u32>,
}

impl JobOptions {
    #[must_use]
    pub fn with_priority(priority: JobPriority) -> Self {
        Self {
            priority,
            max_attempts: None,
        }
    }
}

/// Snapshot of queue occupancy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
    pub paused: usize,
    pub total: usize,
}

/// Queue-level errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("unknown job: {0}")]
    UnknownJob(JobId),

    #[error("cannot cancel job {0}: already finalized")]
    CancelFinalized(JobId),

    #[error("invalid job config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, PartialEq, Eq)]
struct ReadyEntry {
    weight: u8,
    seq: u64,
    job_id: JobId,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .cmp(&other.weight)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, PartialEq, Eq)]
struct DelayedEntry {
    run_at: DateTime<Utc>,
    seq: u64,
    job_id: JobId,
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.run_at
            .cmp(&other.run_at)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    ready: BinaryHeap<Reverse<ReadyEntry>>,
    delayed: BinaryHeap<Reverse<DelayedEntry>>,
    delayed_ids: HashSet<JobId>,
    paused: bool,
    active: usize,
    seq: u64,
}

impl QueueState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn push_ready(&mut self, job_id: JobId, weight: u8) {
        let seq = self.next_seq();
        self.ready.push(Reverse(ReadyEntry {
            weight,
            seq,
            job_id,
        }));
    }

    fn push_delayed(&mut self, job_id: JobId, run_at: DateTime<Utc>) {
        let seq = self.next_seq();
        self.delayed_ids.insert(job_id);
        self.delayed.push(Reverse(DelayedEntry {
            run_at,
            seq,
            job_id,
        }));
    }

    /// Moves every due delayed job into the ready heap
    fn promote_due(&mut self) {
        let now = Utc::now();
        while let Some(Reverse(top)) = self.delayed.peek() {
            if top.run_at > now {
                break;
            }
            let Reverse(entry) = self.delayed.pop().expect("peeked entry");
            self.delayed_ids.remove(&entry.job_id);
            if let Some(job) = self.jobs.get(&entry.job_id) {
                if job.status == JobStatus::Queued {
                    self.push_ready(entry.job_id, job.priority.weight());
                }
            }
        }
    }

    /// Pops the next runnable job id, skipping stale heap entries for
    /// jobs that were cancelled or already moved on
    fn pop_ready(&mut self) -> Option<JobId> {
        while let Some(Reverse(entry)) = self.ready.pop() {
            if self
                .jobs
                .get(&entry.job_id)
                .is_some_and(|job| job.status == JobStatus::Queued && !self.delayed_ids.contains(&entry.job_id))
            {
                return Some(entry.job_id);
            }
        }
        None
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.jobs.len(),
            active: self.active,
            ..QueueStats::default()
        };
        for job in self.jobs.values() {
            match job.status {
                JobStatus::Queued => {
                    if self.delayed_ids.contains(&job.id) {
                        stats.delayed += 1;
                    } else if self.paused {
                        stats.paused += 1;
                    } else {
                        stats.waiting += 1;
                    }
                }
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Active => {}
            }
        }
        stats
    }
}

/// Orchestrates the job lifecycle: priority, retry, concurrency, stats,
/// pause/resume
#[derive(Clone)]
pub struct QueueManager {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    settings: QueueSettings,
}

impl QueueManager {
    #[must_use]
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
            settings,
        }
    }

    fn validate_config(config: &JobConfig) -> Result<(), QueueError> {
        match config {
            JobConfig::CategoryScan { page_size } if *page_size == 0 => {
                Err(QueueError::InvalidConfig("page_size must be at least 1".into()))
            }
            JobConfig::ListingScan { category, max_pages } => {
                if category.trim().is_empty() {
                    Err(QueueError::InvalidConfig("category must not be empty".into()))
                } else if *max_pages == 0 {
                    Err(QueueError::InvalidConfig("max_pages must be at least 1".into()))
                } else {
                    Ok(())
                }
            }
            JobConfig::DetailFetch { listing_id, url } => {
                if listing_id.trim().is_empty() {
                    Err(QueueError::InvalidConfig("listing_id must not be empty".into()))
                } else if url.trim().is_empty() {
                    Err(QueueError::InvalidConfig("url must not be empty".into()))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// Validates and enqueues a job, returning it in `Queued` state
    /// immediately.
    pub async fn add_job(&self, config: JobConfig, options: JobOptions) -> Result<Job, QueueError> {
        Self::validate_config(&config)?;
        let max_attempts = options.max_attempts.unwrap_or(self.settings.max_attempts).max(1);
        let job = Job::new(config, options.priority, max_attempts);

        let mut state = self.state.lock().await;
        state.push_ready(job.id, job.priority.weight());
        state.jobs.insert(job.id, job.clone());
        drop(state);

        self.notify.notify_one();
        debug!(job_id = %job.id, job_type = %job.job_type, "job queued");
        Ok(job)
    }

    pub async fn get_job(&self, id: JobId) -> Option<Job> {
        self.state.lock().await.jobs.get(&id).cloned()
    }

    pub async fn get_queue_stats(&self) -> QueueStats {
        let mut state = self.state.lock().await;
        state.promote_due();
        state.stats()
    }

    /// Stops dispatch without losing queued jobs
    pub async fn pause(&self) {
        self.state.lock().await.paused = true;
        info!("queue paused");
    }

    pub async fn resume(&self) {
        self.state.lock().await.paused = false;
        info!("queue resumed");
        self.notify.notify_one();
    }

    /// Re-queues failed jobs that still have attempts left. Returns how
    /// many were revived.
    pub async fn retry_failed_jobs(&self) -> usize {
        let mut state = self.state.lock().await;
        let revivable: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Failed && job.has_attempts_left())
            .map(|job| job.id)
            .collect();

        let mut revived = 0;
        for id in revivable {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            let weight = job.priority.weight();
            if job.requeue().is_ok() {
                state.push_ready(id, weight);
                revived += 1;
            }
        }
        drop(state);

        if revived > 0 {
            self.notify.notify_one();
        }
        revived
    }

    /// Purges completed jobs older than `grace` and failed jobs older
    /// than 24 x `grace` (failed jobs are retained longer for diagnosis).
    pub async fn clean_jobs(&self, grace: Duration) -> usize {
        let completed_cutoff = Utc::now()
            - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::hours(1));
        let failed_cutoff = Utc::now()
            - chrono::Duration::from_std(grace * 24)
                .unwrap_or_else(|_| chrono::Duration::hours(24));

        let mut state = self.state.lock().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, job| match job.status {
            JobStatus::Completed => job.completed_at.map_or(true, |t| t >= completed_cutoff),
            JobStatus::Failed => job.completed_at.map_or(true, |t| t >= failed_cutoff),
            _ => true,
        });
        before - state.jobs.len()
    }

    /// Removes a queued job outright; flags an active job for cancellation
    /// at its next checkpoint. Cancelling a finalized job is an error.
    pub async fn cancel_job(&self, id: JobId) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let job = state.jobs.get_mut(&id).ok_or(QueueError::UnknownJob(id))?;
        match job.status {
            JobStatus::Queued => {
                state.jobs.remove(&id);
                state.delayed_ids.remove(&id);
                debug!(job_id = %id, "queued job cancelled and removed");
                Ok(())
            }
            JobStatus::Active => {
                job.cancel_requested = true;
                debug!(job_id = %id, "active job flagged for cancellation");
                Ok(())
            }
            JobStatus::Completed | JobStatus::Failed => Err(QueueError::CancelFinalized(id)),
        }
    }

    /// Checked by processors at safe checkpoints
    pub async fn cancel_requested(&self, id: JobId) -> bool {
        self.state
            .lock()
            .await
            .jobs
            .get(&id)
            .is_some_and(|job| job.cancel_requested)
    }

    /// True once every submitted job is terminal and nothing is in flight
    pub async fn is_drained(&self) -> bool {
        let state = self.state.lock().await;
        state.active == 0
            && state
                .jobs
                .values()
                .all(|job| job.status.is_terminal())
    }

    /// Test/ops helper: polls until the queue drains
    pub async fn wait_for_drain(&self) {
        loop {
            if self.is_drained().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Exponential backoff with +/-10% jitter, capped
    fn backoff_delay(&self, attempts_made: u32) -> Duration {
        let base = self.settings.backoff_base_ms;
        let exp = base.saturating_mul(2u64.saturating_pow(attempts_made));
        let capped = exp.min(self.settings.backoff_cap_ms);
        let jitter = (capped / 10).max(1);
        let delta = fastrand::u64(0..=jitter * 2) as i64 - jitter as i64;
        Duration::from_millis(capped.saturating_add_signed(delta))
    }

    /// Spawns the dispatcher loop. Runs until the token is cancelled.
    pub fn start(
        &self,
        ctx: ProcessorContext,
        registry: ProcessorRegistry,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        let registry = Arc::new(registry);
        tokio::spawn(async move {
            info!(concurrency = queue.settings.concurrency, "dispatcher started");
            loop {
                if shutdown.is_cancelled() {
                    info!("dispatcher shutting down");
                    return;
                }

                let claimed = {
                    let mut guard = queue.state.lock().await;
                    let state = &mut *guard;
                    state.promote_due();
                    if state.paused || state.active >= queue.settings.concurrency {
                        None
                    } else {
                        match state.pop_ready() {
                            Some(id) => {
                                let job = state.jobs.get_mut(&id).expect("popped job exists");
                                match job.begin_attempt() {
                                    Ok(()) => {
                                        state.active += 1;
                                        Some(job.clone())
                                    }
                                    Err(e) => {
                                        warn!(job_id = %id, error = %e, "failed to activate job");
                                        None
                                    }
                                }
                            }
                            None => None,
                        }
                    }
                };

                match claimed {
                    Some(job) => {
                        queue.spawn_job(job, Arc::clone(&registry), ctx.clone());
                    }
                    None => {
                        // nothing runnable right now; wake on enqueue or tick
                        tokio::select! {
                            () = queue.notify.notified() => {}
                            () = tokio::time::sleep(Duration::from_millis(100)) => {}
                            () = shutdown.cancelled() => {}
                        }
                    }
                }
            }
        })
    }

    fn spawn_job(&self, job: Job, registry: Arc<ProcessorRegistry>, ctx: ProcessorContext) {
        let queue = self.clone();
        tokio::spawn(async move {
            let job_id = job.id;
            let job_type = job.job_type;
            let started = std::time::Instant::now();

            let outcome = match registry.get(&job_type) {
                Some(processor) => processor.process(&job, &ctx).await,
                None => Err(crate::engine::error::EngineError::NoProcessor(job_type.as_str())),
            };

            let terminal_job = {
                let mut state = queue.state.lock().await;
                state.active = state.active.saturating_sub(1);
                let Some(stored) = state.jobs.get_mut(&job_id) else {
                    // cancelled underneath us; nothing left to record
                    queue.notify.notify_one();
                    return;
                };

                match outcome {
                    Ok(result) => {
                        info!(
                            job_id = %job_id,
                            job_type = %job_type,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "job completed"
                        );
                        if let Err(e) = stored.complete(result) {
                            error!(job_id = %job_id, error = %e, "completion bookkeeping failed");
                        }
                        Some(stored.clone())
                    }
                    Err(e) => {
                        ctx.monitor.record_error(&e.to_string(), job_type.as_str());
                        let retryable = e.is_retryable();
                        if let Err(te) = stored.fail(e.to_string()) {
                            error!(job_id = %job_id, error = %te, "failure bookkeeping failed");
                        }
                        if retryable && stored.has_attempts_left() {
                            let delay = queue.backoff_delay(stored.attempts_made);
                            warn!(
                                job_id = %job_id,
                                job_type = %job_type,
                                attempts = stored.attempts_made,
                                delay_ms = delay.as_millis() as u64,
                                "job failed, retrying with backoff"
                            );
                            if stored.requeue().is_ok() {
                                let run_at = Utc::now()
                                    + chrono::Duration::from_std(delay)
                                        .unwrap_or_else(|_| chrono::Duration::seconds(60));
                                state.push_delayed(job_id, run_at);
                                None
                            } else {
                                Some(stored.clone())
                            }
                        } else {
                            warn!(
                                job_id = %job_id,
                                job_type = %job_type,
                                attempts = stored.attempts_made,
                                "job failed permanently"
                            );
                            Some(stored.clone())
                        }
                    }
                }
            };

            // mirror terminal jobs outside the queue lock; a failed mirror
            // write is counted, never fatal
            if let Some(final_job) = terminal_job {
                if let Err(e) = ctx.store.record_job(&final_job).await {
                    ctx.monitor.record_error(&e.to_string(), "job_mirror");
                }
            }
            queue.notify.notify_one();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> QueueSettings {
        QueueSettings {
            concurrency: 2,
            max_attempts: 3,
            backoff_base_ms: 10,
            backoff_cap_ms: 100,
        }
    }

    fn scan_config(category: &str) -> JobConfig {
        JobConfig::ListingScan {
            category: category.to_string(),
            max_pages: 2,
        }
    }

    #[tokio::test]
    async fn add_job_returns_queued_job_immediately() {
        let queue = QueueManager::new(settings());
        let job = queue
            .add_job(scan_config("saas"), JobOptions::default())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts_made, 0);
        let fetched = queue.get_job(job.id).await.unwrap();
        assert_eq!(fetched.id, job.id);
    }

    #[tokio::test]
    async fn invalid_configs_are_rejected_up_front() {
        let queue = QueueManager::new(settings());
        let bad = JobConfig::ListingScan {
            category: " ".to_string(),
            max_pages: 2,
        };
        assert!(matches!(
            queue.add_job(bad, JobOptions::default()).await,
            Err(QueueError::InvalidConfig(_))
        ));
        let bad = JobConfig::DetailFetch {
            listing_id: "x".to_string(),
            url: String::new(),
        };
        assert!(queue.add_job(bad, JobOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn stats_reflect_waiting_and_paused_jobs() {
        let queue = QueueManager::new(settings());
        queue
            .add_job(scan_config("saas"), JobOptions::default())
            .await
            .unwrap();
        queue
            .add_job(scan_config("content"), JobOptions::default())
            .await
            .unwrap();

        let stats = queue.get_queue_stats().await;
        assert_eq!(stats.waiting, 2);
        assert_eq!(stats.total, 2);

        queue.pause().await;
        let stats = queue.get_queue_stats().await;
        assert_eq!(stats.paused, 2);
        assert_eq!(stats.waiting, 0);
    }

    #[tokio::test]
    async fn priority_orders_dispatch_and_ties_stay_fifo() {
        let queue = QueueManager::new(settings());
        let low = queue
            .add_job(scan_config("low"), JobOptions::with_priority(JobPriority::Low))
            .await
            .unwrap();
        let high = queue
            .add_job(scan_config("high"), JobOptions::with_priority(JobPriority::High))
            .await
            .unwrap();
        let normal_a = queue
            .add_job(scan_config("normal-a"), JobOptions::default())
            .await
            .unwrap();
        let normal_b = queue
            .add_job(scan_config("normal-b"), JobOptions::default())
            .await
            .unwrap();

        let mut state = queue.state.lock().await;
        assert_eq!(state.pop_ready(), Some(high.id));
        assert_eq!(state.pop_ready(), Some(normal_a.id));
        assert_eq!(state.pop_ready(), Some(normal_b.id));
        assert_eq!(state.pop_ready(), Some(low.id));
    }

    #[tokio::test]
    async fn cancelling_queued_job_removes_it() {
        let queue = QueueManager::new(settings());
        let job = queue
            .add_job(scan_config("saas"), JobOptions::default())
            .await
            .unwrap();
        queue.cancel_job(job.id).await.unwrap();
        assert!(queue.get_job(job.id).await.is_none());
        // heap entry is stale now and must be skipped
        assert_eq!(queue.state.lock().await.pop_ready(), None);
    }

    #[tokio::test]
    async fn cancelling_finalized_job_is_an_error() {
        let queue = QueueManager::new(settings());
        let job = queue
            .add_job(scan_config("saas"), JobOptions::default())
            .await
            .unwrap();
        {
            let mut state = queue.state.lock().await;
            let stored = state.jobs.get_mut(&job.id).unwrap();
            stored.begin_attempt().unwrap();
            stored
                .complete(crate::domain::job::JobOutcome::ListingScan {
                    listings_scraped: 0,
                    listings_saved: 0,
                    listings_invalid: 0,
                    detail_jobs_queued: 0,
                })
                .unwrap();
        }
        assert!(matches!(
            queue.cancel_job(job.id).await,
            Err(QueueError::CancelFinalized(_))
        ));
    }

    #[tokio::test]
    async fn retry_failed_jobs_revives_only_jobs_with_attempts_left() {
        let queue = QueueManager::new(settings());
        let budget_left = queue
            .add_job(scan_config("a"), JobOptions::default())
            .await
            .unwrap();
        let exhausted = queue
            .add_job(
                scan_config("b"),
                JobOptions {
                    priority: JobPriority::Normal,
                    max_attempts: Some(1),
                },
            )
            .await
            .unwrap();
        {
            let mut state = queue.state.lock().await;
            for id in [budget_left.id, exhausted.id] {
                let stored = state.jobs.get_mut(&id).unwrap();
                stored.begin_attempt().unwrap();
                stored.fail("boom").unwrap();
            }
        }

        assert_eq!(queue.retry_failed_jobs().await, 1);
        assert_eq!(
            queue.get_job(budget_left.id).await.unwrap().status,
            JobStatus::Queued
        );
        assert_eq!(
            queue.get_job(exhausted.id).await.unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn clean_jobs_keeps_failed_jobs_longer() {
        let queue = QueueManager::new(settings());
        let done = queue
            .add_job(scan_config("done"), JobOptions::default())
            .await
            .unwrap();
        let dead = queue
            .add_job(scan_config("dead"), JobOptions::default())
            .await
            .unwrap();
        {
            let mut state = queue.state.lock().await;
            let old = Utc::now() - chrono::Duration::hours(2);

            let job = state.jobs.get_mut(&done.id).unwrap();
            job.begin_attempt().unwrap();
            job.complete(crate::domain::job::JobOutcome::ListingScan {
                listings_scraped: 0,
                listings_saved: 0,
                listings_invalid: 0,
                detail_jobs_queued: 0,
            })
            .unwrap();
            job.completed_at = Some(old);

            let job = state.jobs.get_mut(&dead.id).unwrap();
            job.begin_attempt().unwrap();
            job.fail("boom").unwrap();
            job.completed_at = Some(old);
        }

        // grace of one hour: completed job is past it, failed job is
        // within its 24x window
        let purged = queue.clean_jobs(Duration::from_secs(3_600)).await;
        assert_eq!(purged, 1);
        assert!(queue.get_job(done.id).await.is_none());
        assert!(queue.get_job(dead.id).await.is_some());
    }

    #[tokio::test]
    async fn backoff_grows_exponentially_and_caps() {
        let queue = QueueManager::new(QueueSettings {
            concurrency: 1,
            max_attempts: 5,
            backoff_base_ms: 100,
            backoff_cap_ms: 1_000,
        });
        let d1 = queue.backoff_delay(1).as_millis() as u64;
        let d2 = queue.backoff_delay(2).as_millis() as u64;
        let d5 = queue.backoff_delay(5).as_millis() as u64;
        // 100 * 2^1 = 200 +/- 10%
        assert!((180..=220).contains(&d1), "d1 = {d1}");
        // 100 * 2^2 = 400 +/- 10%
        assert!((360..=440).contains(&d2), "d2 = {d2}");
        // capped at 1000 +/- 10%
        assert!((900..=1_100).contains(&d5), "d5 = {d5}");
    }
}
