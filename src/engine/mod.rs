//! Engine layer: queue orchestration, processors and the external facade
//!
//! [`HarvestEngine`] wires the subsystems together and exposes the surface
//! the excluded web layer consumes: submit a job, query a job, read queue
//! stats, read the health report. Everything else happens inside the
//! dispatch loop.

pub mod error;
pub mod processors;
pub mod progress;
pub mod queue_manager;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::job::{Job, JobConfig, JobId, JobPriority};
use crate::health::{HealthMonitor, HealthReport};
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::extractor::{ExtractionExecutor, HttpExtractionExecutor};
use crate::infrastructure::listing_repository::ListingStore;
use crate::infrastructure::rate_limiter::RequestGate;
use crate::selector::SelectorGenerator;

pub use error::EngineError;
pub use processors::{default_registry, JobProcessor, ProcessorContext, ProcessorRegistry};
pub use progress::{progress_channel, ProgressReporter, ProgressSender, ProgressUpdate};
pub use queue_manager::{JobOptions, QueueError, QueueManager, QueueStats};
pub use session::{ExtractionSession, SessionError, SessionManager};

/// The assembled collection engine
pub struct HarvestEngine {
    config: Arc<EngineConfig>,
    queue: QueueManager,
    store: Arc<ListingStore>,
    monitor: Arc<HealthMonitor>,
    generator: Arc<SelectorGenerator>,
    sessions: Arc<SessionManager>,
    executor: Arc<dyn ExtractionExecutor>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl HarvestEngine {
    /// Builds the engine with the HTTP extraction executor behind the
    /// configured request gate.
    pub async fn new(config: EngineConfig) -> anyhow::Result<Self> {
        config.validate().context("engine configuration rejected")?;
        let gate = Arc::new(RequestGate::new(&config.rate_limits));
        let executor: Arc<dyn ExtractionExecutor> = Arc::new(
            HttpExtractionExecutor::new(&config, gate).context("building extraction executor")?,
        );
        Self::with_executor(config, executor).await
    }

    /// Builds the engine around a caller-provided executor; the seam the
    /// tests and non-HTTP backends use.
    pub async fn with_executor(
        config: EngineConfig,
        executor: Arc<dyn ExtractionExecutor>,
    ) -> anyhow::Result<Self> {
        config.validate().context("engine configuration rejected")?;
        let db = DatabaseConnection::new(&config.database_url)
            .await
            .context("opening database")?;
        db.migrate().await.context("running schema migration")?;

        let store = Arc::new(ListingStore::new(db.pool().clone(), config.store.chunk_size));
        let monitor = Arc::new(HealthMonitor::new(config.health_thresholds()));
        let queue = QueueManager::new(config.queue.clone());

        Ok(Self {
            queue,
            store,
            monitor,
            generator: Arc::new(SelectorGenerator::new()),
            sessions: Arc::new(SessionManager::new()),
            executor,
            shutdown: CancellationToken::new(),
            config: Arc::new(config),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Starts the dispatcher, the progress consumer and the periodic
    /// health flush.
    pub async fn start(&self) {
        let (progress_tx, progress_rx) = progress_channel();
        let ctx = ProcessorContext {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            generator: Arc::clone(&self.generator),
            monitor: Arc::clone(&self.monitor),
            executor: Arc::clone(&self.executor),
            sessions: Arc::clone(&self.sessions),
            progress: progress_tx,
            queue: self.queue.clone(),
        };

        let mut tasks = self.tasks.lock().await;
        tasks.push(progress::spawn_progress_logger(progress_rx));
        tasks.push(self.queue.start(ctx, default_registry(), self.shutdown.clone()));
        tasks.push(self.spawn_health_flush());
        info!("harvest engine started");
    }

    /// Durable metric flush: sampled, never on every update
    fn spawn_health_flush(&self) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let monitor = Arc::clone(&self.monitor);
        let shutdown = self.shutdown.clone();
        let period = Duration::from_secs(self.config.scan.health_flush_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let snapshot = monitor.snapshot();
                        if let Err(e) = store.flush_health_snapshot(&snapshot).await {
                            warn!(error = %e, "health snapshot flush failed");
                        }
                    }
                    () = shutdown.cancelled() => return,
                }
            }
        })
    }

    /// Submits a job at normal priority
    pub async fn submit_job(&self, config: JobConfig) -> Result<JobId, QueueError> {
        self.submit_job_with_priority(config, JobPriority::Normal).await
    }

    pub async fn submit_job_with_priority(
        &self,
        config: JobConfig,
        priority: JobPriority,
    ) -> Result<JobId, QueueError> {
        let job = self
            .queue
            .add_job(config, JobOptions::with_priority(priority))
            .await?;
        Ok(job.id)
    }

    pub async fn get_job(&self, id: JobId) -> Option<Job> {
        self.queue.get_job(id).await
    }

    pub async fn get_queue_stats(&self) -> QueueStats {
        self.queue.get_queue_stats().await
    }

    #[must_use]
    pub fn get_health_report(&self) -> HealthReport {
        self.monitor.health_report()
    }

    /// Direct queue handle (pause/resume/retry/clean live there)
    #[must_use]
    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    /// Read access for the web layer's listing/history queries
    #[must_use]
    pub fn store(&self) -> &Arc<ListingStore> {
        &self.store
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// Cancels the dispatcher and background tasks and waits for them
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        info!("harvest engine stopped");
    }
}
