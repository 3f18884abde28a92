//! Engine binary: load config, initialize logging, run until Ctrl-C
//!
//! An initial category scan is submitted on startup so a fresh deployment
//! begins discovering listings immediately; everything after that is
//! driven by the job chain and whatever the web layer submits.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use listing_harvester::domain::job::JobConfig;
use listing_harvester::infrastructure::logging;
use listing_harvester::{EngineConfig, HarvestEngine};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = EngineConfig::load(config_path.as_deref()).context("loading configuration")?;

    logging::init_logging_with_config(&config.logging)?;
    info!(base_url = %config.base_url, "starting listing harvester");

    let page_size = config.scan.page_size;
    let engine = HarvestEngine::new(config).await?;
    engine.start().await;

    let job_id = engine
        .submit_job(JobConfig::CategoryScan { page_size })
        .await
        .context("submitting initial category scan")?;
    info!(%job_id, "initial category scan queued");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    engine.shutdown().await;

    Ok(())
}
