//! 🚰 ingestd: a drainable, two-stage ingestion pipeline.
//!
//! Producers push raw records through a loopback proxy into an input queue. A pool of
//! extract workers pulls entities out of them and aggregates per partition. A pool of
//! savers persists the aggregates as increments. On shutdown every queue drains in
//! order and nothing that was accepted gets left behind. 🦆

pub mod aggregation;
pub mod app_config;
pub mod common;
pub mod extractors;
pub mod proxy;
pub mod queue;
pub mod report;
pub mod shutdown;
pub mod stores;
pub mod supervisors;

use anyhow::{Context, Result};
use tracing::info;

use crate::app_config::AppConfig;
use crate::report::ShutdownReport;
use crate::shutdown::ShutdownWatcher;
use crate::supervisors::Supervisor;

/// 🚀 Start the pipeline, wait for SIGINT or SIGTERM, drain, report.
///
/// Workers that failed along the way show up in the report and the logs. They don't
/// turn into an error here: everything that could be saved was saved.
pub async fn run(app_config: AppConfig) -> Result<()> {
    let (_trigger, watcher) = shutdown::channel();
    run_until(app_config, watcher).await?;
    Ok(())
}

/// 🎛️ Like [`run`], stopping whenever `watcher` says so.
pub async fn run_until(app_config: AppConfig, watcher: ShutdownWatcher) -> Result<ShutdownReport> {
    let pipeline = Supervisor::new(app_config)
        .start()
        .await
        .context("💀 The pipeline didn't make it to the starting line")?;
    info!("📡 accepting records on {}", pipeline.proxy_addr());

    let cause = watcher.wait().await;
    // -- even if listening for signals broke, the pipeline still has to drain
    let report = pipeline.shutdown().await?;
    report.log();
    cause.context("💀 Lost track of the shutdown signal")?;
    Ok(report)
}
