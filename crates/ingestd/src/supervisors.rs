//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where workers toil endlessly..."
//! 🎬 "One supervisor dared to start them all. And, harder, to stop them all."
//!
//! 📦 The Supervisor builds the pipeline and tears it down in the only order that
//! loses nothing:
//!
//! ```text
//!   producer ─▶ proxy ─▶ iqueue ─▶ [extract workers] ─▶ oqueue ─▶ [savers] ─▶ store
//!
//!   shutdown: iqueue  → disable writes, wake each extract worker, join them all
//!             oqueue  → disable writes, wake each saver, join them all
//!             proxy   → stop accepting
//! ```
//!
//! Input side first, so every final flush still has a writable oqueue to land in.
//! Failed workers get logged and written into the [`ShutdownReport`]. Nobody is retried.
//!
//! ⚠️ Workers are private. The world gets the Supervisor and the RunningPipeline.

mod workers;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app_config::AppConfig;
use crate::common::{RawRecord, StoreMessage};
use crate::proxy::{ProxyHandle, QueueProxyServer};
use crate::queue::DrainableQueue;
use crate::report::{PoolKind, ShutdownReport, WorkerReport, WorkerStatus, WorkerSummary};
use crate::stores::{StoreBackend, StoreConfig};
use workers::{ExtractWorker, SaverWorker, Worker};

pub const INPUT_QUEUE: &str = "iqueue";
pub const OUTPUT_QUEUE: &str = "oqueue";

/// 👷 A set of same-kind workers draining one queue.
#[derive(Debug)]
pub(crate) struct Pool<T> {
    kind: PoolKind,
    queue: DrainableQueue<T>,
    handles: Vec<JoinHandle<Result<WorkerSummary>>>,
}

impl<T: Send> Pool<T> {
    pub(crate) fn new(kind: PoolKind, queue: DrainableQueue<T>) -> Self {
        Self {
            kind,
            queue,
            handles: Vec::new(),
        }
    }

    /// 🚀 Build the next worker with its id and start it.
    pub(crate) fn spawn_with<W, F>(&mut self, build: F)
    where
        W: Worker,
        F: FnOnce(usize) -> W,
    {
        let id = self.handles.len();
        self.handles.push(build(id).start());
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// 🛑 Disable writes, wake every worker once, join every worker (all at once, reported in id order).
    ///
    /// One wake-up per worker: each one sits behind the remaining backlog, so a worker
    /// only sees it after everything ahead of it has been handed out. A worker that
    /// already died leaves its wake-up unclaimed, which is harmless. When no worker is
    /// left the queue is closed, so a wake-up never waits for room in a full one.
    pub(crate) async fn shutdown(self) -> Vec<WorkerReport> {
        info!(
            "🛑 shutting down {} pool: {} worker(s), {} envelope(s) left in {}",
            self.kind,
            self.handles.len(),
            self.queue.len(),
            self.queue.name()
        );
        self.queue.disable_writes();
        for _ in 0..self.handles.len() {
            self.queue.wake_one().await;
        }

        let outcomes = join_all(self.handles).await;
        let mut reports = Vec::with_capacity(outcomes.len());
        for (id, outcome) in outcomes.into_iter().enumerate() {
            let (status, summary) = match outcome {
                Ok(Ok(summary)) => (WorkerStatus::Finished, summary),
                Ok(Err(err)) => {
                    error!(pool = %self.kind, worker = id, "💀 worker failed: {err:#}");
                    (WorkerStatus::Failed(format!("{err:#}")), WorkerSummary::default())
                }
                Err(join_err) => {
                    error!(pool = %self.kind, worker = id, "💥 worker panicked: {join_err}");
                    (WorkerStatus::Panicked(join_err.to_string()), WorkerSummary::default())
                }
            };
            reports.push(WorkerReport {
                pool: self.kind,
                id,
                status,
                summary,
            });
        }
        info!("✅ {} pool joined", self.kind);
        reports
    }
}

/// 📦 The Supervisor: takes a config, hands back a running pipeline.
#[derive(Debug)]
pub struct Supervisor {
    app_config: AppConfig,
}

impl Supervisor {
    pub fn new(app_config: AppConfig) -> Self {
        Self { app_config }
    }

    /// 🚀 Connect the stores, then bring up the proxy, the extract workers and the savers.
    ///
    /// Stores are built first: a store that can't be reached should fail startup
    /// before the proxy starts accepting records nobody can save.
    pub async fn start(self) -> Result<RunningPipeline> {
        let store_config = if self.app_config.no_persistence {
            info!("🕳️ no-persistence mode: savers will drain into the void");
            StoreConfig::Noop
        } else {
            self.app_config.store.clone()
        };
        let stores = store_config
            .build_for_savers(self.app_config.runtime.saver_count.max(1))
            .await
            .context("💀 Couldn't build the savers' store clients")?;
        self.start_with_stores(stores).await
    }

    /// 🚀 Like [`Supervisor::start`], with store clients you built yourself. One saver per client.
    pub async fn start_with_stores(self, stores: Vec<StoreBackend>) -> Result<RunningPipeline> {
        let runtime = &self.app_config.runtime;
        let input = DrainableQueue::with_capacity(INPUT_QUEUE, runtime.queue_capacity);
        let output = DrainableQueue::with_capacity(OUTPUT_QUEUE, runtime.queue_capacity);

        let proxy = QueueProxyServer::new(self.app_config.proxy.clone())
            .register(input.clone())
            .start()
            .await
            .context("💀 Couldn't start the queue proxy")?;

        let mut extract_pool = Pool::new(PoolKind::Extract, input.clone());
        for _ in 0..runtime.worker_count.max(1) {
            extract_pool.spawn_with(|id| {
                ExtractWorker::new(
                    id,
                    input.clone(),
                    output.clone(),
                    self.app_config.extractor.clone(),
                    runtime.cache_threshold,
                )
            });
        }

        let mut save_pool = Pool::new(PoolKind::Save, output.clone());
        for store in stores {
            save_pool.spawn_with(|id| SaverWorker::new(id, output.clone(), store));
        }

        info!(
            "🚀 pipeline up: {} extract worker(s), {} saver(s), cache threshold {}, proxy on {}",
            extract_pool.len(),
            save_pool.len(),
            runtime.cache_threshold,
            proxy.local_addr()
        );
        Ok(RunningPipeline {
            proxy,
            input,
            extract_pool,
            save_pool,
        })
    }
}

/// 🏃 A pipeline that is up and taking records.
#[derive(Debug)]
pub struct RunningPipeline {
    proxy: ProxyHandle,
    input: DrainableQueue<RawRecord>,
    extract_pool: Pool<RawRecord>,
    save_pool: Pool<StoreMessage>,
}

impl RunningPipeline {
    /// 📍 Where the proxy actually listens. Handy when the config asked for port 0.
    pub fn proxy_addr(&self) -> SocketAddr {
        self.proxy.local_addr()
    }

    /// 🚰 The input queue, for in-process producers.
    pub fn input_queue(&self) -> &DrainableQueue<RawRecord> {
        &self.input
    }

    /// 🛑 Input side, then output side, then the proxy. Returns who finished and who didn't.
    pub async fn shutdown(self) -> Result<ShutdownReport> {
        info!("🛑 pipeline shutdown started");
        let mut report = ShutdownReport::new();
        report.extend(self.extract_pool.shutdown().await);
        report.extend(self.save_pool.shutdown().await);
        self.proxy
            .shutdown()
            .await
            .context("💀 The queue proxy didn't stop cleanly")?;
        info!("🏁 pipeline shutdown complete");
        Ok(report)
    }
}
