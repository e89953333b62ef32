//! 🧵 Workers: the tasks that actually do the work while the Supervisor takes the credit.
//!
//! Two kinds. Both pull from a [`DrainableQueue`](crate::queue::DrainableQueue) until it
//! says [`Stop`](crate::queue::Delivery::Stop), and both hand back a
//! [`WorkerSummary`] when they leave cleanly:
//!
//! - [`ExtractWorker`]: raw records in, aggregated store messages out.
//! - [`SaverWorker`]: store messages in, increments in the store out.
//!
//! ⚠️ Workers are the Supervisor's private business. Nothing outside `supervisors` spawns them.

use anyhow::Result;
use tokio::task::JoinHandle;

use crate::report::WorkerSummary;

mod extract_worker;
mod saver_worker;

pub(crate) use extract_worker::ExtractWorker;
pub(crate) use saver_worker::SaverWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// `start` consumes the worker and spawns it. The handle resolves once the worker has
/// seen `Stop` (or given up), with its counters or the reason it gave up.
pub(crate) trait Worker {
    fn start(self) -> JoinHandle<Result<WorkerSummary>>;
}
