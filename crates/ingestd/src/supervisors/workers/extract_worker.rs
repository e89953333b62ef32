//! 🔬 ExtractWorker: pulls raw records, pulls entities out of them, keeps score.
//!
//! ```text
//!   iqueue ──get──▶ extract ──▶ AggregationCache ──(threshold or Stop)──▶ put_many ──▶ oqueue
//! ```
//!
//! The cache is the worker's own. No locks, no sharing, no feelings. The extractor is
//! built once when the task starts and dropped when it exits.

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::Worker;
use crate::aggregation::AggregationCache;
use crate::common::{RawRecord, StoreMessage};
use crate::extractors::{Extractor, ExtractorConfig};
use crate::queue::{ConsumerGuard, Delivery, DrainableQueue};
use crate::report::WorkerSummary;

/// 🧘 Records between voluntary yields. Extraction is CPU work with no await in it,
/// and a worker that never awaits never lets anyone else run on its thread.
const YIELD_EVERY: u64 = 128;

#[derive(Debug)]
pub(crate) struct ExtractWorker {
    id: usize,
    input: DrainableQueue<RawRecord>,
    output: DrainableQueue<StoreMessage>,
    extractor: ExtractorConfig,
    cache: AggregationCache,
    _consumer: ConsumerGuard<RawRecord>,
}

impl ExtractWorker {
    pub(crate) fn new(
        id: usize,
        input: DrainableQueue<RawRecord>,
        output: DrainableQueue<StoreMessage>,
        extractor: ExtractorConfig,
        cache_threshold: usize,
    ) -> Self {
        Self {
            id,
            _consumer: input.attach_consumer(),
            input,
            output,
            extractor,
            cache: AggregationCache::new(cache_threshold),
        }
    }

    /// 🚽 Expand the cache and push it downstream. Returns how many messages went out.
    async fn flush(&mut self) -> u64 {
        let messages = self.cache.drain();
        if messages.is_empty() {
            return 0;
        }
        let produced = messages.len();
        let accepted = self.output.put_many(messages).await;
        debug!(
            worker = self.id,
            "🚽 flushed {} message(s) to {} ({} accepted)",
            produced,
            self.output.name(),
            accepted
        );
        produced as u64
    }
}

impl Worker for ExtractWorker {
    fn start(mut self) -> JoinHandle<Result<WorkerSummary>> {
        tokio::spawn(async move {
            let mut extractor = self
                .extractor
                .build()
                .with_context(|| format!("💀 extract worker {} couldn't build its extractor", self.id))?;
            debug!(worker = self.id, "🔬 extract worker started ({})", extractor.label());

            let mut summary = WorkerSummary::default();
            loop {
                let record = match self.input.get().await {
                    Delivery::Item(record) => record,
                    Delivery::Stop => break,
                };

                let processed = extractor.extract(record).with_context(|| {
                    format!("💀 extract worker {} choked on a record. The record is gone.", self.id)
                })?;
                self.cache.insert(processed)?;
                summary.records += 1;

                if self.cache.is_full() {
                    summary.messages += self.flush().await;
                    summary.flushes += 1;
                }
                if summary.records % YIELD_EVERY == 0 {
                    tokio::task::yield_now().await;
                }
            }

            // 🏁 whatever's left goes out before we do
            summary.messages += self.flush().await;
            info!(
                worker = self.id,
                "🏁 extract worker done: {} record(s), {} threshold flush(es), {} message(s)",
                summary.records,
                summary.flushes,
                summary.messages
            );
            Ok(summary)
        })
    }
}
