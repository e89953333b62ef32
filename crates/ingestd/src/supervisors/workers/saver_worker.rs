//! 🗄️ SaverWorker: drains the output queue into a store, one message at a time.
//!
//! It receives messages. It persists messages. It asks no questions. If the store says
//! no, the saver leaves, and the rest of the pool keeps draining without it.

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::Worker;
use crate::common::StoreMessage;
use crate::queue::{ConsumerGuard, Delivery, DrainableQueue};
use crate::report::WorkerSummary;
use crate::stores::{DocumentStore, StoreBackend};

#[derive(Debug)]
pub(crate) struct SaverWorker {
    id: usize,
    input: DrainableQueue<StoreMessage>,
    store: StoreBackend,
    _consumer: ConsumerGuard<StoreMessage>,
}

impl SaverWorker {
    /// 🏗️ One saver, one store client. Clients are never shared between savers.
    pub(crate) fn new(id: usize, input: DrainableQueue<StoreMessage>, store: StoreBackend) -> Self {
        Self {
            id,
            _consumer: input.attach_consumer(),
            input,
            store,
        }
    }
}

impl Worker for SaverWorker {
    fn start(mut self) -> JoinHandle<Result<WorkerSummary>> {
        tokio::spawn(async move {
            // 🎫 lives as long as this task, however it ends
            let _consumer = &self._consumer;
            debug!(worker = self.id, "📥 saver started draining {}", self.input.name());
            let mut summary = WorkerSummary::default();
            loop {
                match self.input.get().await {
                    Delivery::Item(message) => {
                        trace!(worker = self.id, partition = message.partition_key(), "🪣 persisting");
                        self.store.persist(&message).await.with_context(|| {
                            format!(
                                "💀 saver {} failed to persist a message for partition '{}'",
                                self.id,
                                message.partition_key()
                            )
                        })?;
                        summary.records += 1;
                    }
                    Delivery::Stop => {
                        self.store
                            .close()
                            .await
                            .with_context(|| format!("💀 saver {} failed to close its store", self.id))?;
                        info!(worker = self.id, "🏁 saver done: {} message(s) persisted", summary.records);
                        return Ok(summary);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryStore;

    #[tokio::test]
    async fn the_one_where_every_message_lands_before_the_saver_leaves() -> Result<()> {
        let queue = DrainableQueue::unbounded("oqueue");
        let store = InMemoryStore::new();
        queue.put(StoreMessage::partition("acme corp", 2)).await;
        queue.put(StoreMessage::entity("acme corp", "android", 2)).await;
        queue.put(StoreMessage::partition("acme corp", 1)).await;

        let handle = SaverWorker::new(0, queue.clone(), StoreBackend::InMemory(store.clone())).start();
        queue.disable_writes();
        queue.wake_one().await;
        let summary = handle.await??;

        assert_eq!(summary.records, 3);
        let state = store.snapshot().await;
        assert_eq!(state.partition_count("acme corp"), 3);
        assert_eq!(state.entity_count("acme corp", "android"), 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_store_refuses_and_the_saver_quits() -> Result<()> {
        let queue = DrainableQueue::unbounded("oqueue");
        let store = InMemoryStore::new();
        queue.put(StoreMessage::partition("boom", 1)).await;

        let handle = SaverWorker::new(3, queue.clone(), StoreBackend::InMemory(store.poisoned("boom"))).start();
        let err = handle.await?.expect_err("💀 a poisoned store should fail the saver");
        assert!(format!("{err:#}").contains("saver 3"));
        assert_eq!(store.snapshot().await.applied, 0);
        Ok(())
    }
}
