//! 🧠 InMemoryStore: a document store that lives and dies with the process.
//!
//! Every clone points at the same `Arc<Mutex<InMemoryState>>`, so a handful of savers
//! can increment the same counters and a test can peek at the totals afterwards.
//!
//! ⚠️ Not for production. If you're deploying this to prod, please also deploy a therapist.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use super::DocumentStore;
use crate::common::{EntityCount, StoreMessage};

/// 📊 Everything the store has been told so far.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InMemoryState {
    /// partition key → item count
    pub partitions: HashMap<String, u64>,
    /// (partition key, collection, doc id) → entity document
    pub entities: HashMap<(String, String, String), EntityCount>,
    /// messages applied, of either shape
    pub applied: u64,
}

impl InMemoryState {
    pub fn partition_count(&self, partition_key: &str) -> u64 {
        self.partitions.get(partition_key).copied().unwrap_or(0)
    }

    /// 🔢 Count for `word` under `partition_key`, wherever the doc id says it lives.
    pub fn entity_count(&self, partition_key: &str, word: &str) -> u64 {
        self.entities
            .iter()
            .filter(|((partition, _, _), doc)| partition == partition_key && doc.word == word)
            .map(|(_, doc)| doc.count)
            .sum()
    }

    /// 🔢 Sum of every partition counter.
    pub fn total_items(&self) -> u64 {
        self.partitions.values().sum()
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryState>>,
    /// 💥 A partition this store refuses to persist. Failure injection for tests.
    poison_partition: Option<String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 💥 Same shared state, but this handle fails on messages for `partition_key`.
    pub fn poisoned(&self, partition_key: impl Into<String>) -> Self {
        Self {
            state: Arc::clone(&self.state),
            poison_partition: Some(partition_key.into()),
        }
    }

    pub async fn snapshot(&self) -> InMemoryState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn persist(&mut self, message: &StoreMessage) -> Result<()> {
        if self.poison_partition.as_deref() == Some(message.partition_key()) {
            anyhow::bail!(
                "💀 in-memory store refused partition '{}'. It was told to. It did.",
                message.partition_key()
            );
        }

        let mut state = self.state.lock().await;
        match message {
            StoreMessage::PartitionCount { partition_key, count } => {
                *state.partitions.entry(partition_key.clone()).or_insert(0) += count;
            }
            StoreMessage::EntityCount { partition_key, collection, doc_id, payload } => {
                let doc = state
                    .entities
                    .entry((partition_key.clone(), collection.clone(), doc_id.clone()))
                    .or_insert_with(|| EntityCount { word: payload.word.clone(), count: 0 });
                // -- increment the count, upsert the rest
                doc.count += payload.count;
                doc.word.clone_from(&payload.word);
            }
        }
        state.applied += 1;
        trace!(partition = message.partition_key(), "🧠 in-memory store applied a message");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
