//! 🗄️ Stores: where the tallies finally come to rest.
//!
//! Persistence is a pluggable capability. A saver hands each [`StoreMessage`] to its
//! store, one at a time, and the store turns it into an atomic increment:
//!
//! - `PartitionCount` → bump the partition-level counter by `count`.
//! - `EntityCount` → bump the entity document's `count`, upserting `word` alongside.
//!
//! Increments, never sets. Two workers can flush the same partition at different
//! times and both flushes must add up. 🦆
//!
//! Same casting-agency layout as everywhere else in here: a trait, a handful of
//! concrete stores, and an enum that dispatches to whichever one the config picked.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::common::StoreMessage;

pub(crate) mod elasticsearch;
pub(crate) mod in_mem;
pub(crate) mod noop;

pub use elasticsearch::{ElasticsearchStore, ElasticsearchStoreConfig};
pub use in_mem::{InMemoryState, InMemoryStore};
pub use noop::NoopStore;

/// 🗄️ The persistence capability.
///
/// # Contract 📜
/// - `persist` applies one message as an increment. It must be safe to apply
///   concurrently from several savers, and applying it twice counts twice.
/// - `close` releases whatever the store holds. Savers call it on a clean exit.
#[async_trait]
pub trait DocumentStore: std::fmt::Debug + Send {
    async fn persist(&mut self, message: &StoreMessage) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// 🔧 Which store the savers write to.
#[derive(Debug, Deserialize, Clone, Default)]
pub enum StoreConfig {
    /// 🕳️ Accept everything, keep nothing. What `--no-persistence` turns on.
    #[default]
    Noop,
    /// 🧠 Keep everything in RAM, shared by every saver. Local runs and tests.
    InMemory,
    Elasticsearch(ElasticsearchStoreConfig),
}

impl StoreConfig {
    /// 🏗️ One store client per saver. Clients are never shared across savers,
    /// though the in-memory store's clients all point at the same state.
    pub async fn build_for_savers(&self, saver_count: usize) -> Result<Vec<StoreBackend>> {
        let mut stores = Vec::with_capacity(saver_count);
        match self {
            StoreConfig::Noop => {
                stores.extend((0..saver_count).map(|_| StoreBackend::Noop(NoopStore::new())));
            }
            StoreConfig::InMemory => {
                let store = InMemoryStore::new();
                stores.extend((0..saver_count).map(|_| StoreBackend::InMemory(store.clone())));
            }
            StoreConfig::Elasticsearch(config) => {
                for _ in 0..saver_count {
                    stores.push(StoreBackend::Elasticsearch(
                        ElasticsearchStore::new(config.clone()).await?,
                    ));
                }
            }
        }
        info!("🗄️ built {} store client(s) ({})", stores.len(), self.label());
        Ok(stores)
    }

    pub fn label(&self) -> &'static str {
        match self {
            StoreConfig::Noop => "noop",
            StoreConfig::InMemory => "in-memory",
            StoreConfig::Elasticsearch(_) => "elasticsearch",
        }
    }
}

/// 🎭 The many faces of a store.
#[derive(Debug)]
pub enum StoreBackend {
    Noop(NoopStore),
    InMemory(InMemoryStore),
    Elasticsearch(ElasticsearchStore),
}

#[async_trait]
impl DocumentStore for StoreBackend {
    async fn persist(&mut self, message: &StoreMessage) -> Result<()> {
        match self {
            StoreBackend::Noop(store) => store.persist(message).await,
            StoreBackend::InMemory(store) => store.persist(message).await,
            StoreBackend::Elasticsearch(store) => store.persist(message).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            StoreBackend::Noop(store) => store.close().await,
            StoreBackend::InMemory(store) => store.close().await,
            StoreBackend::Elasticsearch(store) => store.close().await,
        }
    }
}
