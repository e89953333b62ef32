//! 📦 Common data structures, the building blocks of ingestd.
//!
//! 🎬 A record arrives. It has some words and a label. That is all it has.
//! By the time it leaves, it will be a number in somebody's document store,
//! and it will not remember how it got there. Nobody will. That's the pipeline.
//!
//! This module holds the humble types that ride the queues:
//! [`RawRecord`] goes into the input queue, [`ProcessedRecord`] is what an
//! extractor hands back, and [`StoreMessage`] goes into the output queue. 🦆

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 📁 The collection every per-entity document lands in.
pub const ENTITY_COLLECTION: &str = "entities";

/// 📥 One raw record, exactly as a producer handed it over.
///
/// Immutable by convention, consumed once by exactly one worker.
/// On the wire the label is `partitionLabel`, because the producers speak camelCase
/// and we are polite guests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub content: String,
    #[serde(rename = "partitionLabel", alias = "partition_label")]
    pub partition_label: String,
}

impl RawRecord {
    pub fn new(content: impl Into<String>, partition_label: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            partition_label: partition_label.into(),
        }
    }

    /// 🔑 The normalized partition key this record will be grouped under.
    pub fn partition_key(&self) -> String {
        normalize_partition_key(&self.partition_label)
    }
}

/// 🔬 What an extractor hands back: the label it came with, plus a multiset of entities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedRecord {
    pub partition_label: String,
    pub entities: HashMap<String, u64>,
}

impl ProcessedRecord {
    pub fn new(partition_label: impl Into<String>) -> Self {
        Self {
            partition_label: partition_label.into(),
            entities: HashMap::new(),
        }
    }

    /// ➕ Count one more sighting of `entity`.
    pub fn add_entity(&mut self, entity: impl Into<String>) {
        *self.entities.entry(entity.into()).or_insert(0) += 1;
    }

    pub fn partition_key(&self) -> String {
        normalize_partition_key(&self.partition_label)
    }
}

/// 🔑 Trim, then lower-case. `"Acme Corp"` and `"acme corp "` are the same partition,
/// and they have always been the same partition, they just didn't know it yet.
pub fn normalize_partition_key(label: &str) -> String {
    label.trim().to_lowercase()
}

/// 🔐 Stable document id for an entity: lowercase hex SHA-256 of its text.
///
/// Must be stable across workers, savers and restarts, otherwise two savers would
/// happily increment two different documents for the same word.
pub fn entity_doc_id(entity: &str) -> String {
    format!("{:x}", Sha256::digest(entity.as_bytes()))
}

/// 📝 Payload of a per-entity upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCount {
    pub word: String,
    pub count: u64,
}

/// 📤 One message on the output queue, headed for the document store.
///
/// Two shapes. An entity upsert knows its collection and doc id. A partition increment
/// knows neither, and [`StoreMessage::collection`] / [`StoreMessage::doc_id`] return
/// `None` for it, which is how stores tell the two apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreMessage {
    EntityCount {
        partition_key: String,
        collection: String,
        doc_id: String,
        payload: EntityCount,
    },
    PartitionCount {
        partition_key: String,
        count: u64,
    },
}

impl StoreMessage {
    pub fn entity(partition_key: impl Into<String>, word: impl Into<String>, count: u64) -> Self {
        let word = word.into();
        StoreMessage::EntityCount {
            partition_key: partition_key.into(),
            collection: ENTITY_COLLECTION.to_string(),
            doc_id: entity_doc_id(&word),
            payload: EntityCount { word, count },
        }
    }

    pub fn partition(partition_key: impl Into<String>, count: u64) -> Self {
        StoreMessage::PartitionCount {
            partition_key: partition_key.into(),
            count,
        }
    }

    pub fn partition_key(&self) -> &str {
        match self {
            StoreMessage::EntityCount { partition_key, .. } => partition_key,
            StoreMessage::PartitionCount { partition_key, .. } => partition_key,
        }
    }

    pub fn collection(&self) -> Option<&str> {
        match self {
            StoreMessage::EntityCount { collection, .. } => Some(collection),
            StoreMessage::PartitionCount { .. } => None,
        }
    }

    pub fn doc_id(&self) -> Option<&str> {
        match self {
            StoreMessage::EntityCount { doc_id, .. } => Some(doc_id),
            StoreMessage::PartitionCount { .. } => None,
        }
    }

    /// 🔢 How much this message increments by, whatever its shape.
    pub fn count(&self) -> u64 {
        match self {
            StoreMessage::EntityCount { payload, .. } => payload.count,
            StoreMessage::PartitionCount { count, .. } => *count,
        }
    }
}
