//! 🧮 Aggregation: the per-worker tally sheet.
//!
//! Every extract worker keeps one [`AggregationCache`]. Processed records go in,
//! grouped by normalized partition key. When enough records have piled up, the
//! cache is drained into [`StoreMessage`]s and the slate is wiped clean.
//!
//! ```text
//!   ProcessedRecord ──▶ AggregatedRecord::from_processed ──┐
//!                                                          ▼
//!                         cache[key] = combine(cache[key], new)
//!                                                          │  (threshold hit)
//!                                                          ▼
//!               flush ──▶ top-N EntityCount + one PartitionCount per key
//! ```
//!
//! ⚠️ Caches are never shared between workers. Two workers can flush the same
//! partition at different times; the store has to add, never overwrite.

use std::collections::HashMap;

use anyhow::{Result, ensure};

use crate::common::{ProcessedRecord, StoreMessage};

/// 🏔️ Max per-entity messages one aggregated record may expand into.
pub const DEFAULT_TOP_ENTITIES: usize = 2000;

/// 📦 Everything one worker knows about one partition since its last flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedRecord {
    partition_key: String,
    entities: HashMap<String, u64>,
    item_count: u64,
}

impl AggregatedRecord {
    /// 🏗️ One processed record, aggregated. `item_count` starts at 1, it merged itself.
    pub fn from_processed(record: ProcessedRecord) -> Self {
        Self {
            partition_key: record.partition_key(),
            entities: record.entities,
            item_count: 1,
        }
    }

    /// ➕ The combine. Pure, associative, commutative. Takes two, gives back one.
    ///
    /// Both sides must live under the same partition key; the key comes from the
    /// normalized label and nowhere else.
    pub fn combine(self, other: AggregatedRecord) -> Result<AggregatedRecord> {
        ensure!(
            self.partition_key == other.partition_key,
            "💀 Refusing to combine partition '{}' with partition '{}'. They are different partitions. They have different lives.",
            self.partition_key,
            other.partition_key
        );
        // 🔄 fold the smaller map into the bigger one, less hashing, same answer
        let (mut into, from) = if self.entities.len() >= other.entities.len() {
            (self.entities, other.entities)
        } else {
            (other.entities, self.entities)
        };
        for (word, count) in from {
            *into.entry(word).or_insert(0) += count;
        }
        Ok(AggregatedRecord {
            partition_key: self.partition_key,
            entities: into,
            item_count: self.item_count + other.item_count,
        })
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    pub fn entities(&self) -> &HashMap<String, u64> {
        &self.entities
    }

    /// 📤 Expand into store messages: up to `top_n` entity upserts, then one partition count.
    ///
    /// Entities are ordered by count, highest first; ties go to the word that sorts first.
    pub fn into_store_messages(self, top_n: usize) -> Vec<StoreMessage> {
        let mut ranked: Vec<(String, u64)> = self.entities.into_iter().collect();
        ranked.sort_unstable_by(|(a_word, a_count), (b_word, b_count)| {
            b_count.cmp(a_count).then_with(|| a_word.cmp(b_word))
        });
        ranked.truncate(top_n);

        let mut messages = Vec::with_capacity(ranked.len() + 1);
        for (word, count) in ranked {
            messages.push(StoreMessage::entity(self.partition_key.clone(), word, count));
        }
        messages.push(StoreMessage::partition(self.partition_key, self.item_count));
        messages
    }
}

/// 🗄️ The cache itself. Keyed by partition, counted by record, flushed by threshold.
#[derive(Debug)]
pub struct AggregationCache {
    records: HashMap<String, AggregatedRecord>,
    pending: usize,
    threshold: usize,
    top_n: usize,
}

impl AggregationCache {
    pub fn new(threshold: usize) -> Self {
        Self::with_top_n(threshold, DEFAULT_TOP_ENTITIES)
    }

    pub fn with_top_n(threshold: usize, top_n: usize) -> Self {
        Self {
            records: HashMap::new(),
            pending: 0,
            // -- a threshold of 0 would flush on every... nothing. 1 is the floor.
            threshold: threshold.max(1),
            top_n,
        }
    }

    /// 📥 Merge one processed record in. Returns how many records are pending since the last flush.
    pub fn insert(&mut self, record: ProcessedRecord) -> Result<usize> {
        let incoming = AggregatedRecord::from_processed(record);
        let merged = match self.records.remove(incoming.partition_key()) {
            Some(existing) => existing.combine(incoming)?,
            None => incoming,
        };
        self.records.insert(merged.partition_key.clone(), merged);
        self.pending += 1;
        Ok(self.pending)
    }

    /// 🚦 Time to flush?
    pub fn is_full(&self) -> bool {
        self.pending >= self.threshold
    }

    /// 🔢 Records merged since the last flush.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// 🔑 Distinct partitions currently cached.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn get(&self, partition_key: &str) -> Option<&AggregatedRecord> {
        self.records.get(partition_key)
    }

    /// 🚽 Flush: expand every cached record into store messages, empty the cache, reset the counter.
    pub fn drain(&mut self) -> Vec<StoreMessage> {
        let top_n = self.top_n;
        let messages = self
            .records
            .drain()
            .flat_map(|(_, record)| record.into_store_messages(top_n))
            .collect();
        self.pending = 0;
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processed(label: &str, words: &[&str]) -> ProcessedRecord {
        let mut record = ProcessedRecord::new(label);
        for word in words {
            record.add_entity(*word);
        }
        record
    }

    #[test]
    fn the_one_where_acme_corp_and_its_sloppy_twin_merge() -> Result<()> {
        let mut cache = AggregationCache::new(100);
        cache.insert(processed("Acme Corp", &["android"]))?;
        cache.insert(processed("acme corp ", &["android", "john"]))?;

        assert_eq!(cache.len(), 1);
        let record = cache.get("acme corp").expect("💀 acme corp should be cached");
        assert_eq!(record.item_count(), 2);
        assert_eq!(record.entities().get("android"), Some(&2));
        assert_eq!(record.entities().get("john"), Some(&1));
        Ok(())
    }

    #[test]
    fn the_one_where_merge_order_does_not_matter() -> Result<()> {
        let a = AggregatedRecord::from_processed(processed("p", &["x", "y"]));
        let b = AggregatedRecord::from_processed(processed("P", &["y", "z", "z"]));
        let c = AggregatedRecord::from_processed(processed(" p", &["x"]));

        let left = a.clone().combine(b.clone())?.combine(c.clone())?;
        let right = c.combine(b)?.combine(a)?;
        assert_eq!(left, right);
        assert_eq!(left.item_count(), 3);
        assert_eq!(left.entities().get("x"), Some(&2));
        assert_eq!(left.entities().get("y"), Some(&2));
        assert_eq!(left.entities().get("z"), Some(&2));
        Ok(())
    }

    #[test]
    fn the_one_where_different_partitions_refuse_to_hold_hands() {
        let a = AggregatedRecord::from_processed(processed("left", &[]));
        let b = AggregatedRecord::from_processed(processed("right", &[]));
        assert!(a.combine(b).is_err());
    }

    #[test]
    fn the_one_where_the_flush_leaves_nothing_behind() -> Result<()> {
        let mut cache = AggregationCache::new(3);
        cache.insert(processed("alpha", &["one", "two"]))?;
        cache.insert(processed("beta", &["three"]))?;
        assert!(!cache.is_full());
        assert_eq!(cache.insert(processed("alpha", &["one"]))?, 3);
        assert!(cache.is_full());

        let messages = cache.drain();
        assert!(cache.is_empty());
        assert_eq!(cache.pending(), 0);

        let partition_counts: Vec<_> = messages
            .iter()
            .filter(|m| m.collection().is_none())
            .collect();
        assert_eq!(partition_counts.len(), 2, "exactly one count message per partition");
        let alpha_count = partition_counts
            .iter()
            .find(|m| m.partition_key() == "alpha")
            .map(|m| m.count());
        assert_eq!(alpha_count, Some(2));
        assert_eq!(messages.len(), 2 + 3);
        Ok(())
    }

    #[test]
    fn the_one_where_only_the_top_two_thousand_make_the_cut() -> Result<()> {
        let mut record = ProcessedRecord::new("big");
        for i in 0..2500 {
            record.add_entity(format!("word-{i:04}"));
        }
        // 🏆 one word that clearly wins
        record.add_entity("word-2499");

        let messages = AggregatedRecord::from_processed(record).into_store_messages(DEFAULT_TOP_ENTITIES);
        let entity_messages: Vec<_> = messages.iter().filter(|m| m.doc_id().is_some()).collect();
        assert_eq!(entity_messages.len(), DEFAULT_TOP_ENTITIES);
        assert_eq!(messages.len(), DEFAULT_TOP_ENTITIES + 1);
        match entity_messages[0] {
            StoreMessage::EntityCount { payload, .. } => {
                assert_eq!(payload.word, "word-2499");
                assert_eq!(payload.count, 2);
            }
            other => panic!("💀 expected an entity message first, got {other:?}"),
        }
        // 🎯 ties are broken alphabetically, so word-0000 leads the single-count crowd
        match entity_messages[1] {
            StoreMessage::EntityCount { payload, .. } => assert_eq!(payload.word, "word-0000"),
            other => panic!("💀 expected an entity message, got {other:?}"),
        }
        assert!(matches!(messages.last(), Some(StoreMessage::PartitionCount { count: 1, .. })));
        Ok(())
    }

    #[test]
    fn the_one_where_a_zero_threshold_is_quietly_promoted_to_one() -> Result<()> {
        let mut cache = AggregationCache::new(0);
        assert_eq!(cache.threshold(), 1);
        cache.insert(processed("p", &[]))?;
        assert!(cache.is_full());
        Ok(())
    }
}
