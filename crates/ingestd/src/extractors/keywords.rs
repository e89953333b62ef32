//! 🔤 KeywordExtractor: bag of words, minus the boring ones.

use anyhow::Result;

use super::{Extractor, is_quantity_like, is_stopword, tokenize};
use crate::common::{ProcessedRecord, RawRecord};

#[derive(Debug)]
pub struct KeywordExtractor {
    min_len: usize,
}

impl KeywordExtractor {
    pub fn new(min_len: usize) -> Self {
        Self { min_len }
    }
}

impl Extractor for KeywordExtractor {
    fn extract(&mut self, record: RawRecord) -> Result<ProcessedRecord> {
        let mut processed = ProcessedRecord::new(record.partition_label);
        for (token, _) in tokenize(&record.content) {
            if token.chars().count() < self.min_len || is_stopword(token) || is_quantity_like(token) {
                continue;
            }
            processed.add_entity(token.to_lowercase());
        }
        Ok(processed)
    }
}
