//! 🎩 CapitalizedExtractor: if it wears a capital letter, it might be somebody.
//!
//! A cheap stand-in for a real named-entity model. Consecutive capitalized tokens
//! form one entity (`"Acme Corp"` → `"acme corp"`). A capitalized stopword at the
//! start of a sentence is just grammar, so it doesn't start an entity. Quantities
//! (numbers, money, dates, times, ordinals) never count.

use anyhow::Result;

use super::{Extractor, is_quantity_like, is_stopword, tokenize};
use crate::common::{ProcessedRecord, RawRecord};

#[derive(Debug, Default)]
pub struct CapitalizedExtractor {
    // -- reused between records so the hot loop doesn't allocate a fresh Vec every time
    scratch: Vec<String>,
}

impl CapitalizedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    fn flush_phrase(&mut self, record: &mut ProcessedRecord) {
        if !self.scratch.is_empty() {
            record.add_entity(self.scratch.join(" "));
            self.scratch.clear();
        }
    }
}

fn is_capitalized(token: &str) -> bool {
    token.chars().next().is_some_and(char::is_uppercase)
}

impl Extractor for CapitalizedExtractor {
    fn extract(&mut self, record: RawRecord) -> Result<ProcessedRecord> {
        let mut processed = ProcessedRecord::new(record.partition_label);
        self.scratch.clear();

        for (token, at_boundary) in tokenize(&record.content) {
            let starts_entity = is_capitalized(token)
                && !is_quantity_like(token)
                && !(self.scratch.is_empty() && is_stopword(token));

            if starts_entity {
                self.scratch.push(token.to_lowercase());
            } else {
                self.flush_phrase(&mut processed);
            }
            // -- punctuation ends phrases too. "Paris, London" is two cities, not one.
            if at_boundary {
                self.flush_phrase(&mut processed);
            }
        }
        self.flush_phrase(&mut processed);
        Ok(processed)
    }
}
