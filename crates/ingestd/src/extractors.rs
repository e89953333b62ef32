//! 🔬 Extractors: turn a [`RawRecord`] into a [`ProcessedRecord`].
//!
//! The text analysis itself is a pluggable capability. Every extract worker builds
//! exactly one extractor when it starts and keeps it until it exits. Models can be
//! heavy to load, and loading one per record is how you turn a pipeline into a space heater.
//!
//! ```text
//!   ExtractorConfig ──build()──▶ ExtractorBackend ──extract(record)──▶ ProcessedRecord
//!      (serde)                    (one per worker)
//! ```
//!
//! Same dispatch shape as the stores: a trait, concrete impls, and an enum that
//! forwards to whichever one the config picked.

use anyhow::Result;
use serde::Deserialize;
use tracing::info;

use crate::common::{ProcessedRecord, RawRecord};

pub(crate) mod capitalized;
pub(crate) mod keywords;

pub use capitalized::CapitalizedExtractor;
pub use keywords::KeywordExtractor;

/// 🔬 The transform capability.
///
/// `&mut self` because real extractors tend to carry scratch buffers, caches,
/// or a model that insists on being mutable. We don't ask.
pub trait Extractor: std::fmt::Debug + Send {
    fn extract(&mut self, record: RawRecord) -> Result<ProcessedRecord>;
}

/// 🔧 Which extractor to build, and how.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractorConfig {
    /// 🎩 Runs of capitalized words, lower-cased. The default.
    Capitalized,
    /// 🔤 Every word that isn't a stopword or a number.
    Keywords {
        #[serde(default = "default_min_keyword_len")]
        min_len: usize,
    },
    /// 💥 Fails on any record whose content contains `trigger`. For exercising crash paths.
    #[cfg(test)]
    Exploding { trigger: String },
}

fn default_min_keyword_len() -> usize {
    3
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig::Capitalized
    }
}

impl ExtractorConfig {
    /// 🏗️ Build the extractor. Call once per worker, at worker start, never per record.
    pub fn build(&self) -> Result<ExtractorBackend> {
        let backend = match self {
            ExtractorConfig::Capitalized => ExtractorBackend::Capitalized(CapitalizedExtractor::new()),
            ExtractorConfig::Keywords { min_len } => {
                ExtractorBackend::Keywords(KeywordExtractor::new(*min_len))
            }
            #[cfg(test)]
            ExtractorConfig::Exploding { trigger } => ExtractorBackend::Exploding(trigger.clone()),
        };
        info!("🔬 extractor ready: {}", backend.label());
        Ok(backend)
    }
}

/// 🎭 The many faces of an extractor.
#[derive(Debug)]
pub enum ExtractorBackend {
    Capitalized(CapitalizedExtractor),
    Keywords(KeywordExtractor),
    #[cfg(test)]
    Exploding(String),
}

impl ExtractorBackend {
    pub fn label(&self) -> &'static str {
        match self {
            ExtractorBackend::Capitalized(_) => "capitalized",
            ExtractorBackend::Keywords(_) => "keywords",
            #[cfg(test)]
            ExtractorBackend::Exploding(_) => "exploding",
        }
    }
}

impl Extractor for ExtractorBackend {
    fn extract(&mut self, record: RawRecord) -> Result<ProcessedRecord> {
        match self {
            ExtractorBackend::Capitalized(e) => e.extract(record),
            ExtractorBackend::Keywords(e) => e.extract(record),
            #[cfg(test)]
            ExtractorBackend::Exploding(trigger) => {
                if record.content.contains(trigger.as_str()) {
                    anyhow::bail!("💥 extractor detonated on '{}'", record.content);
                }
                CapitalizedExtractor::new().extract(record)
            }
        }
    }
}

/// 🧹 Tokens that never count as entities: numbers, money,
/// ordinals, dates, times. If it smells like a quantity, it's not a name.
pub(crate) fn is_quantity_like(token: &str) -> bool {
    const MONTHS: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    const DAYS: [&str; 7] = [
        "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
    ];

    let lowered = token.to_lowercase();
    if lowered.chars().any(|c| c.is_ascii_digit()) {
        // -- $1000, 3rd, 10:30, 2024-01-01, 42. all quantities, none of them people
        return true;
    }
    if lowered.starts_with(['$', '€', '£', '¥']) {
        return true;
    }
    MONTHS.contains(&lowered.as_str()) || DAYS.contains(&lowered.as_str())
}

/// 🚫 Words too common to be anybody's name.
pub(crate) const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "her", "his", "i", "if", "in", "into", "is", "it", "its", "my", "no", "not", "of", "on",
    "or", "our", "she", "so", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "to", "was", "we", "were", "what", "when", "where", "which", "who", "why", "will",
    "with", "you", "your",
];

pub(crate) fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token.to_lowercase().as_str())
}

/// ✂️ Split on whitespace and peel punctuation off both ends of each token.
/// Returns `(token, at_boundary)` pairs, where `at_boundary` means the token was
/// followed by clause punctuation and whatever phrase it belongs to ends there.
pub(crate) fn tokenize(content: &str) -> impl Iterator<Item = (&str, bool)> {
    content.split_whitespace().filter_map(|raw| {
        let at_boundary = raw.ends_with(['.', '!', '?', ',', ';', ':', ')']);
        let token = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '$' && c != '&');
        let token = token.trim_end_matches(['\'', '’']);
        if token.is_empty() {
            None
        } else {
            Some((token, at_boundary))
        }
    })
}
