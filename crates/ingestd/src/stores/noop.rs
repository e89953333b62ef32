//! 🕳️ NoopStore: the store that says yes to everything and remembers nothing.
//!
//! Handy for load tests, where you want the whole pipeline to run hot without
//! a document store soaking up the traffic.

use anyhow::Result;
use async_trait::async_trait;
use tracing::trace;

use super::DocumentStore;
use crate::common::StoreMessage;

#[derive(Debug, Default)]
pub struct NoopStore {
    swallowed: u64,
}

impl NoopStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn swallowed(&self) -> u64 {
        self.swallowed
    }
}

#[async_trait]
impl DocumentStore for NoopStore {
    async fn persist(&mut self, message: &StoreMessage) -> Result<()> {
        trace!(partition = message.partition_key(), "🕳️ noop store swallowed a message");
        self.swallowed += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
