//! 🚰 DrainableQueue: a FIFO that knows how to end.
//!
//! 🎬 *[a queue sits in the dark, full of records. someone flips a switch.]*
//! *["no more writes," says the switch. the queue nods. it keeps serving what it has.]*
//! *[when the last record leaves, every consumer is told to go home. even the sleeping ones.]*
//!
//! Every clone of a [`DrainableQueue`] shares the same transport and the same
//! write-disabled flag, so producers (the proxy), consumers (workers) and the
//! supervisor all see one queue.
//!
//! Drained means: writes disabled AND nothing left. A consumer that asks a drained
//! queue for work gets [`Delivery::Stop`] straight away. A consumer that was already
//! parked inside [`DrainableQueue::get`] can't see the flag flip, so shutdown also calls
//! [`DrainableQueue::wake_one`] once per consumer. That injects a wake-up straight
//! into the transport, skipping the write check, and it pops out as `Stop`.
//!
//! Consumers hold a [`ConsumerGuard`]. When the last guard of a queue drops, the
//! transport closes: nobody is left to make room, so a `put` or `wake_one` parked on a
//! full bounded queue gives up instead of waiting forever.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_channel::{Receiver, Sender};
use tracing::{debug, trace, warn};

/// 📬 What a consumer gets back from [`DrainableQueue::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    Item(T),
    /// 🛑 The queue is drained (or you were woken for shutdown). Stop looping.
    Stop,
}

/// 📦 What actually travels through the channel. Wake-ups ride the same transport
/// as items so they queue up behind any remaining backlog.
#[derive(Debug)]
enum Envelope<T> {
    Item(T),
    Wake,
}

/// 🚰 The queue. Cheap to clone, every clone is the same queue.
#[derive(Debug)]
pub struct DrainableQueue<T> {
    name: Arc<str>,
    tx: Sender<Envelope<T>>,
    rx: Receiver<Envelope<T>>,
    writes_disabled: Arc<AtomicBool>,
    consumers: Arc<AtomicUsize>,
}

impl<T> Clone for DrainableQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            writes_disabled: Arc::clone(&self.writes_disabled),
            consumers: Arc::clone(&self.consumers),
        }
    }
}

/// 🎫 Proof that someone is still draining a queue. Dropping the last one closes the transport.
#[derive(Debug)]
pub struct ConsumerGuard<T> {
    name: Arc<str>,
    rx: Receiver<Envelope<T>>,
    consumers: Arc<AtomicUsize>,
}

impl<T> Drop for ConsumerGuard<T> {
    fn drop(&mut self) {
        if self.consumers.fetch_sub(1, Ordering::SeqCst) == 1 && self.rx.close() {
            debug!(queue = %self.name, "🔌 last consumer gone, transport closed");
        }
    }
}

impl<T: Send> DrainableQueue<T> {
    /// 🏗️ An unbounded queue. Puts never wait.
    pub fn unbounded(name: &str) -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self::from_parts(name, tx, rx)
    }

    /// 🏗️ A bounded queue. Puts wait for room, which is how backpressure reaches producers.
    pub fn bounded(name: &str, capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        Self::from_parts(name, tx, rx)
    }

    /// 🏗️ Bounded if a capacity is given, unbounded otherwise.
    pub fn with_capacity(name: &str, capacity: Option<usize>) -> Self {
        match capacity {
            Some(capacity) => Self::bounded(name, capacity),
            None => Self::unbounded(name),
        }
    }

    fn from_parts(name: &str, tx: Sender<Envelope<T>>, rx: Receiver<Envelope<T>>) -> Self {
        Self {
            name: Arc::from(name),
            tx,
            rx,
            writes_disabled: Arc::new(AtomicBool::new(false)),
            consumers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 🎫 Register a consumer. Hold the guard for as long as you keep calling `get`.
    pub fn attach_consumer(&self) -> ConsumerGuard<T> {
        self.consumers.fetch_add(1, Ordering::SeqCst);
        ConsumerGuard {
            name: Arc::clone(&self.name),
            rx: self.rx.clone(),
            consumers: Arc::clone(&self.consumers),
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.load(Ordering::SeqCst)
    }

    /// 📥 Enqueue `item` unless writes are disabled, in which case it is quietly dropped.
    ///
    /// Returns whether the item made it in. A `false` is not an error, it's shutdown.
    pub async fn put(&self, item: T) -> bool {
        if !self.is_writable() {
            trace!(queue = %self.name, "🚫 write dropped, queue no longer accepts writes");
            return false;
        }
        match self.tx.send(Envelope::Item(item)).await {
            Ok(()) => true,
            Err(_) => {
                // -- closed when the last consumer left. nobody would ever read it.
                warn!(queue = %self.name, "💀 no consumer left, item dropped");
                false
            }
        }
    }

    /// 📥📥 `put` each item, in order. Returns how many were accepted.
    pub async fn put_many<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let mut accepted = 0;
        for item in items {
            if self.put(item).await {
                accepted += 1;
            }
        }
        accepted
    }

    /// 📤 Wait for the next item, or `Stop` if the queue is drained.
    ///
    /// The drained check runs on every call. If it passes we block on the transport,
    /// and only an item or an injected wake-up gets us out again.
    pub async fn get(&self) -> Delivery<T> {
        if self.is_drained() {
            return Delivery::Stop;
        }
        match self.rx.recv().await {
            Ok(Envelope::Item(item)) => Delivery::Item(item),
            Ok(Envelope::Wake) => {
                debug!(queue = %self.name, "⏰ consumer woken for shutdown");
                Delivery::Stop
            }
            Err(_) => {
                debug!(queue = %self.name, "🔌 transport closed while waiting, treating as stop");
                Delivery::Stop
            }
        }
    }

    /// 🔒 Stop accepting writes. Idempotent, and there is no undo.
    pub fn disable_writes(&self) {
        if !self.writes_disabled.swap(true, Ordering::SeqCst) {
            debug!(queue = %self.name, "🔒 writes disabled");
        }
    }

    /// ⏰ Inject one wake-up for one consumer, bypassing the write check.
    ///
    /// It queues behind whatever backlog is left, so the consumer that receives it has
    /// already seen everything ahead of it. Call once per consumer. Returns at once when
    /// the transport is closed, and stops waiting for room if it closes meanwhile.
    pub async fn wake_one(&self) {
        if self.tx.send(Envelope::Wake).await.is_err() {
            // -- nobody left to wake. mission accomplished, technically.
            debug!(queue = %self.name, "🔌 wake-up skipped, no consumer left");
        }
    }

    pub fn is_writable(&self) -> bool {
        !self.writes_disabled.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// 🔢 Envelopes sitting in the transport right now (wake-ups included).
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// 🏁 Writes are off and nothing is left.
    pub fn is_drained(&self) -> bool {
        !self.is_writable() && self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn the_one_where_first_in_is_first_out() {
        let queue = DrainableQueue::unbounded("fifo");
        for i in 0..5 {
            assert!(queue.put(i).await);
        }
        for i in 0..5 {
            assert_eq!(queue.get().await, Delivery::Item(i));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_writes_after_the_lights_go_out_vanish() {
        let queue = DrainableQueue::unbounded("drop");
        assert!(queue.put("before").await);
        queue.disable_writes();
        queue.disable_writes();
        assert!(!queue.put("after").await);
        assert_eq!(queue.put_many(["a", "b", "c"]).await, 0);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.get().await, Delivery::Item("before"));
        assert!(queue.is_drained());
        assert_eq!(queue.get().await, Delivery::Stop);
        assert_eq!(queue.get().await, Delivery::Stop);
    }

    #[tokio::test]
    async fn the_one_where_put_many_keeps_its_place_in_line() {
        let queue = DrainableQueue::unbounded("many");
        assert_eq!(queue.put_many(vec![1, 2, 3]).await, 3);
        assert_eq!(queue.get().await, Delivery::Item(1));
        assert_eq!(queue.get().await, Delivery::Item(2));
        assert_eq!(queue.get().await, Delivery::Item(3));
    }

    #[tokio::test]
    async fn the_one_where_a_clone_sees_the_same_flag() {
        let queue: DrainableQueue<u8> = DrainableQueue::unbounded("shared");
        let other = queue.clone();
        other.disable_writes();
        assert!(!queue.is_writable());
        assert_eq!(queue.name(), "shared");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn the_one_where_sleeping_consumers_get_woken_up() {
        let queue: DrainableQueue<u32> = DrainableQueue::unbounded("sleepers");
        let mut consumers = Vec::new();
        for _ in 0..3 {
            let queue = queue.clone();
            consumers.push(tokio::spawn(async move { queue.get().await }));
        }
        // 😴 give them a moment to actually park inside recv()
        tokio::time::sleep(Duration::from_millis(50)).await;

        queue.disable_writes();
        for _ in 0..3 {
            queue.wake_one().await;
        }
        for consumer in consumers {
            let delivery = tokio::time::timeout(Duration::from_secs(2), consumer)
                .await
                .expect("💀 a consumer stayed asleep through shutdown")
                .expect("💀 consumer task panicked");
            assert_eq!(delivery, Delivery::Stop);
        }
    }

    #[tokio::test]
    async fn the_one_where_the_backlog_drains_before_anyone_stops() {
        let queue = DrainableQueue::unbounded("backlog");
        queue.put_many([10, 20]).await;
        queue.disable_writes();
        queue.wake_one().await;

        assert!(!queue.is_drained(), "a pending wake-up still counts as content");
        assert_eq!(queue.get().await, Delivery::Item(10));
        assert_eq!(queue.get().await, Delivery::Item(20));
        assert_eq!(queue.get().await, Delivery::Stop);
        assert!(queue.is_drained());
        assert_eq!(queue.get().await, Delivery::Stop);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn the_one_where_a_full_bounded_queue_pushes_back() {
        let queue = DrainableQueue::bounded("tiny", 1);
        assert!(queue.put(1).await);

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.put(2).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished(), "the second put should be waiting for room");

        assert_eq!(queue.get().await, Delivery::Item(1));
        let accepted = tokio::time::timeout(Duration::from_secs(2), producer)
            .await
            .expect("💀 producer never got its slot")
            .expect("💀 producer panicked");
        assert!(accepted);
        assert_eq!(queue.get().await, Delivery::Item(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn the_one_where_the_last_consumer_leaving_unsticks_a_full_queue() {
        let queue = DrainableQueue::bounded("orphaned", 1);
        let first = queue.attach_consumer();
        let second = queue.attach_consumer();
        assert_eq!(queue.consumer_count(), 2);
        assert!(queue.put(1).await);

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.put(2).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished(), "the put should be waiting for room");

        drop(first);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished(), "one consumer is still around to make room");

        drop(second);
        assert_eq!(queue.consumer_count(), 0);
        let accepted = tokio::time::timeout(Duration::from_secs(2), producer)
            .await
            .expect("💀 the put kept waiting for a consumer that no longer exists")
            .expect("💀 producer panicked");
        assert!(!accepted);

        queue.disable_writes();
        tokio::time::timeout(Duration::from_secs(2), queue.wake_one())
            .await
            .expect("💀 a wake-up waited for room on an abandoned queue");
        assert!(!queue.put(3).await);
    }
}
