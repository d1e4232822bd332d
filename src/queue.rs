//! # Snapshot Queue
//!
//! Bounded multi-producer, multi-consumer hand-off between iteration
//! collectors and downstream consumers.
//!
//! Enqueue never blocks and never fails: when the queue is full the oldest
//! queued snapshot is evicted to make room, trading completeness for
//! freshness under load. Consumers can poll with [`SnapshotQueue::try_dequeue`]
//! or wait with [`SnapshotQueue::dequeue`], which suspends until an item
//! arrives, the caller cancels, or the queue is closed and drained.

use crate::error::{QueueError, WindowError};
use crate::snapshot::WindowedIterationSnapshot;
use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Counters describing queue activity since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
    pub len: usize,
    pub capacity: usize,
}

/// Bounded drop-oldest queue of window snapshots
pub struct SnapshotQueue<T = WindowedIterationSnapshot> {
    items: ArrayQueue<T>,
    available: Notify,
    closed: AtomicBool,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped: AtomicU64,
}

impl<T> SnapshotQueue<T> {
    /// Create an empty queue holding at most `capacity` items
    ///
    /// ## Returns
    ///
    /// `WindowError::InvalidConfig` when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, WindowError> {
        if capacity == 0 {
            return Err(WindowError::InvalidConfig(
                "snapshot queue capacity must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            items: ArrayQueue::new(capacity),
            available: Notify::new(),
            closed: AtomicBool::new(false),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Maximum number of queued items
    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    /// Items currently queued
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is waiting to be dequeued
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Add an item, evicting and returning the oldest one if the queue is full
    pub fn enqueue(&self, item: T) -> Option<T> {
        let displaced = self.items.force_push(item);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        if displaced.is_some() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(
                "Snapshot queue full ({}), dropped oldest item ({} dropped so far)",
                self.items.capacity(),
                dropped
            );
        }
        self.available.notify_one();
        displaced
    }

    /// Take the oldest item without waiting
    pub fn try_dequeue(&self) -> Option<T> {
        let item = self.items.pop();
        if item.is_some() {
            self.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Wait for the next item
    ///
    /// Returns [`QueueError::Cancelled`] if `cancel` fires first and
    /// [`QueueError::Closed`] once the queue has been closed and emptied.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<T, QueueError> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register interest before checking, so an enqueue or close that
            // lands in between still wakes us.
            notified.as_mut().enable();

            if let Some(item) = self.try_dequeue() {
                return Ok(item);
            }
            if self.is_closed() {
                return Err(QueueError::Closed);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            }
        }
    }

    /// Wait up to `timeout` for the next item; `Ok(None)` on timeout
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Result<Option<T>, QueueError> {
        let never = CancellationToken::new();
        match tokio::time::timeout(timeout, self.dequeue(&never)).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Take everything currently queued without waiting
    pub fn drain(&self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.items.len());
        while let Some(item) = self.try_dequeue() {
            items.push(item);
        }
        items
    }

    /// Mark the queue closed and wake every waiting consumer
    ///
    /// Items already queued (or enqueued later) can still be taken; waiting
    /// consumers return [`QueueError::Closed`] once nothing is left.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.available.notify_waiters();
    }

    /// True once [`SnapshotQueue::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Activity counters plus current length and capacity
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            len: self.items.len(),
            capacity: self.items.capacity(),
        }
    }
}

impl<T> std::fmt::Debug for SnapshotQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotQueue")
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::test_support::empty_snapshot;
    use crate::snapshot::IterationId;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(matches!(
            SnapshotQueue::<u32>::new(0),
            Err(WindowError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_fifo_order() {
        let queue = SnapshotQueue::new(4).unwrap();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);
        assert_eq!(queue.drain(), vec![1, 2, 3]);
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let capacity = 3;
        let queue = SnapshotQueue::new(capacity).unwrap();
        for i in 0..capacity {
            assert!(queue.enqueue(i).is_none());
        }

        let displaced = queue.enqueue(capacity);
        assert_eq!(displaced, Some(0));
        assert_eq!(queue.len(), capacity);
        assert_eq!(queue.drain(), vec![1, 2, 3]);

        let stats = queue.stats();
        assert_eq!(stats.enqueued, 4);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.dequeued, 3);
    }

    #[test]
    fn test_snapshots_keep_newest_under_overflow() {
        let id = IterationId::new();
        let queue = SnapshotQueue::new(2).unwrap();
        for seq in 1..=5 {
            queue.enqueue(empty_snapshot(id, seq));
        }

        let sequences: Vec<u64> = queue.drain().iter().map(|s| s.window_sequence).collect();
        assert_eq!(sequences, vec![4, 5]);
    }

    #[test]
    fn test_concurrent_producers_never_block() {
        let queue = Arc::new(SnapshotQueue::new(16).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..1_000u64 {
                        queue.enqueue(p * 1_000 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = queue.stats();
        assert_eq!(stats.enqueued, 4_000);
        assert_eq!(stats.len, 16);
        assert_eq!(stats.dropped, 4_000 - 16);
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_item() {
        let queue = Arc::new(SnapshotQueue::new(8).unwrap());
        let cancel = CancellationToken::new();

        let producer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.enqueue(42u32);
        });

        assert_eq!(queue.dequeue(&cancel).await, Ok(42));
    }

    #[tokio::test]
    async fn test_dequeue_cancellation() {
        let queue = SnapshotQueue::<u32>::new(8).unwrap();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        assert_eq!(queue.dequeue(&cancel).await, Err(QueueError::Cancelled));
        // Cancelling a wait leaves the queue usable.
        queue.enqueue(7);
        assert_eq!(queue.try_dequeue(), Some(7));
    }

    #[tokio::test]
    async fn test_close_drains_then_reports_closed() {
        let queue = Arc::new(SnapshotQueue::new(8).unwrap());
        let cancel = CancellationToken::new();
        queue.enqueue(1u32);
        queue.close();

        assert_eq!(queue.dequeue(&cancel).await, Ok(1));
        assert_eq!(queue.dequeue(&cancel).await, Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let queue = Arc::new(SnapshotQueue::<u32>::new(8).unwrap());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue(&CancellationToken::new()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert_eq!(consumer.await.unwrap(), Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_dequeue_timeout() {
        let queue = SnapshotQueue::<u32>::new(8).unwrap();
        assert_eq!(
            queue.dequeue_timeout(Duration::from_millis(10)).await,
            Ok(None)
        );
        queue.enqueue(5);
        assert_eq!(
            queue.dequeue_timeout(Duration::from_millis(10)).await,
            Ok(Some(5))
        );
    }
}
