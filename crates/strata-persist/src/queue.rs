//! Bounded multi-producer, single-consumer change queue.
//!
//! The simulation loop calls [`ChangeQueue::enqueue`] from any thread
//! without blocking; the region's worker task is the only consumer. When
//! the queue is full the oldest entry is dropped: only the latest state of
//! an entity needs to reach the store, so losing an intermediate state is
//! acceptable, while unbounded growth behind a slow store is not.
//!
//! Terminal entries (kills, terrain snapshots) are never followed by a
//! later state that would repair their loss, so eviction skips them and
//! takes the oldest non-terminal entry instead. Only a queue holding
//! nothing but terminal entries drops one, and that is counted apart.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use strata_types::{ChangeKind, PartChange, TerrainChange};
use tokio::sync::{Notify, watch};

/// An entry of a [`ChangeQueue`].
pub trait QueueEntry {
    /// Whether dropping this entry would lose state no later entry carries.
    fn is_terminal(&self) -> bool {
        false
    }
}

impl QueueEntry for PartChange {
    fn is_terminal(&self) -> bool {
        self.kind == ChangeKind::Killed
    }
}

impl QueueEntry for TerrainChange {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Snapshot)
    }
}

/// Read-only view of a queue used by the statistics registry.
pub trait QueueProbe: Send + Sync {
    /// Entries currently waiting.
    fn depth(&self) -> usize;

    /// Entries dropped because the queue was full.
    fn dropped(&self) -> u64;

    /// Terminal entries among [`QueueProbe::dropped`].
    fn dropped_terminal(&self) -> u64;
}

/// A bounded FIFO with drop-oldest overflow.
#[derive(Debug)]
pub struct ChangeQueue<T> {
    entries: Mutex<VecDeque<T>>,
    available: Notify,
    capacity: usize,
    dropped: AtomicU64,
    dropped_terminal: AtomicU64,
}

impl<T> ChangeQueue<T> {
    /// Create a queue holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            dropped_terminal: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the oldest entry if one is waiting.
    pub fn try_dequeue(&self) -> Option<T> {
        self.entries().pop_front()
    }

    /// Take the oldest entry, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` if nothing arrived in time.
    pub async fn dequeue(&self, timeout: Duration) -> Option<T> {
        let wait = async {
            loop {
                if let Some(entry) = self.try_dequeue() {
                    return entry;
                }
                self.available.notified().await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }

    /// Entries currently waiting.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no entries are waiting.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Maximum number of waiting entries.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Terminal entries dropped because the queue held nothing else.
    pub fn dropped_terminal(&self) -> u64 {
        self.dropped_terminal.load(Ordering::Relaxed)
    }
}

impl<T: QueueEntry> ChangeQueue<T> {
    /// Append an entry without blocking.
    ///
    /// Returns the entry evicted to make room, if the queue was full.
    pub fn enqueue(&self, entry: T) -> Option<T> {
        let evicted = {
            let mut entries = self.entries();
            let evicted = if entries.len() >= self.capacity {
                let oldest_live = entries.iter().position(|e| !e.is_terminal());
                match oldest_live {
                    Some(index) => entries.remove(index),
                    None => entries.pop_front(),
                }
            } else {
                None
            };
            entries.push_back(entry);
            evicted
        };
        if let Some(evicted) = &evicted {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed).saturating_add(1);
            if evicted.is_terminal() {
                let terminal = self
                    .dropped_terminal
                    .fetch_add(1, Ordering::Relaxed)
                    .saturating_add(1);
                tracing::error!(
                    capacity = self.capacity,
                    dropped,
                    dropped_terminal = terminal,
                    "Change queue full of terminal entries, dropped the oldest"
                );
            } else {
                tracing::warn!(
                    capacity = self.capacity,
                    dropped,
                    "Change queue full, dropped oldest entry"
                );
            }
        }
        self.available.notify_one();
        evicted
    }
}

impl<T: Send> QueueProbe for ChangeQueue<T> {
    fn depth(&self) -> usize {
        self.len()
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn dropped_terminal(&self) -> u64 {
        self.dropped_terminal.load(Ordering::Relaxed)
    }
}

/// Outcome of one wait for work by a worker loop.
#[derive(Debug)]
pub(crate) enum Wake<T> {
    /// A change arrived.
    Change(T),
    /// The poll interval passed without a change.
    Idle,
    /// Stop was requested, or every stop sender is gone.
    Stop,
}

/// Wait for the next change on `queue` or a stop request, whichever comes
/// first.
pub(crate) async fn next_change<T>(
    queue: &ChangeQueue<T>,
    poll_interval: Duration,
    stop: &mut watch::Receiver<bool>,
) -> Wake<T> {
    if *stop.borrow() {
        return Wake::Stop;
    }
    let stop_closed = tokio::select! {
        change = queue.dequeue(poll_interval) => {
            return change.map_or(Wake::Idle, Wake::Change);
        }
        changed = stop.changed() => changed.is_err(),
    };
    if stop_closed || *stop.borrow() {
        Wake::Stop
    } else {
        Wake::Idle
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    impl QueueEntry for i32 {}
    impl QueueEntry for u8 {}
    impl QueueEntry for u32 {}
    impl QueueEntry for char {
        fn is_terminal(&self) -> bool {
            self.is_ascii_uppercase()
        }
    }

    #[test]
    fn entries_come_out_in_arrival_order() {
        let queue = ChangeQueue::new(8);
        for i in 0..5 {
            assert!(queue.enqueue(i).is_none());
        }
        let drained: Vec<i32> = std::iter::from_fn(|| queue.try_dequeue()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_drops_the_oldest_entry() {
        let queue = ChangeQueue::new(3);
        queue.enqueue('a');
        queue.enqueue('b');
        queue.enqueue('c');
        assert_eq!(queue.enqueue('d'), Some('a'));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_dequeue(), Some('b'));
    }

    #[test]
    fn overflow_skips_terminal_entries() {
        let queue = ChangeQueue::new(3);
        queue.enqueue('K');
        queue.enqueue('a');
        queue.enqueue('b');
        assert_eq!(queue.enqueue('c'), Some('a'));
        assert_eq!(queue.enqueue('d'), Some('b'));
        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.dropped_terminal(), 0);
        let drained: Vec<char> = std::iter::from_fn(|| queue.try_dequeue()).collect();
        assert_eq!(drained, vec!['K', 'c', 'd']);
    }

    #[test]
    fn queue_of_only_terminal_entries_drops_the_oldest() {
        let queue = ChangeQueue::new(2);
        queue.enqueue('A');
        queue.enqueue('B');
        assert_eq!(queue.enqueue('C'), Some('A'));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.dropped_terminal(), 1);
    }

    #[test]
    fn terrain_snapshots_are_terminal() {
        assert!(TerrainChange::Snapshot.is_terminal());
    }

    #[test]
    fn zero_capacity_still_holds_one_entry() {
        let queue = ChangeQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.enqueue(1);
        assert_eq!(queue.enqueue(2), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_times_out_when_empty() {
        let queue: ChangeQueue<u8> = ChangeQueue::new(4);
        assert_eq!(queue.dequeue(Duration::from_secs(1)).await, None);
    }

    #[tokio::test]
    async fn dequeue_wakes_on_enqueue_from_another_task() {
        let queue = Arc::new(ChangeQueue::new(4));
        let producer = Arc::clone(&queue);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.enqueue(42_u32);
        });

        let received = queue.dequeue(Duration::from_secs(5)).await;
        assert_eq!(received, Some(42));
        assert!(handle.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn next_change_reports_stop() {
        let queue: ChangeQueue<u8> = ChangeQueue::new(4);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        assert!(matches!(
            next_change(&queue, Duration::from_millis(10), &mut stop_rx).await,
            Wake::Idle
        ));

        queue.enqueue(3);
        assert!(matches!(
            next_change(&queue, Duration::from_millis(10), &mut stop_rx).await,
            Wake::Change(3)
        ));

        assert!(stop_tx.send(true).is_ok());
        assert!(matches!(
            next_change(&queue, Duration::from_secs(60), &mut stop_rx).await,
            Wake::Stop
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_stop_sender_stops_the_worker() {
        let queue: ChangeQueue<u8> = ChangeQueue::new(4);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        drop(stop_tx);
        assert!(matches!(
            next_change(&queue, Duration::from_secs(60), &mut stop_rx).await,
            Wake::Stop
        ));
    }
}
