//! Channel play queue
//!
//! Command handlers enqueue, the playback loop dequeues. Normal appends are FIFO;
//! `put_at_front` is LIFO among front inserts so the newest direct request plays next.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

use cadence_common::QueueItem;

use crate::error::{Error, Result};

pub struct PlayQueue {
    items: Mutex<VecDeque<QueueItem>>,
    available: Notify,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueItem>> {
        match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Append to the back
    pub fn put(&self, item: QueueItem) {
        self.lock().push_back(item);
        self.available.notify_one();
    }

    /// Insert ahead of everything currently queued
    pub fn put_at_front(&self, item: QueueItem) {
        self.lock().push_front(item);
        self.available.notify_one();
    }

    /// Dequeue without waiting
    pub fn get_nowait(&self) -> Result<QueueItem> {
        self.lock().pop_front().ok_or(Error::QueueEmpty)
    }

    /// Dequeue, suspending until an item is available
    pub async fn get(&self) -> QueueItem {
        loop {
            let notified = self.available.notified();
            let next = self.lock().pop_front();
            if let Some(item) = next {
                return item;
            }
            notified.await;
        }
    }

    /// Ordered view of the first `n` items without removing them
    pub fn peek_many(&self, n: usize) -> Vec<QueueItem> {
        self.lock().iter().take(n).cloned().collect()
    }

    /// Apply `f` to the first queued item with `content_id`
    ///
    /// Returns false when the item has left the queue.
    pub fn update<F>(&self, content_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut QueueItem),
    {
        let mut items = self.lock();
        match items.iter_mut().find(|item| item.content_id == content_id) {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        }
    }

    /// Drop everything queued, returning how many items were removed
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let removed = items.len();
        items.clear();
        removed
    }

    pub fn content_ids(&self) -> Vec<String> {
        self.lock().iter().map(|item| item.content_id.clone()).collect()
    }
}

impl Default for PlayQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_common::{DiscoverySource, ParticipantId};
    use std::sync::Arc;
    use std::time::Duration;

    fn item(id: &str) -> QueueItem {
        QueueItem::new(id, format!("Title {id}"), "Artist", DiscoverySource::Similar)
    }

    fn ids(queue: &PlayQueue) -> Vec<String> {
        queue.content_ids()
    }

    #[test]
    fn test_fifo_for_normal_appends() {
        let queue = PlayQueue::new();
        queue.put(item("a"));
        queue.put(item("b"));
        queue.put(item("c"));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.get_nowait().unwrap().content_id, "a");
        assert_eq!(queue.get_nowait().unwrap().content_id, "b");
        assert_eq!(queue.get_nowait().unwrap().content_id, "c");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_put_at_front_is_lifo_among_front_inserts() {
        let queue = PlayQueue::new();
        queue.put(item("auto1"));
        queue.put(item("auto2"));
        queue.put_at_front(QueueItem::requested("req1", "R1", "X", ParticipantId(1)));
        queue.put_at_front(QueueItem::requested("req2", "R2", "X", ParticipantId(2)));

        assert_eq!(ids(&queue), vec!["req2", "req1", "auto1", "auto2"]);
    }

    #[test]
    fn test_get_nowait_on_empty_queue() {
        let queue = PlayQueue::new();
        assert!(matches!(queue.get_nowait(), Err(Error::QueueEmpty)));
    }

    #[test]
    fn test_interleaved_put_and_get_never_lose_or_duplicate() {
        let queue = PlayQueue::new();
        let mut seen = Vec::new();
        for i in 0..50 {
            queue.put(item(&format!("n{i}")));
            if i % 3 == 0 {
                queue.put_at_front(item(&format!("f{i}")));
            }
            if i % 2 == 0 {
                seen.push(queue.get_nowait().unwrap().content_id);
            }
        }
        while let Ok(next) = queue.get_nowait() {
            seen.push(next.content_id);
        }

        let mut sorted = seen.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), seen.len(), "no duplicates");
        assert_eq!(seen.len(), 50 + 17, "no losses");
    }

    #[test]
    fn test_peek_many_does_not_remove() {
        let queue = PlayQueue::new();
        queue.put(item("a"));
        queue.put(item("b"));
        queue.put(item("c"));

        let view: Vec<String> = queue.peek_many(2).into_iter().map(|i| i.content_id).collect();
        assert_eq!(view, vec!["a", "b"]);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.peek_many(10).len(), 3);
    }

    #[test]
    fn test_update_and_clear() {
        let queue = PlayQueue::new();
        queue.put(item("a"));
        assert!(queue.update("a", |i| i.duration_seconds = Some(200)));
        assert!(!queue.update("missing", |_| {}));
        assert_eq!(queue.peek_many(1)[0].duration_seconds, Some(200));

        queue.put(item("b"));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_wakes_on_put() {
        let queue = Arc::new(PlayQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.put_at_front(item("late"));

        let got = tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("get() should wake promptly")
            .unwrap();
        assert_eq!(got.content_id, "late");
    }

    #[tokio::test]
    async fn test_get_returns_immediately_when_non_empty() {
        let queue = PlayQueue::new();
        queue.put(item("ready"));
        let got = tokio::time::timeout(Duration::from_millis(100), queue.get())
            .await
            .unwrap();
        assert_eq!(got.content_id, "ready");
    }
}
