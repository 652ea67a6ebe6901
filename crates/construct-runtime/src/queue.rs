//! A bounded, lock-free queue with backpressure signaling, async-aware pop.
//!
//! When the queue is full, producers get their item back instead of
//! blocking, so a room under a write storm degrades to `M_LIMIT_EXCEEDED`
//! responses rather than unbounded memory growth.

use crossbeam_queue::ArrayQueue;
use tokio::sync::Notify;

#[derive(Debug)]
pub enum PushResult<T> {
    Ok,
    Backpressure(T),
}

pub struct BoundedQueue<T> {
    inner: ArrayQueue<T>,
    notify: Notify,
}

impl<T> BoundedQueue<T> {
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            inner: ArrayQueue::new(capacity),
            notify: Notify::new(),
        }
    }

    pub fn try_push(&self, item: T) -> PushResult<T> {
        match self.inner.push(item) {
            Ok(()) => {
                self.notify.notify_one();
                PushResult::Ok
            }
            Err(item) => PushResult::Backpressure(item),
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Waits for an item if the queue is currently empty. The `notified()`
    /// future is created before the emptiness check so a push racing with
    /// this call is never missed (the pattern `Notify`'s own docs
    /// recommend).
    pub async fn pop(&self) -> T {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.inner.pop() {
                return item;
            }
            notified.await;
        }
    }

    pub fn pop_batch(&self, max: usize) -> Vec<T> {
        let mut batch = Vec::with_capacity(max.min(self.inner.len()));
        for _ in 0..max {
            match self.inner.pop() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn full_queue_returns_backpressure() {
        let q = BoundedQueue::new(2);
        assert!(matches!(q.try_push(1), PushResult::Ok));
        assert!(matches!(q.try_push(2), PushResult::Ok));
        assert!(matches!(q.try_push(3), PushResult::Backpressure(3)));
    }

    #[tokio::test]
    async fn pop_wakes_on_push_from_another_task() {
        let q = Arc::new(BoundedQueue::new(4));
        let reader = {
            let q = q.clone();
            tokio::spawn(async move { q.pop().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        q.try_push(99);
        let got = tokio::time::timeout(std::time::Duration::from_millis(200), reader)
            .await
            .expect("pop completed")
            .unwrap();
        assert_eq!(got, 99);
    }

    #[test]
    fn pop_batch_respects_max_and_availability() {
        let q = BoundedQueue::new(8);
        for i in 0..5 {
            q.try_push(i);
        }
        let batch = q.pop_batch(3);
        assert_eq!(batch, vec![0, 1, 2]);
        assert_eq!(q.len(), 2);
    }
}
