//! Deterministic room-to-worker routing.
//!
//! A room's events are always routed to the same worker, which is what
//! lets each worker process its inbox strictly in arrival order with no
//! cross-room locking: two rooms never contend, and one room's events
//! never reorder relative to each other.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use construct_types::RoomId;

pub struct RoomRouter {
    worker_count: usize,
}

impl RoomRouter {
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be positive");
        Self { worker_count }
    }

    pub fn route(&self, room_id: &RoomId) -> usize {
        let mut hasher = DefaultHasher::new();
        room_id.hash(&mut hasher);
        (hasher.finish() as usize) % self.worker_count
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_is_deterministic() {
        let router = RoomRouter::new(8);
        let room = RoomId::new_unchecked("!room:example.org");
        let a = router.route(&room);
        let b = router.route(&room);
        assert_eq!(a, b);
        assert!(a < router.worker_count());
    }

    #[test]
    #[should_panic(expected = "worker_count must be positive")]
    fn zero_workers_panics() {
        RoomRouter::new(0);
    }
}
