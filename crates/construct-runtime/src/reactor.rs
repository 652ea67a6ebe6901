//! The per-room evaluation reactor: one worker task per shard, each
//! draining its own bounded inbox and running the VM's evaluation handler
//! sequentially, so a room's events are processed in submission order
//! without a per-room lock.

use std::future::Future;
use std::sync::Arc;

use construct_types::RoomId;
use tracing::Instrument;

use crate::queue::{BoundedQueue, PushResult};
use crate::router::RoomRouter;

/// Spawns `worker_count` tasks, each looping `handler` over its own inbox.
///
/// `handler` runs on whichever worker a room hashes to; same room, same
/// worker, every time, for the lifetime of the reactor.
pub struct Reactor<Req> {
    router: RoomRouter,
    inboxes: Vec<Arc<BoundedQueue<Req>>>,
}

impl<Req> Reactor<Req>
where
    Req: Send + 'static,
{
    pub fn spawn<H, Fut>(worker_count: usize, queue_capacity: usize, handler: H) -> Self
    where
        H: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let router = RoomRouter::new(worker_count);
        let handler = Arc::new(handler);
        let inboxes: Vec<_> = (0..worker_count)
            .map(|id| {
                let inbox = Arc::new(BoundedQueue::new(queue_capacity));
                let worker_inbox = inbox.clone();
                let handler = handler.clone();
                tokio::spawn(
                    async move {
                        loop {
                            let req = worker_inbox.pop().await;
                            handler(req).await;
                        }
                    }
                    .instrument(tracing::info_span!("reactor_worker", worker = id)),
                );
                inbox
            })
            .collect();
        Self { router, inboxes }
    }

    /// Routes `req` to `room_id`'s worker. Returns the request back on
    /// backpressure so the caller can reject with `M_LIMIT_EXCEEDED`
    /// instead of blocking.
    pub fn submit(&self, room_id: &RoomId, req: Req) -> Result<(), Req> {
        let worker = self.router.route(room_id);
        match self.inboxes[worker].try_push(req) {
            PushResult::Ok => Ok(()),
            PushResult::Backpressure(req) => Err(req),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.router.worker_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn same_room_processes_in_submission_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler_seen = seen.clone();
        let reactor: Reactor<u32> = Reactor::spawn(4, 32, move |req: u32| {
            let seen = handler_seen.clone();
            async move {
                seen.lock().await.push(req);
            }
        });

        let room = RoomId::new_unchecked("!room:x");
        for i in 0..20 {
            reactor.submit(&room, i).expect("not at capacity");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().await, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn backpressure_returns_the_item() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let reactor: Reactor<u32> = Reactor::spawn(1, 1, move |_req: u32| {
            let c = c.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        let room = RoomId::new_unchecked("!room:x");
        // first item is picked up by the worker immediately, second fills
        // the 1-capacity inbox, third should be rejected.
        reactor.submit(&room, 1).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        reactor.submit(&room, 2).unwrap();
        assert!(reactor.submit(&room, 3).is_err());
    }
}
