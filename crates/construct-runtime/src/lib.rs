//! Cooperative scheduling: per-room evaluation workers, bounded inboxes,
//! and deadline timers (§5, §7).

pub mod buffer;
pub mod queue;
pub mod reactor;
pub mod router;
pub mod timers;

pub use buffer::BytesMutPool;
pub use queue::{BoundedQueue, PushResult};
pub use reactor::Reactor;
pub use router::RoomRouter;
pub use timers::Backoff;
