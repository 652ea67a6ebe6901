//! Effects produced by a successful evaluation (§4.7 phases WRITE/FANOUT).
//!
//! The VM itself never touches the store or the network: [`crate::vm`]
//! produces this list, and [`crate::vm::EventVm`] (or, for federation
//! fanout, `construct-federation`) is what actually executes it.

use construct_event::Event;
use construct_state::StateKey;
use construct_types::{EventId, Host, RoomId};

#[derive(Debug, Clone)]
pub enum Effect {
    /// Append the (now hashed, signed, authorized) event to the store.
    Persist(Event),
    /// Update the room's state tree: `key -> event_id`.
    UpdateState {
        room_id: RoomId,
        key: StateKey,
        event_id: EventId,
    },
    /// Record this event as permanently rejected, so a repeated push of
    /// the same bytes short-circuits instead of re-running the pipeline.
    MarkBad { event_id: EventId },
    /// Push the event to every other server known to participate in the
    /// room, except `origin` (the server that sent it here, if any).
    Fanout {
        room_id: RoomId,
        event_id: EventId,
        except: Option<Host>,
    },
}
