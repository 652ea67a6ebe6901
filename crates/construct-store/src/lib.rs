//! The column event store: an append-only log plus the secondary indexes
//! the kernel and federation layers query against (§4.6).

pub mod columns;
pub mod error;
pub mod record;
pub mod store;

pub use columns::Columns;
pub use error::StoreError;
pub use store::{room, EventStore, WriteOpts};
