//! Wires `construct-kernel`, `construct-store`, and `construct-federation`
//! into a running homeserver: room auth-state assembly, signing-key
//! persistence, and the operations a resource handler or CLI command calls.

pub mod auth_state;
pub mod backfill;
pub mod error;
pub mod homeserver;
pub mod keys;
pub mod resource;

pub use backfill::AncestorFetcher;
pub use error::{HomeserverError, Result};
pub use homeserver::Homeserver;
