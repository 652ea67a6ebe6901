//! The event evaluation VM: conform, dedup, access, hash, sign, verify,
//! auth, write, fanout (§4.7).
//!
//! This crate is pure with respect to I/O: [`vm::evaluate`] takes an event
//! and a snapshot of what it needs to know, and returns either a rejection
//! or the event plus the [`Effect`]s a caller should apply. [`vm::EventVm`]
//! is the one place in this crate that actually touches a
//! `construct_store::EventStore`.

pub mod auth;
pub mod effects;
pub mod error;
pub mod vm;

pub use auth::{check_auth, PowerLevels, RoomAuthState};
pub use effects::Effect;
pub use error::{AuthError, KernelError};
pub use vm::{evaluate, local_submission_opts, EvalInput, EventVm, Origin};
