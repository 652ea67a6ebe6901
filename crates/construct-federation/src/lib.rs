//! The federation client and HTTP resource server (§4.8, §4.9, §6): signed
//! request envelopes, Matrix well-known delegation DNS, the server-key
//! cache, a per-peer link pool, and the router serving federation v1.

pub mod client;
pub mod dns;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod peer;
pub mod server;

pub use client::{FederationClient, RetryPolicy};
pub use dns::{FederationResolver, ResolvedPeer, ResolverSettings};
pub use envelope::{parse_authorization, Envelope, ParsedAuth};
pub use error::{FedError, FedResult};
pub use keys::{ServerKey, ServerKeyClient};
pub use peer::{PeerPool, PeerStats};
pub use server::{router, ResourceHandlers};
