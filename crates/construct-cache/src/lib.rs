//! Caching and wait primitives shared by the kernel and federation client.

pub mod dock;
pub mod keyed;
pub mod sieve;

pub use dock::Dock;
pub use keyed::KeyedCache;
pub use sieve::SieveCache;
