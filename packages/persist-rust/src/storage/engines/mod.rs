//! Concrete [`DurableEngine`](super::engine::DurableEngine) backends.

pub mod memory;
#[cfg(feature = "redb")]
pub mod redb;

pub use memory::MemoryEngine;
#[cfg(feature = "redb")]
pub use self::redb::RedbEngine;
