//! Storage layer of the persistence plugin.
//!
//! - [`DurableEngine`] / [`Namespace`]: asynchronous durable key-value
//!   backends, used only from worker threads.
//! - [`DurableStoreAdapter`]: one store's namespace with init/describe
//!   bookkeeping on top of an engine.
//! - [`WebStorage`]: synchronous string storages for the local/session
//!   strategy.

pub mod adapter;
pub mod engine;
pub mod engines;
pub mod web;

pub use adapter::DurableStoreAdapter;
pub use engine::{DurableEngine, Namespace, NAMESPACE_VERSION};
pub use engines::MemoryEngine;
#[cfg(feature = "redb")]
pub use engines::RedbEngine;
pub use web::{MemoryWebStorage, WebStorage};
