//! Durable storage engine traits.
//!
//! A [`DurableEngine`] is one durable key-value database (the `IndexedDB`
//! analogue). It hands out [`Namespace`]s, one per worker-backed store, each
//! an independent key -> snapshot map. Engines are shared by every worker of
//! a pool; namespaces are owned by exactly one worker's handler.
//!
//! Wrapped in `Arc<dyn DurableEngine>` for sharing across worker threads.

use async_trait::async_trait;
use statekeep_core::Value;

use crate::error::StorageError;

/// Version reported for every namespace.
pub const NAMESPACE_VERSION: u32 = 1;

/// A durable key-value database.
#[async_trait]
pub trait DurableEngine: Send + Sync + 'static {
    /// Driver name reported in namespace descriptors.
    fn driver(&self) -> &'static str;

    /// Name of the database the namespaces live in.
    fn database_name(&self) -> &str;

    /// Opens (creating if needed) the namespace called `name`.
    async fn open_namespace(&self, name: &str) -> Result<Box<dyn Namespace>, StorageError>;
}

/// One named key-value namespace inside a [`DurableEngine`].
#[async_trait]
pub trait Namespace: Send + Sync {
    /// Reads `key`, returning `None` when nothing was ever stored under it.
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Overwrites `key`.
    async fn set(&self, key: &str, value: &Value) -> Result<(), StorageError>;

    /// Removes every key of the namespace.
    async fn clear(&self) -> Result<(), StorageError>;
}
