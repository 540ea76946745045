//! statekeep persistence: a store interceptor that restores and persists
//! state stores through synchronous web storages or a pool of storage
//! worker threads backed by a durable key-value engine.

pub mod config;
pub mod error;
pub mod plugin;
pub mod pool;
pub mod storage;
pub mod store;
pub mod worker;

pub use config::PersistPluginConfig;
pub use error::{PersistError, StorageError};
pub use plugin::{LoadStatus, PersistPlugin, PluginBackends, PluginStatus};
pub use pool::{PoolOptions, WorkerPool};
pub use storage::{DurableEngine, DurableStoreAdapter, MemoryEngine, MemoryWebStorage, WebStorage};
#[cfg(feature = "redb")]
pub use storage::RedbEngine;
pub use store::{
    PersistConfig, RestoreState, StorageKind, Store, StoreHub, StoreInterceptor, WritePolicy,
};
pub use worker::{MessageHandler, WorkerHandle};
