//! The persistence plugin.
//!
//! [`PersistPlugin`] is a [`StoreInterceptor`]: registered on a
//! [`StoreHub`](crate::store::StoreHub), it looks at each new store's
//! [`PersistConfig`] and attaches one of two strategies:
//!
//! - `localStorage` / `sessionStorage`: synchronous restore from a
//!   [`WebStorage`], then a JSON write on every mutation.
//! - `indexedDB`: a worker from the pool runs INIT -> QUERY -> merge ->
//!   subscribe in the background, then WRITE on every mutation.
//!
//! Stores without a persist config are left alone.

pub mod status;
mod sync;
mod worker_backed;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::PersistPluginConfig;
use crate::error::{PersistError, StorageError};
use crate::pool::WorkerPool;
use crate::storage::{DurableEngine, MemoryEngine, MemoryWebStorage, WebStorage};
use crate::store::{StorageKind, Store, StoreInterceptor};

pub use status::{LoadStatus, PluginStatus};

/// File name of the durable database inside `data_dir`.
pub const DATABASE_FILE: &str = "statekeep.redb";

/// Storage backends a plugin persists into.
#[derive(Clone)]
pub struct PluginBackends {
    /// Durable engine shared by every worker.
    pub engine: Arc<dyn DurableEngine>,
    /// Synchronous storage for `localStorage` stores.
    pub local: Arc<dyn WebStorage>,
    /// Synchronous storage for `sessionStorage` stores.
    pub session: Arc<dyn WebStorage>,
}

impl PluginBackends {
    /// Backends described by `config`: a redb file under `data_dir`, or
    /// memory when no directory is set.
    ///
    /// # Errors
    ///
    /// [`PersistError::Storage`] if the database file cannot be opened,
    /// [`PersistError::InvalidConfig`] if `data_dir` is set but the `redb`
    /// feature is disabled.
    pub fn from_config(config: &PersistPluginConfig) -> Result<Self, PersistError> {
        let engine: Arc<dyn DurableEngine> = match &config.data_dir {
            None => Arc::new(MemoryEngine::new()),
            #[cfg(feature = "redb")]
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(StorageError::backend)?;
                Arc::new(crate::storage::RedbEngine::open(dir.join(DATABASE_FILE))?)
            }
            #[cfg(not(feature = "redb"))]
            Some(dir) => {
                return Err(PersistError::InvalidConfig(format!(
                    "data_dir `{}` needs the redb feature",
                    dir.display()
                )))
            }
        };
        Ok(Self {
            engine,
            ..Self::default()
        })
    }
}

impl Default for PluginBackends {
    fn default() -> Self {
        Self {
            engine: Arc::new(MemoryEngine::new()),
            local: Arc::new(MemoryWebStorage::new()),
            session: Arc::new(MemoryWebStorage::new()),
        }
    }
}

pub(crate) struct PluginInner {
    pub(crate) pool: WorkerPool,
    pub(crate) status: Mutex<PluginStatus>,
    /// Raised at shutdown to make coalescing writers send what they hold.
    pub(crate) flush: watch::Sender<bool>,
    pub(crate) writers: Mutex<Vec<JoinHandle<()>>>,
    local: Arc<dyn WebStorage>,
    session: Arc<dyn WebStorage>,
    epoch: Instant,
}

impl PluginInner {
    /// Milliseconds since the plugin was built.
    pub(crate) fn elapsed_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }
}

/// Store interceptor persisting stores through synchronous storages or a
/// pool of storage workers.
#[derive(Clone)]
pub struct PersistPlugin {
    inner: Arc<PluginInner>,
}

impl PersistPlugin {
    /// Builds a plugin with the backends described by `config`.
    ///
    /// # Errors
    ///
    /// See [`PluginBackends::from_config`] and [`WorkerPool::new`].
    pub fn build(config: PersistPluginConfig) -> Result<Self, PersistError> {
        let backends = PluginBackends::from_config(&config)?;
        Self::with_backends(config, backends)
    }

    /// Builds a plugin over explicit backends. `config.data_dir` is ignored.
    ///
    /// Reusing the same backends for a second plugin behaves like reloading
    /// the application over the same storage.
    ///
    /// # Errors
    ///
    /// See [`WorkerPool::new`].
    pub fn with_backends(
        config: PersistPluginConfig,
        backends: PluginBackends,
    ) -> Result<Self, PersistError> {
        let pool = WorkerPool::new(config.worker_num, backends.engine, config.pool_options())?;
        let status = PluginStatus {
            worker_num: pool.len(),
            ..PluginStatus::default()
        };
        info!(
            worker_num = pool.len(),
            lazy = config.lazy_workers,
            "persistence plugin ready"
        );
        Ok(Self {
            inner: Arc::new(PluginInner {
                pool,
                status: Mutex::new(status),
                flush: watch::channel(false).0,
                writers: Mutex::new(Vec::new()),
                local: backends.local,
                session: backends.session,
                epoch: Instant::now(),
            }),
        })
    }

    /// Snapshot of the plugin's diagnostics record.
    #[must_use]
    pub fn status(&self) -> PluginStatus {
        let mut status = self.inner.status.lock().clone();
        status.workers = self.inner.pool.worker_names();
        status
    }

    /// Flushes pending coalesced writes, then stops every worker once it
    /// has drained its queue.
    pub async fn shutdown(&self) {
        self.inner.flush.send_replace(true);
        let writers = std::mem::take(&mut *self.inner.writers.lock());
        for writer in writers {
            if let Err(e) = writer.await {
                warn!(error = %e, "coalescing writer failed");
            }
        }
        self.inner.pool.shutdown().await;
    }
}

impl StoreInterceptor for PersistPlugin {
    fn on_store_created(&self, store: &Arc<Store>) -> Result<(), PersistError> {
        let Some(config) = store.persist() else {
            return Ok(());
        };
        match config.storage_kind()? {
            StorageKind::Local => sync::attach(store, Arc::clone(&self.inner.local), config),
            StorageKind::Session => sync::attach(store, Arc::clone(&self.inner.session), config),
            StorageKind::WorkerDurable => worker_backed::attach(&self.inner, store, config)?,
        }
        Ok(())
    }
}

impl std::fmt::Debug for PersistPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistPlugin")
            .field("pool", &self.inner.pool)
            .finish_non_exhaustive()
    }
}
