//! Fixed-size pool of storage workers with round-robin assignment.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::PersistError;
use crate::storage::DurableEngine;
use crate::worker::{environment, WorkerHandle};

/// Prefix of every worker thread name.
pub const WORKER_NAME_PREFIX: &str = "statekeep-worker-";

/// Pool construction options.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Reject pools larger than the machine's parallelism instead of warning.
    pub strict_concurrency: bool,
    /// Spawn each worker on its first assignment rather than up front.
    pub lazy: bool,
    /// How long a request waits for its response.
    pub request_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            strict_concurrency: false,
            lazy: true,
            request_timeout: Duration::from_secs(30),
        }
    }
}

struct PoolState {
    cursor: usize,
    /// Workers spawned so far; worker `i` sits at index `i`.
    workers: Vec<Arc<WorkerHandle>>,
    closed: bool,
}

/// A fixed set of workers handed out in strict rotation.
///
/// Workers are never recycled. The assignment sequence is
/// `0, 1, .., n-1, 0, 1, ..` whether workers are spawned eagerly or lazily.
pub struct WorkerPool {
    engine: Arc<dyn DurableEngine>,
    options: PoolOptions,
    size: usize,
    runtime: Option<tokio::runtime::Handle>,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    /// Creates a pool of `worker_num` workers sharing `engine`.
    ///
    /// A size of zero is accepted; such a pool can only serve synchronous
    /// storages and fails every assignment.
    ///
    /// # Errors
    ///
    /// [`PersistError::OutOfRange`] when `worker_num` is negative, or exceeds
    /// the available parallelism with `strict_concurrency` set.
    /// [`PersistError::Spawn`] if an eager worker cannot be started.
    pub fn new(
        worker_num: i64,
        engine: Arc<dyn DurableEngine>,
        options: PoolOptions,
    ) -> Result<Self, PersistError> {
        let out_of_range = PersistError::OutOfRange {
            what: "worker_num",
            value: worker_num,
        };
        let size = usize::try_from(worker_num).map_err(|_| out_of_range)?;

        let parallelism = environment::available_parallelism();
        if size > parallelism {
            if options.strict_concurrency {
                return Err(PersistError::OutOfRange {
                    what: "worker_num",
                    value: worker_num,
                });
            }
            warn!(
                worker_num = size,
                parallelism, "worker pool is larger than the available parallelism"
            );
        }

        let pool = Self {
            engine,
            runtime: tokio::runtime::Handle::try_current().ok(),
            state: Mutex::new(PoolState {
                cursor: 0,
                workers: Vec::new(),
                closed: false,
            }),
            options,
            size,
        };

        if !pool.options.lazy {
            let mut state = pool.state.lock();
            for index in 0..size {
                let worker = Arc::new(pool.spawn(index)?);
                state.workers.push(worker);
            }
        }
        info!(size, lazy = pool.options.lazy, "worker pool created");
        Ok(pool)
    }

    /// Returns the next worker in rotation, spawning it if needed.
    ///
    /// # Errors
    ///
    /// [`PersistError::OutOfRange`] on an empty pool,
    /// [`PersistError::Disconnected`] after [`shutdown`](Self::shutdown),
    /// [`PersistError::Spawn`] if a lazy worker cannot be started.
    pub fn assign_worker(&self) -> Result<Arc<WorkerHandle>, PersistError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PersistError::Disconnected("worker pool".to_string()));
        }
        if self.size == 0 {
            return Err(PersistError::OutOfRange {
                what: "worker pool size",
                value: 0,
            });
        }

        // the cursor only moves forward, so an unspawned worker is always the next one
        let index = state.cursor;
        let worker = match state.workers.get(index) {
            Some(worker) => Arc::clone(worker),
            None => {
                let worker = Arc::new(self.spawn(index)?);
                state.workers.push(Arc::clone(&worker));
                worker
            }
        };
        state.cursor = (index + 1) % self.size;
        Ok(worker)
    }

    /// Configured pool size.
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of the workers spawned so far, in pool order.
    #[must_use]
    pub fn worker_names(&self) -> Vec<String> {
        self.state
            .lock()
            .workers
            .iter()
            .map(|w| w.name().to_string())
            .collect()
    }

    /// Stops every spawned worker after it has drained its queue.
    pub async fn shutdown(&self) {
        let workers: Vec<_> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.workers.drain(..).collect()
        };
        for worker in workers {
            worker.shutdown().await;
        }
        info!("worker pool shut down");
    }

    fn spawn(&self, index: usize) -> Result<WorkerHandle, PersistError> {
        let runtime = self
            .runtime
            .clone()
            .or_else(|| tokio::runtime::Handle::try_current().ok())
            .ok_or_else(|| {
                PersistError::Spawn(std::io::Error::other(
                    "storage workers need a Tokio runtime",
                ))
            })?;
        WorkerHandle::spawn(
            format!("{WORKER_NAME_PREFIX}{index}"),
            Arc::clone(&self.engine),
            self.options.request_timeout,
            &runtime,
        )
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("spawned", &state.workers.len())
            .field("cursor", &state.cursor)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}
