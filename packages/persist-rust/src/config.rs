use std::path::PathBuf;
use std::time::Duration;

use crate::pool::PoolOptions;

/// Plugin-level configuration.
///
/// Controls the worker pool and where worker-backed stores are persisted.
#[derive(Debug, Clone)]
pub struct PersistPluginConfig {
    /// Number of storage workers. Negative values are rejected at build time.
    pub worker_num: i64,
    /// Fail instead of warning when `worker_num` exceeds available parallelism.
    pub strict_concurrency: bool,
    /// Spawn workers on first use rather than when the plugin is built.
    pub lazy_workers: bool,
    /// How long INIT/QUERY/DETAIL requests wait for their response.
    pub request_timeout: Duration,
    /// Directory of the durable database file. `None` keeps durable data in memory.
    pub data_dir: Option<PathBuf>,
}

impl PersistPluginConfig {
    /// Pool options derived from this configuration.
    #[must_use]
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            strict_concurrency: self.strict_concurrency,
            lazy: self.lazy_workers,
            request_timeout: self.request_timeout,
        }
    }
}

impl Default for PersistPluginConfig {
    fn default() -> Self {
        Self {
            worker_num: 1,
            strict_concurrency: false,
            lazy_workers: true,
            request_timeout: Duration::from_secs(30),
            data_dir: None,
        }
    }
}
