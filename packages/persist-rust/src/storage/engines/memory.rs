//! In-memory [`DurableEngine`] implementation backed by [`DashMap`].
//!
//! Values are stored `MsgPack`-encoded, so they go through the same
//! serialization boundary as on a real durable backend. The engine outlives
//! any plugin that uses it: handing the same `Arc<MemoryEngine>` to a second
//! plugin simulates a page reload over the same database.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use statekeep_core::Value;

use crate::error::StorageError;
use crate::storage::engine::{DurableEngine, Namespace};

type Entries = Arc<DashMap<String, Vec<u8>>>;

/// In-memory durable engine with an optional byte quota.
pub struct MemoryEngine {
    name: String,
    namespaces: DashMap<String, Entries>,
    usage: Arc<Mutex<Usage>>,
}

#[derive(Debug, Default)]
struct Usage {
    used: usize,
    quota: Option<usize>,
}

impl MemoryEngine {
    /// Creates an empty engine without a quota.
    #[must_use]
    pub fn new() -> Self {
        Self::named("statekeep")
    }

    /// Creates an empty engine reporting `name` as its database name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespaces: DashMap::new(),
            usage: Arc::new(Mutex::new(Usage::default())),
        }
    }

    /// Limits the total encoded size of all stored values to `bytes`.
    #[must_use]
    pub fn with_quota(self, bytes: usize) -> Self {
        self.usage.lock().quota = Some(bytes);
        self
    }

    /// Total encoded bytes currently stored.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.usage.lock().used
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableEngine for MemoryEngine {
    fn driver(&self) -> &'static str {
        "memory"
    }

    fn database_name(&self) -> &str {
        &self.name
    }

    async fn open_namespace(&self, name: &str) -> Result<Box<dyn Namespace>, StorageError> {
        let entries = self
            .namespaces
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .clone();
        Ok(Box::new(MemoryNamespace {
            entries,
            usage: Arc::clone(&self.usage),
        }))
    }
}

struct MemoryNamespace {
    entries: Entries,
    usage: Arc<Mutex<Usage>>,
}

#[async_trait]
impl Namespace for MemoryNamespace {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let Some(bytes) = self.entries.get(key).map(|b| b.clone()) else {
            return Ok(None);
        };
        Ok(Some(rmp_serde::from_slice(&bytes)?))
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let bytes = rmp_serde::to_vec_named(value)?;
        let mut usage = self.usage.lock();
        let previous = self.entries.get(key).map_or(0, |b| b.len());
        let needed = usage.used - previous + bytes.len();
        if let Some(quota) = usage.quota {
            if needed > quota {
                return Err(StorageError::QuotaExceeded {
                    needed,
                    available: quota.saturating_sub(usage.used - previous),
                });
            }
        }
        usage.used = needed;
        self.entries.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut usage = self.usage.lock();
        let freed: usize = self.entries.iter().map(|b| b.value().len()).sum();
        usage.used = usage.used.saturating_sub(freed);
        self.entries.clear();
        Ok(())
    }
}
