//! Durable store adapter: one named namespace of a [`DurableEngine`].

use std::sync::Arc;

use statekeep_core::{StoreDescriptor, Value};

use crate::error::StorageError;
use crate::storage::engine::{DurableEngine, Namespace, NAMESPACE_VERSION};

/// Wraps one durable namespace and exposes get/set/clear/describe on it.
///
/// An adapter starts uninitialized; every operation except [`init`] fails
/// with [`StorageError::NotInitialized`] until [`init`] has succeeded once.
///
/// [`init`]: DurableStoreAdapter::init
pub struct DurableStoreAdapter {
    engine: Arc<dyn DurableEngine>,
    namespace: Option<(String, Box<dyn Namespace>)>,
}

impl DurableStoreAdapter {
    #[must_use]
    pub fn new(engine: Arc<dyn DurableEngine>) -> Self {
        Self {
            engine,
            namespace: None,
        }
    }

    /// Opens (creating if needed) the namespace called `name`.
    ///
    /// # Errors
    ///
    /// [`StorageError::AlreadyInitialized`] on a second call, or the engine's
    /// error if the namespace cannot be opened.
    pub async fn init(&mut self, name: &str) -> Result<(), StorageError> {
        if let Some((existing, _)) = &self.namespace {
            return Err(StorageError::AlreadyInitialized(existing.clone()));
        }
        let namespace = self.engine.open_namespace(name).await?;
        self.namespace = Some((name.to_string(), namespace));
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.namespace.is_some()
    }

    /// Reads `key`; `Ok(None)` when nothing was stored.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotInitialized`] before [`init`](Self::init), or the
    /// engine's read error.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.namespace()?.get(key).await
    }

    /// Overwrites `key` with `value`.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotInitialized`] before [`init`](Self::init), or the
    /// engine's write error.
    pub async fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.namespace()?.set(key, value).await
    }

    /// Empties the namespace.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotInitialized`] before [`init`](Self::init), or the
    /// engine's error.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.namespace()?.clear().await
    }

    /// Configuration descriptor of the namespace.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotInitialized`] before [`init`](Self::init).
    pub fn describe(&self) -> Result<StoreDescriptor, StorageError> {
        let (name, _) = self
            .namespace
            .as_ref()
            .ok_or(StorageError::NotInitialized)?;
        Ok(StoreDescriptor {
            name: self.engine.database_name().to_string(),
            store_name: name.clone(),
            version: NAMESPACE_VERSION,
            driver: self.engine.driver().to_string(),
            description: format!("this namespace belongs to store `{name}`"),
        })
    }

    fn namespace(&self) -> Result<&dyn Namespace, StorageError> {
        self.namespace
            .as_ref()
            .map(|(_, ns)| ns.as_ref())
            .ok_or(StorageError::NotInitialized)
    }
}

impl std::fmt::Debug for DurableStoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStoreAdapter")
            .field("driver", &self.engine.driver())
            .field("namespace", &self.namespace.as_ref().map(|(name, _)| name))
            .finish()
    }
}
