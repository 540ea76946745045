//! State stores, their persistence options, and the interceptor seam.
//!
//! A [`StoreHub`] creates [`Store`]s and runs every registered
//! [`StoreInterceptor`] on each new store before handing it out. The
//! persistence plugin is one such interceptor.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use statekeep_core::{merge_into, unwrap, Observable, Value, DEFAULT_STATE_KEY};
use tokio::sync::watch;

use crate::error::PersistError;

// ---------------------------------------------------------------------------
// Persistence options
// ---------------------------------------------------------------------------

/// Where a store is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Synchronous storage shared by every plugin instance (`localStorage`).
    Local,
    /// Synchronous storage private to one plugin instance (`sessionStorage`).
    Session,
    /// Durable storage behind a worker (`indexedDB`).
    WorkerDurable,
}

impl StorageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Local => "localStorage",
            StorageKind::Session => "sessionStorage",
            StorageKind::WorkerDurable => "indexedDB",
        }
    }
}

impl FromStr for StorageKind {
    type Err = PersistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "localStorage" => Ok(StorageKind::Local),
            "sessionStorage" => Ok(StorageKind::Session),
            "indexedDB" => Ok(StorageKind::WorkerDurable),
            other => Err(PersistError::InvalidConfig(format!(
                "unknown storage `{other}`, expected localStorage, sessionStorage or indexedDB"
            ))),
        }
    }
}

/// How snapshots of a worker-backed store are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Every snapshot is sent, in mutation order.
    #[default]
    Fifo,
    /// Only the latest snapshot is sent once mutations pause for `debounce`.
    Coalesce { debounce: Duration },
}

/// Hook invoked around the restore step.
pub type RestoreHook = Arc<dyn Fn(&Store) + Send + Sync>;

/// Per-store persistence options.
#[derive(Clone)]
pub struct PersistConfig {
    /// `localStorage`, `sessionStorage` or `indexedDB`. Checked when the store is created.
    pub storage: String,
    /// Custom persistence key. Defaults to the store id.
    pub key: Option<String>,
    /// Persist read-only state and let restored data overwrite it.
    pub persist_readonly: bool,
    pub before_restore: Option<RestoreHook>,
    pub after_restore: Option<RestoreHook>,
    pub write_policy: WritePolicy,
}

impl PersistConfig {
    #[must_use]
    pub fn new(storage: impl Into<String>) -> Self {
        Self {
            storage: storage.into(),
            key: None,
            persist_readonly: false,
            before_restore: None,
            after_restore: None,
            write_policy: WritePolicy::default(),
        }
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn persist_readonly(mut self, persist_readonly: bool) -> Self {
        self.persist_readonly = persist_readonly;
        self
    }

    #[must_use]
    pub fn before_restore(mut self, hook: impl Fn(&Store) + Send + Sync + 'static) -> Self {
        self.before_restore = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn after_restore(mut self, hook: impl Fn(&Store) + Send + Sync + 'static) -> Self {
        self.after_restore = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Persistence key: the custom key, or the store id.
    #[must_use]
    pub fn resolve_key(&self, store_id: &str) -> String {
        self.key.clone().unwrap_or_else(|| store_id.to_string())
    }

    /// Record key inside a durable namespace: the custom key, or `"state"`.
    #[must_use]
    pub fn record_key(&self) -> &str {
        self.key.as_deref().unwrap_or(DEFAULT_STATE_KEY)
    }

    /// Parses [`storage`](Self::storage).
    ///
    /// # Errors
    ///
    /// [`PersistError::InvalidConfig`] for an unknown storage name.
    pub fn storage_kind(&self) -> Result<StorageKind, PersistError> {
        self.storage.parse()
    }
}

impl std::fmt::Debug for PersistConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistConfig")
            .field("storage", &self.storage)
            .field("key", &self.key)
            .field("persist_readonly", &self.persist_readonly)
            .field("before_restore", &self.before_restore.is_some())
            .field("after_restore", &self.after_restore.is_some())
            .field("write_policy", &self.write_policy)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Progress of a store's restore step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    /// The store is not persisted.
    Ephemeral,
    /// Restore has not finished yet.
    Pending,
    /// State was restored (or found empty) and mutations are persisted.
    Restored,
    /// Persistence failed; the store keeps working in memory only.
    Degraded,
}

type Subscriber = Arc<dyn Fn(&Observable) + Send + Sync>;

/// A named, observable state container.
pub struct Store {
    id: String,
    persist: Option<PersistConfig>,
    state: RwLock<Observable>,
    subscribers: RwLock<Vec<Subscriber>>,
    restore: watch::Sender<RestoreState>,
}

impl Store {
    #[must_use]
    pub fn new(id: impl Into<String>, initial: Observable, persist: Option<PersistConfig>) -> Self {
        let restore_state = if persist.is_some() {
            RestoreState::Pending
        } else {
            RestoreState::Ephemeral
        };
        Self {
            id: id.into(),
            persist,
            state: RwLock::new(initial),
            subscribers: RwLock::new(Vec::new()),
            restore: watch::channel(restore_state).0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn persist(&self) -> Option<&PersistConfig> {
        self.persist.as_ref()
    }

    /// Copy of the current state tree.
    #[must_use]
    pub fn state(&self) -> Observable {
        self.state.read().clone()
    }

    /// Reads the state tree in place.
    pub fn read<R>(&self, f: impl FnOnce(&Observable) -> R) -> R {
        f(&*self.state.read())
    }

    /// Plain snapshot of the state, see [`unwrap`].
    #[must_use]
    pub fn snapshot(&self, include_read_only: bool) -> Value {
        unwrap(&self.state.read(), include_read_only)
    }

    /// Mutates the state, then notifies every subscriber.
    pub fn patch(&self, f: impl FnOnce(&mut Observable)) {
        f(&mut *self.state.write());
        self.notify();
    }

    /// Folds a restored snapshot into the state, then notifies subscribers.
    pub fn merge(&self, incoming: &Value, overwrite_read_only: bool) {
        merge_into(&mut self.state.write(), incoming, overwrite_read_only);
        self.notify();
    }

    /// Registers `f` to run after every mutation with the new state.
    pub fn subscribe(&self, f: impl Fn(&Observable) + Send + Sync + 'static) {
        self.subscribers.write().push(Arc::new(f));
    }

    #[must_use]
    pub fn restore_state(&self) -> RestoreState {
        *self.restore.borrow()
    }

    /// Waits until the restore step has finished and returns its outcome.
    pub async fn restored(&self) -> RestoreState {
        let mut rx = self.restore.subscribe();
        let outcome = rx
            .wait_for(|state| *state != RestoreState::Pending)
            .await
            .map(|state| *state);
        outcome.unwrap_or(RestoreState::Degraded)
    }

    pub(crate) fn set_restore_state(&self, state: RestoreState) {
        self.restore.send_replace(state);
    }

    fn notify(&self) {
        let subscribers = self.subscribers.read().clone();
        if subscribers.is_empty() {
            return;
        }
        let state = self.state();
        for subscriber in subscribers {
            subscriber(&state);
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("persist", &self.persist)
            .field("restore_state", &self.restore_state())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Interceptors
// ---------------------------------------------------------------------------

/// Runs on every store a [`StoreHub`] creates.
pub trait StoreInterceptor: Send + Sync {
    /// Called once per store, before the store is returned to its creator.
    ///
    /// # Errors
    ///
    /// An error aborts the store's creation.
    fn on_store_created(&self, store: &Arc<Store>) -> Result<(), PersistError>;
}

/// Registry of stores and the interceptors applied to them.
#[derive(Default)]
pub struct StoreHub {
    stores: DashMap<String, Arc<Store>>,
    interceptors: RwLock<Vec<Arc<dyn StoreInterceptor>>>,
    /// Serializes creation so interceptors run once per id.
    creating: Mutex<()>,
}

impl StoreHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an interceptor for stores created from now on.
    pub fn use_interceptor(&self, interceptor: Arc<dyn StoreInterceptor>) {
        self.interceptors.write().push(interceptor);
    }

    /// Creates the store `id`, or returns it if it already exists.
    ///
    /// Interceptors run only for newly created stores, exactly once per id
    /// even when several callers race to create it. Interceptors must not
    /// create stores on the same hub.
    ///
    /// # Errors
    ///
    /// The first interceptor error; the store is not registered then.
    pub fn create_store(
        &self,
        id: &str,
        initial: Observable,
        persist: Option<PersistConfig>,
    ) -> Result<Arc<Store>, PersistError> {
        if let Some(existing) = self.get(id) {
            return Ok(existing);
        }
        let _creating = self.creating.lock();
        if let Some(existing) = self.get(id) {
            return Ok(existing);
        }
        let store = Arc::new(Store::new(id, initial, persist));
        let interceptors = self.interceptors.read().clone();
        for interceptor in interceptors {
            interceptor.on_store_created(&store)?;
        }
        self.stores.insert(id.to_string(), Arc::clone(&store));
        Ok(store)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Store>> {
        self.stores.get(id).map(|s| Arc::clone(s.value()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}
