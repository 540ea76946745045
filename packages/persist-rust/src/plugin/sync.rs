//! Synchronous strategy for `localStorage` / `sessionStorage` stores.
//!
//! Restore and subscription happen inline during store creation. Nothing in
//! here fails the store: unreadable or unwritable data is logged and skipped.

use std::sync::Arc;

use statekeep_core::{unwrap, Value};
use tracing::{debug, warn};

use crate::store::{PersistConfig, RestoreState, Store};
use crate::storage::WebStorage;

pub(crate) fn attach(store: &Arc<Store>, storage: Arc<dyn WebStorage>, config: &PersistConfig) {
    let key = config.resolve_key(store.id());
    let stored = storage.get_item(&key);

    if let Some(hook) = &config.before_restore {
        hook(&**store);
    }
    if let Some(text) = stored {
        match serde_json::from_str::<Value>(&text) {
            Ok(snapshot) => store.merge(&snapshot, config.persist_readonly),
            Err(e) => warn!(store_id = store.id(), key = %key, error = %e, "ignoring unreadable persisted state"),
        }
    }
    if let Some(hook) = &config.after_restore {
        hook(&**store);
    }

    let include_read_only = config.persist_readonly;
    let store_id = store.id().to_string();
    store.subscribe(move |state| {
        let json = match serde_json::to_string(&unwrap(state, include_read_only)) {
            Ok(json) => json,
            Err(e) => {
                warn!(store_id = %store_id, error = %e, "failed to serialize state");
                return;
            }
        };
        if let Err(e) = storage.set_item(&key, &json) {
            warn!(store_id = %store_id, key = %key, error = %e, "failed to persist state");
        }
    });

    store.set_restore_state(RestoreState::Restored);
    debug!(store_id = store.id(), "synchronous persistence attached");
}
