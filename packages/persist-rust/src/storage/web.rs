//! Synchronous string key-value storages used by the local/session strategy.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::StorageError;

/// A synchronous string-to-string storage (the `localStorage` analogue).
pub trait WebStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// [`StorageError::QuotaExceeded`] when the storage is full.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str);

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`WebStorage`] with an optional quota on total key + value bytes.
#[derive(Debug, Default)]
pub struct MemoryWebStorage {
    items: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryWebStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            quota: Some(bytes),
        }
    }
}

fn footprint(items: &HashMap<String, String>) -> usize {
    items.iter().map(|(k, v)| k.len() + v.len()).sum()
}

impl WebStorage for MemoryWebStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock();
        if let Some(quota) = self.quota {
            let current = footprint(&items) - items.get(key).map_or(0, |v| key.len() + v.len());
            let needed = current + key.len() + value.len();
            if needed > quota {
                return Err(StorageError::QuotaExceeded {
                    needed,
                    available: quota.saturating_sub(current),
                });
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        self.items.lock().remove(key);
    }

    fn clear(&self) {
        self.items.lock().clear();
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let storage = MemoryWebStorage::new();
        assert!(storage.is_empty());
        storage.set_item("theme", "{\"dark\":true}").unwrap();
        assert_eq!(storage.get_item("theme").as_deref(), Some("{\"dark\":true}"));
        assert_eq!(storage.len(), 1);

        storage.remove_item("theme");
        assert_eq!(storage.get_item("theme"), None);
    }

    #[test]
    fn quota_counts_keys_and_values() {
        let storage = MemoryWebStorage::with_quota(10);
        storage.set_item("k", "12345").unwrap();
        // replacing an entry only counts the new size
        storage.set_item("k", "123456789").unwrap();

        let err = storage.set_item("other", "x").unwrap_err();
        assert!(matches!(
            err,
            StorageError::QuotaExceeded {
                needed: 16,
                available: 0
            }
        ));
        assert_eq!(storage.get_item("other"), None);

        storage.clear();
        storage.set_item("other", "x").unwrap();
    }
}
