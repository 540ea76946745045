//! [`DurableEngine`] backed by an embedded redb database.
//!
//! One redb table per namespace, keyed by record key, holding the
//! `MsgPack`-encoded snapshot. redb calls block, so every operation runs on
//! Tokio's blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, TableDefinition, TableError};
use statekeep_core::Value;

use crate::error::StorageError;
use crate::storage::engine::{DurableEngine, Namespace};

const TABLE_PREFIX: &str = "statekeep.";

type RecordTable<'a> = TableDefinition<'a, &'static str, &'static [u8]>;

/// A redb database file shared by every worker of a pool.
pub struct RedbEngine {
    db: Arc<Database>,
    name: String,
}

impl RedbEngine {
    /// Opens or creates the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if the file cannot be opened, for
    /// example because another process holds it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(StorageError::backend)?;
        let name = path
            .file_stem()
            .map_or_else(|| "statekeep".to_string(), |s| s.to_string_lossy().into_owned());
        tracing::info!(path = %path.display(), "opened redb storage");
        Ok(Self {
            db: Arc::new(db),
            name,
        })
    }

    /// Creates a database that lives in memory only.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if redb fails to initialize.
    pub fn in_memory() -> Result<Self, StorageError> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(StorageError::backend)?;
        Ok(Self {
            db: Arc::new(db),
            name: "statekeep".to_string(),
        })
    }
}

#[async_trait]
impl DurableEngine for RedbEngine {
    fn driver(&self) -> &'static str {
        "redb"
    }

    fn database_name(&self) -> &str {
        &self.name
    }

    async fn open_namespace(&self, name: &str) -> Result<Box<dyn Namespace>, StorageError> {
        Ok(Box::new(RedbNamespace {
            db: Arc::clone(&self.db),
            table: format!("{TABLE_PREFIX}{name}"),
        }))
    }
}

struct RedbNamespace {
    db: Arc<Database>,
    table: String,
}

impl RedbNamespace {
    async fn blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database, RecordTable<'_>) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let table = self.table.clone();
        tokio::task::spawn_blocking(move || op(&db, TableDefinition::new(&table)))
            .await
            .map_err(StorageError::backend)?
    }
}

#[async_trait]
impl Namespace for RedbNamespace {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let key = key.to_string();
        let bytes = self
            .blocking(move |db, def| {
                let txn = db.begin_read().map_err(StorageError::backend)?;
                let table = match txn.open_table(def) {
                    Ok(table) => table,
                    Err(TableError::TableDoesNotExist(_)) => return Ok(None),
                    Err(e) => return Err(StorageError::backend(e)),
                };
                let found = table.get(key.as_str()).map_err(StorageError::backend)?;
                Ok(found.map(|guard| guard.value().to_vec()))
            })
            .await?;
        bytes
            .map(|b| rmp_serde::from_slice(&b).map_err(StorageError::from))
            .transpose()
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let key = key.to_string();
        let bytes = rmp_serde::to_vec_named(value)?;
        self.blocking(move |db, def| {
            let txn = db.begin_write().map_err(StorageError::backend)?;
            {
                let mut table = txn.open_table(def).map_err(StorageError::backend)?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(StorageError::backend)?;
            }
            txn.commit().map_err(StorageError::backend)
        })
        .await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.blocking(|db, def| {
            let txn = db.begin_write().map_err(StorageError::backend)?;
            txn.delete_table(def).map_err(StorageError::backend)?;
            txn.commit().map_err(StorageError::backend)
        })
        .await
    }
}
