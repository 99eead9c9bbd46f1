//! Store port and its redb-backed reference implementation.
//!
//! A *collection* is a namespaced key range (`deployments`, `secrets:<name>`,
//! `jobs:<name>`). Collections map to dynamically named redb tables with
//! `&str` keys and `&[u8]` values; callers serialize domain types to JSON
//! before writing. Collection create/delete are single-transaction atomic.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition, TableHandle};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Collection holding one deployment config per entry, keyed by name.
pub const DEPLOYMENTS_COLLECTION: &str = "deployments";

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Durable key/value store with namespaced collections.
///
/// Reads of an unknown collection or key fail with [`StoreError::Missing`];
/// collection create and delete are idempotent.
pub trait Store: Send + Sync {
    /// Create a collection if it does not exist yet.
    fn create_collection(&self, name: &str) -> StoreResult<()>;

    /// Delete a collection and every key in it. Deleting an absent
    /// collection is a no-op.
    fn delete_collection(&self, name: &str) -> StoreResult<()>;

    /// True if the collection exists.
    fn has_collection(&self, name: &str) -> StoreResult<bool>;

    /// Insert or update a key in an existing collection.
    fn put(&self, collection: &str, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Read a key. Fails with `Missing` on unknown collection or key.
    fn get(&self, collection: &str, key: &str) -> StoreResult<Vec<u8>>;

    /// Remove a key. Returns true if it existed.
    fn delete(&self, collection: &str, key: &str) -> StoreResult<bool>;

    /// All `(key, value)` pairs in a collection, in key order.
    fn list(&self, collection: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;
}

/// Thread-safe store backed by redb.
#[derive(Clone)]
pub struct DiskStore {
    db: Arc<Database>,
}

fn table(name: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(name)
}

/// Map a redb table error, turning "no such table" into `Missing`.
fn table_err(collection: &str) -> impl Fn(redb::TableError) -> StoreError + '_ {
    move |e| match e {
        redb::TableError::TableDoesNotExist(_) => StoreError::Missing(collection.to_string()),
        e => StoreError::Io(e.to_string()),
    }
}

impl DiskStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Io))?;
        let store = Self { db: Arc::new(db) };
        store.create_collection(DEPLOYMENTS_COLLECTION)?;
        debug!(?path, "store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Io))?;
        let store = Self { db: Arc::new(db) };
        store.create_collection(DEPLOYMENTS_COLLECTION)?;
        debug!("in-memory store opened");
        Ok(store)
    }

    fn require_collection(&self, name: &str) -> StoreResult<()> {
        if self.has_collection(name)? {
            Ok(())
        } else {
            Err(StoreError::Missing(name.to_string()))
        }
    }
}

impl Store for DiskStore {
    fn create_collection(&self, name: &str) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Io))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(table(name)).map_err(map_err!(Io))?;
        txn.commit().map_err(map_err!(Io))?;
        Ok(())
    }

    fn delete_collection(&self, name: &str) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Io))?;
        let existed = txn.delete_table(table(name)).map_err(map_err!(Io))?;
        txn.commit().map_err(map_err!(Io))?;
        debug!(collection = name, existed, "collection deleted");
        Ok(())
    }

    fn has_collection(&self, name: &str) -> StoreResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Io))?;
        let mut tables = txn.list_tables().map_err(map_err!(Io))?;
        Ok(tables.any(|t| t.name() == name))
    }

    fn put(&self, collection: &str, key: &str, value: &[u8]) -> StoreResult<()> {
        self.require_collection(collection)?;
        let txn = self.db.begin_write().map_err(map_err!(Io))?;
        {
            let mut table = txn.open_table(table(collection)).map_err(table_err(collection))?;
            table.insert(key, value).map_err(map_err!(Io))?;
        }
        txn.commit().map_err(map_err!(Io))?;
        Ok(())
    }

    fn get(&self, collection: &str, key: &str) -> StoreResult<Vec<u8>> {
        let txn = self.db.begin_read().map_err(map_err!(Io))?;
        let table = txn.open_table(table(collection)).map_err(table_err(collection))?;
        match table.get(key).map_err(map_err!(Io))? {
            Some(guard) => Ok(guard.value().to_vec()),
            None => Err(StoreError::Missing(format!("{collection}/{key}"))),
        }
    }

    fn delete(&self, collection: &str, key: &str) -> StoreResult<bool> {
        self.require_collection(collection)?;
        let txn = self.db.begin_write().map_err(map_err!(Io))?;
        let existed;
        {
            let mut table = txn.open_table(table(collection)).map_err(table_err(collection))?;
            existed = table.remove(key).map_err(map_err!(Io))?.is_some();
        }
        txn.commit().map_err(map_err!(Io))?;
        Ok(existed)
    }

    fn list(&self, collection: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(map_err!(Io))?;
        let table = txn.open_table(table(collection)).map_err(table_err(collection))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Io))? {
            let (key, value) = entry.map_err(map_err!(Io))?;
            results.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(results)
    }
}
