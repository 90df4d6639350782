//! Redb-backed shared records.
//!
//! Each record is JSON-encoded into a single `&[u8]` value keyed by cache
//! key. Writes are read-modify-write inside one redb write transaction, so
//! field upserts and deletions land together. Transactions (and the fsync
//! on commit) run on tokio's blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::store::{Record, SharedStateStore};
use crate::tables::RECORDS;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe record store backed by redb.
#[derive(Clone)]
pub struct RedbStateStore {
    db: Arc<Database>,
}

impl RedbStateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "redb state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RECORDS).map_err(map_err!(Storage))?;
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    fn read_record(&self, key: &str) -> StateResult<Record> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(RECORDS).map_err(map_err!(Storage))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => decode(guard.value()),
            None => Ok(Record::new()),
        }
    }

    fn write_record(&self, key: &str, fields: &Record, deletions: &[&str]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Storage))?;
            let existing = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let mut record = match existing {
                Some(bytes) => decode(&bytes)?,
                None => Record::new(),
            };

            for (field, value) in fields {
                record.insert(field.clone(), value.clone());
            }
            for field in deletions {
                record.remove(*field);
            }

            if record.is_empty() {
                table.remove(key).map_err(map_err!(Write))?;
            } else {
                let value = serde_json::to_vec(&record).map_err(map_err!(Codec))?;
                table
                    .insert(key, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Storage))?;
        debug!(%key, set = fields.len(), deleted = deletions.len(), "record written");
        Ok(())
    }

    fn remove_record(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        let existed;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!(Storage))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Storage))?;
        debug!(%key, existed, "record cleared");
        Ok(existed)
    }
}

fn decode(bytes: &[u8]) -> StateResult<Record> {
    serde_json::from_slice(bytes).map_err(map_err!(Codec))
}

impl RedbStateStore {
    async fn blocking<R, F>(&self, op: F) -> StateResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&RedbStateStore) -> StateResult<R> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(map_err!(Blocking))?
    }
}

#[async_trait]
impl SharedStateStore for RedbStateStore {
    async fn read(&self, key: &str) -> StateResult<Record> {
        let key = key.to_string();
        self.blocking(move |store| store.read_record(&key)).await
    }

    async fn write(&self, key: &str, fields: &Record, deletions: &[&str]) -> StateResult<()> {
        let key = key.to_string();
        let fields = fields.clone();
        let deletions: Vec<String> = deletions.iter().map(|d| d.to_string()).collect();
        self.blocking(move |store| {
            let deletions: Vec<&str> = deletions.iter().map(String::as_str).collect();
            store.write_record(&key, &fields, &deletions)
        })
        .await
    }

    async fn clear(&self, key: &str) -> StateResult<bool> {
        let key = key.to_string();
        self.blocking(move |store| store.remove_record(&key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn missing_record_reads_empty() {
        let store = RedbStateStore::open_in_memory().unwrap();
        assert!(store.read("dynoscale:app:worker").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_then_read() {
        let store = RedbStateStore::open_in_memory().unwrap();
        store
            .write("k", &fields(&[("dynos", "2"), ("updated_at", "1700000000")]), &[])
            .await
            .unwrap();

        let record = store.read("k").await.unwrap();
        assert_eq!(record.get("dynos").map(String::as_str), Some("2"));
        assert_eq!(record.get("updated_at").map(String::as_str), Some("1700000000"));
    }

    #[tokio::test]
    async fn write_merges_and_deletes_fields() {
        let store = RedbStateStore::open_in_memory().unwrap();
        store
            .write("k", &fields(&[("dynos", "2"), ("quieted_to", "1")]), &[])
            .await
            .unwrap();

        store
            .write("k", &fields(&[("dynos", "3")]), &["quieted_to"])
            .await
            .unwrap();

        let record = store.read("k").await.unwrap();
        assert_eq!(record.get("dynos").map(String::as_str), Some("3"));
        assert!(!record.contains_key("quieted_to"));
    }

    #[tokio::test]
    async fn deleting_every_field_drops_the_record() {
        let store = RedbStateStore::open_in_memory().unwrap();
        store.write("k", &fields(&[("dynos", "1")]), &[]).await.unwrap();
        store.write("k", &Record::new(), &["dynos"]).await.unwrap();

        assert!(store.read("k").await.unwrap().is_empty());
        assert!(!store.clear("k").await.unwrap());
    }

    #[tokio::test]
    async fn records_are_isolated_by_key() {
        let store = RedbStateStore::open_in_memory().unwrap();
        store.write("a", &fields(&[("dynos", "1")]), &[]).await.unwrap();
        store.write("b", &fields(&[("dynos", "5")]), &[]).await.unwrap();

        assert!(store.clear("a").await.unwrap());
        assert!(store.read("a").await.unwrap().is_empty());
        assert_eq!(
            store.read("b").await.unwrap().get("dynos").map(String::as_str),
            Some("5")
        );
    }

    #[tokio::test]
    async fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dynoscale.redb");

        {
            let store = RedbStateStore::open(&path).unwrap();
            store.write("k", &fields(&[("dynos", "4")]), &[]).await.unwrap();
        }

        let store = RedbStateStore::open(&path).unwrap();
        assert_eq!(
            store.read("k").await.unwrap().get("dynos").map(String::as_str),
            Some("4")
        );
    }

    #[tokio::test]
    async fn malformed_record_is_a_codec_error() {
        let store = RedbStateStore::open_in_memory().unwrap();
        {
            let txn = store.db.begin_write().unwrap();
            {
                let mut table = txn.open_table(RECORDS).unwrap();
                table.insert("k", b"not json".as_slice()).unwrap();
            }
            txn.commit().unwrap();
        }

        assert!(matches!(store.read("k").await, Err(StateError::Codec(_))));
        assert!(matches!(
            store.write("k", &fields(&[("dynos", "1")]), &[]).await,
            Err(StateError::Codec(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_writers_merge_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStateStore::open(&dir.path().join("state.redb")).unwrap();

        let writers: Vec<_> = ["dynos", "quieted_to", "quieted_at", "updated_at"]
            .into_iter()
            .map(|field| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.write("k", &fields(&[(field, "1")]), &[]).await.unwrap();
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        assert_eq!(store.read("k").await.unwrap().len(), 4);
    }
}
