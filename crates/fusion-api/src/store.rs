use std::path::PathBuf;

use anyhow::Result;
use fusion_core::{CacheEntry, HistoryCursor, HistoryPage, MergedRecord};
use fusion_store_sqlite::{SchemaStatus, SqliteStore};

/// Persistence for merged records: create plus ordered paging over one partition.
pub trait RecordStore: Send + Sync {
    /// # Errors
    /// Returns an error when the record cannot be written.
    fn put_record(&self, record: &MergedRecord) -> Result<()>;

    /// # Errors
    /// Returns an error when the index query fails.
    fn query_partition(
        &self,
        partition: &str,
        limit: u32,
        exclusive_start_key: Option<&HistoryCursor>,
    ) -> Result<HistoryPage>;
}

/// Key/value persistence for cached Source A lookups.
pub trait CacheStore: Send + Sync {
    /// # Errors
    /// Returns an error when the lookup fails.
    fn get_entry(&self, id: &str) -> Result<Option<CacheEntry>>;

    /// # Errors
    /// Returns an error when the write fails.
    fn put_entry(&self, entry: &CacheEntry) -> Result<()>;
}

/// File-backed store that opens and migrates a connection per operation.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    db_path: PathBuf,
}

impl SqliteBackend {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        let mut store = SqliteStore::open(&self.db_path)?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without applying migrations.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        SqliteStore::open(&self.db_path)?.schema_status()
    }

    /// Drop cache rows whose expiry is already behind `now_millis`.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn purge_expired_cache(&self, now_millis: i64) -> Result<usize> {
        self.open_store()?.purge_expired_cache(now_millis)
    }
}

impl RecordStore for SqliteBackend {
    fn put_record(&self, record: &MergedRecord) -> Result<()> {
        self.open_store()?.put_record(record)
    }

    fn query_partition(
        &self,
        partition: &str,
        limit: u32,
        exclusive_start_key: Option<&HistoryCursor>,
    ) -> Result<HistoryPage> {
        self.open_store()?.query_partition(partition, limit, exclusive_start_key)
    }
}

impl CacheStore for SqliteBackend {
    fn get_entry(&self, id: &str) -> Result<Option<CacheEntry>> {
        self.open_store()?.get_cache_entry(id)
    }

    fn put_entry(&self, entry: &CacheEntry) -> Result<()> {
        self.open_store()?.put_cache_entry(entry)
    }
}

#[cfg(test)]
mod tests {
    use fusion_core::{CharacterProfile, DEFAULT_PARTITION};

    use super::*;

    struct TempDb(PathBuf);

    impl Drop for TempDb {
        fn drop(&mut self) {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{}{suffix}", self.0.display()));
            }
        }
    }

    fn temp_db() -> TempDb {
        TempDb(std::env::temp_dir().join(format!("fusion-api-{}.sqlite3", uuid::Uuid::new_v4())))
    }

    #[test]
    fn backend_migrates_on_first_use_and_serves_both_traits() -> Result<()> {
        let db = temp_db();
        let backend = SqliteBackend::new(db.0.clone());

        let record = MergedRecord::new(
            "11111111-1111-4111-8111-111111111111".to_string(),
            CharacterProfile { name: "Yoda".to_string(), ..CharacterProfile::default() },
            DEFAULT_PARTITION,
            5,
        );
        backend.put_record(&record)?;
        let status = backend.schema_status()?;
        assert!(status.pending_versions.is_empty());

        let page = backend.query_partition(DEFAULT_PARTITION, 10, None)?;
        assert_eq!(page.items, vec![record]);

        let entry = CacheEntry {
            id: "1".to_string(),
            data: "{}".to_string(),
            timestamp: 10,
            expires_at: 20,
        };
        backend.put_entry(&entry)?;
        assert_eq!(backend.get_entry("1")?, Some(entry));
        assert_eq!(backend.purge_expired_cache(30)?, 1);
        assert_eq!(backend.get_entry("1")?, None);
        Ok(())
    }
}
