use std::path::Path;

use anyhow::{anyhow, Context, Result};
use fusion_core::{CacheEntry, HistoryCursor, HistoryPage, MergedRecord};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS merged_records (
  id TEXT PRIMARY KEY,
  dummy TEXT NOT NULL,
  timestamp INTEGER NOT NULL,
  record_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_merged_records_dummy_timestamp
  ON merged_records(dummy, timestamp, id);
";

const MIGRATION_002_SQL: &str = r"
CREATE TABLE IF NOT EXISTS cache_entries (
  id TEXT PRIMARY KEY,
  data TEXT NOT NULL,
  timestamp INTEGER NOT NULL,
  expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expires_at ON cache_entries(expires_at);
";

const MIGRATIONS: [(i64, &str); 2] = [(1, MIGRATION_001_SQL), (2, MIGRATION_002_SQL)];

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

impl SqliteStore {
    /// Open a SQLite-backed fusion store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when any migration step fails or the database is newer than supported.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        for (target, sql) in MIGRATIONS {
            if target <= version {
                continue;
            }
            let tx = self.conn.transaction().context("failed to start migration transaction")?;
            tx.execute_batch(sql).with_context(|| format!("failed to apply migration {target}"))?;
            record_schema_version(&tx, target)?;
            tx.commit().with_context(|| format!("failed to commit migration {target}"))?;
        }

        Ok(())
    }

    /// Insert one merged record. Identifiers are never reused.
    ///
    /// # Errors
    /// Returns an error when serialization fails or the id already exists.
    pub fn put_record(&mut self, record: &MergedRecord) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO merged_records(id, dummy, timestamp, record_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id,
                record.partition,
                record.timestamp,
                serde_json::to_string(record).context("failed to serialize merged record")?,
            ],
        )
        .context("failed to insert merged record")?;
        tx.commit().context("failed to commit record transaction")?;
        Ok(())
    }

    /// Read one page of records in `partition`, ordered by `(timestamp, id)` ascending.
    ///
    /// Rows strictly after `exclusive_start_key` are returned. The page carries a
    /// continuation key only when at least one more row follows it.
    ///
    /// # Errors
    /// Returns an error when the query fails or a stored row cannot be decoded.
    pub fn query_partition(
        &self,
        partition: &str,
        limit: u32,
        exclusive_start_key: Option<&HistoryCursor>,
    ) -> Result<HistoryPage> {
        let fetch = i64::from(limit) + 1;
        let mut rows_json = Vec::new();

        match exclusive_start_key {
            Some(cursor) => {
                let mut stmt = self.conn.prepare(
                    "SELECT record_json FROM merged_records
                     WHERE dummy = ?1
                       AND (timestamp > ?2 OR (timestamp = ?2 AND id > ?3))
                     ORDER BY timestamp ASC, id ASC
                     LIMIT ?4",
                )?;
                let mut rows = stmt.query(params![partition, cursor.timestamp, cursor.id, fetch])?;
                while let Some(row) = rows.next()? {
                    rows_json.push(row.get::<_, String>(0)?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT record_json FROM merged_records
                     WHERE dummy = ?1
                     ORDER BY timestamp ASC, id ASC
                     LIMIT ?2",
                )?;
                let mut rows = stmt.query(params![partition, fetch])?;
                while let Some(row) = rows.next()? {
                    rows_json.push(row.get::<_, String>(0)?);
                }
            }
        }

        let mut items = rows_json
            .iter()
            .map(|json| {
                serde_json::from_str::<MergedRecord>(json)
                    .context("failed to deserialize stored merged record")
            })
            .collect::<Result<Vec<_>>>()?;

        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let has_more = items.len() > limit;
        items.truncate(limit);
        let last_evaluated_key =
            if has_more { items.last().map(MergedRecord::cursor) } else { None };

        Ok(HistoryPage { items, last_evaluated_key })
    }

    /// Fetch a cache entry regardless of age; freshness is the caller's decision.
    ///
    /// # Errors
    /// Returns an error when the lookup fails.
    pub fn get_cache_entry(&self, id: &str) -> Result<Option<CacheEntry>> {
        self.conn
            .query_row(
                "SELECT id, data, timestamp, expires_at FROM cache_entries WHERE id = ?1",
                params![id],
                |row| {
                    Ok(CacheEntry {
                        id: row.get(0)?,
                        data: row.get(1)?,
                        timestamp: row.get(2)?,
                        expires_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("failed to read cache entry")
    }

    /// Insert or overwrite the cache entry for `entry.id`.
    ///
    /// # Errors
    /// Returns an error when the write fails.
    pub fn put_cache_entry(&mut self, entry: &CacheEntry) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO cache_entries(id, data, timestamp, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                   data = excluded.data,
                   timestamp = excluded.timestamp,
                   expires_at = excluded.expires_at",
                params![entry.id, entry.data, entry.timestamp, entry.expires_at],
            )
            .context("failed to write cache entry")?;
        Ok(())
    }

    /// Delete cache entries whose `expires_at` is before `now_millis`.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn purge_expired_cache(&mut self, now_millis: i64) -> Result<usize> {
        self.conn
            .execute("DELETE FROM cache_entries WHERE expires_at < ?1", params![now_millis])
            .context("failed to purge expired cache entries")
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
