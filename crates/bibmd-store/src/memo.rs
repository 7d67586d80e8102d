//! Memoization store: one durable record per bibliography entry
//!
//! Backed by a single SQLite file. The coordinator owns the only
//! connection; every upsert is its own auto-committed statement, so a
//! crash loses nothing that was already upserted.
//!
//! ```text
//! processed_items(
//!     citation_key   TEXT PRIMARY KEY,
//!     file_hashes    TEXT,   -- JSON object: path → hex fingerprint
//!     dir_hash       TEXT,
//!     last_processed TEXT    -- RFC 3339, UTC
//! )
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};

use crate::fingerprint::Fingerprint;
use crate::record::{EntryRecord, FileFingerprints};

/// Bumped whenever the table layout changes.
const SCHEMA_VERSION: i32 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create store directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt record for {key}: {message}")]
    Corrupt { key: String, message: String },
    #[error("store schema version {found} is newer than supported version {}", SCHEMA_VERSION)]
    UnsupportedSchema { found: i32 },
}

/// Durable key/value record keyed by entry identifier.
pub struct MemoStore {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for MemoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl MemoStore {
    /// Open the store at `path`, creating the file, its parent directory
    /// and the schema on first use.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        migrate(&conn)?;
        log::debug!("opened store {}", path.display());
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing store without write access. `Ok(None)` if there is
    /// no store file yet; nothing is created either way.
    pub fn open_read_only(path: &Path) -> Result<Option<Self>, StoreError> {
        if !path.is_file() {
            return Ok(None);
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchema { found: version });
        }
        if version == 0 {
            // Created but never migrated: nothing has been committed
            return Ok(None);
        }
        Ok(Some(Self {
            conn,
            path: path.to_path_buf(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record for `key`, if one was ever committed.
    pub fn get(&self, key: &str) -> Result<Option<EntryRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT citation_key, file_hashes, dir_hash, last_processed
                 FROM processed_items WHERE citation_key = ?1",
                params![key],
                raw_record,
            )
            .optional()?;
        row.map(RawRecord::decode).transpose()
    }

    /// Replace the record for `record.key` in a single committed statement.
    pub fn upsert(&self, record: &EntryRecord) -> Result<(), StoreError> {
        let file_hashes =
            serde_json::to_string(&record.file_hashes).map_err(|e| StoreError::Corrupt {
                key: record.key.clone(),
                message: e.to_string(),
            })?;
        self.conn.execute(
            "INSERT INTO processed_items (citation_key, file_hashes, dir_hash, last_processed)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(citation_key) DO UPDATE SET
                 file_hashes = excluded.file_hashes,
                 dir_hash = excluded.dir_hash,
                 last_processed = excluded.last_processed",
            params![
                record.key,
                file_hashes,
                record.dir_hash.as_str(),
                record.last_processed.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All records, ordered by identifier.
    pub fn list(&self) -> Result<Vec<EntryRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT citation_key, file_hashes, dir_hash, last_processed
             FROM processed_items ORDER BY citation_key",
        )?;
        let rows = stmt.query_map([], raw_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.decode()?);
        }
        Ok(records)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM processed_items", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema { found: version });
    }
    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS processed_items (
                 citation_key TEXT PRIMARY KEY,
                 file_hashes TEXT NOT NULL DEFAULT '{}',
                 dir_hash TEXT NOT NULL DEFAULT '',
                 last_processed TEXT NOT NULL
             );
             PRAGMA user_version = 1;",
        )?;
        log::debug!("store schema created (version {SCHEMA_VERSION})");
    }
    Ok(())
}

/// Row as stored, before JSON and timestamp decoding.
struct RawRecord {
    key: String,
    file_hashes: String,
    dir_hash: String,
    last_processed: String,
}

fn raw_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        key: row.get(0)?,
        file_hashes: row.get(1)?,
        dir_hash: row.get(2)?,
        last_processed: row.get(3)?,
    })
}

impl RawRecord {
    fn decode(self) -> Result<EntryRecord, StoreError> {
        let file_hashes: FileFingerprints =
            serde_json::from_str(&self.file_hashes).map_err(|e| StoreError::Corrupt {
                key: self.key.clone(),
                message: format!("file_hashes: {e}"),
            })?;
        let last_processed = DateTime::parse_from_rfc3339(&self.last_processed)
            .map_err(|e| StoreError::Corrupt {
                key: self.key.clone(),
                message: format!("last_processed: {e}"),
            })?
            .with_timezone(&Utc);
        Ok(EntryRecord {
            key: self.key,
            file_hashes,
            dir_hash: Fingerprint::from_hex(self.dir_hash),
            last_processed,
        })
    }
}
