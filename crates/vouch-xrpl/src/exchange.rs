// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content-addressed exchange evidence: SQLite for records, filesystem
//! for bodies.
//!
//! Records are immutable once stored (content-addressed). Body storage
//! is optional — record-only mode for minimal evidence, record + bodies
//! for full evidence. Bodies land under
//! `<root>/sha256/<hh>/<digest>.blob`, fanned out by the first two hex
//! chars; writes are create-if-absent, so concurrent writers of the
//! same content are harmless.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::transport::ExchangeRecord;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dcl_exchanges (
    content_digest TEXT PRIMARY KEY,
    request_digest TEXT NOT NULL,
    response_digest TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_exchanges_timestamp
ON dcl_exchanges(timestamp);

CREATE INDEX IF NOT EXISTS idx_exchanges_request
ON dcl_exchanges(request_digest);

CREATE INDEX IF NOT EXISTS idx_exchanges_response
ON dcl_exchanges(response_digest);
";

/// Errors from the exchange store.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeStoreError {
    /// A digest did not carry the required prefix.
    #[error("digest must start with \"sha256:\", got {0:?}")]
    BadDigest(String),
    /// Canonical encoding failed.
    #[error(transparent)]
    Canonical(#[from] vouch_core::CanonicalError),
    /// Body file I/O failed.
    #[error("body store I/O: {0}")]
    Io(#[from] std::io::Error),
    /// Underlying SQLite failure.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Content-addressed storage for exchange records and bodies.
#[derive(Debug, Clone)]
pub struct ExchangeStore {
    conn: Arc<Mutex<Connection>>,
    body_root: Option<PathBuf>,
}

impl ExchangeStore {
    /// Open (or create) a store at `db_path`. `body_root` enables body
    /// persistence.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeStoreError`] when the database cannot be opened
    /// or the body root cannot be created.
    pub fn open(
        db_path: impl AsRef<Path>,
        body_root: Option<PathBuf>,
    ) -> Result<Self, ExchangeStoreError> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn, body_root)
    }

    /// Open an in-memory store (tests, ephemeral use).
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeStoreError`] on setup failure.
    pub fn in_memory(body_root: Option<PathBuf>) -> Result<Self, ExchangeStoreError> {
        Self::with_connection(Connection::open_in_memory()?, body_root)
    }

    fn with_connection(
        conn: Connection,
        body_root: Option<PathBuf>,
    ) -> Result<Self, ExchangeStoreError> {
        conn.execute_batch(SCHEMA)?;
        if let Some(root) = &body_root {
            std::fs::create_dir_all(root)?;
        }
        Ok(Self { conn: Arc::new(Mutex::new(conn)), body_root })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an exchange record and optionally its bodies. Idempotent —
    /// re-storing the same record is a no-op.
    ///
    /// Returns the record's prefixed content digest.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeStoreError`] on storage failures.
    pub fn put(
        &self,
        record: &ExchangeRecord,
        request_body: Option<&[u8]>,
        response_body: Option<&[u8]>,
    ) -> Result<String, ExchangeStoreError> {
        let content_digest = record.content_digest()?;

        {
            let conn = self.lock();
            conn.execute(
                "INSERT OR IGNORE INTO dcl_exchanges
                 (content_digest, request_digest, response_digest, timestamp, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    content_digest,
                    record.request_digest,
                    record.response_digest,
                    record.timestamp,
                    record.timestamp,
                ],
            )?;
        }

        if self.body_root.is_some() {
            if let Some(body) = request_body {
                self.put_body(&record.request_digest, body)?;
            }
            if let Some(body) = response_body {
                self.put_body(&record.response_digest, body)?;
            }
        }

        debug!(content_digest = %content_digest, "exchange recorded");
        Ok(content_digest)
    }

    /// Fetch a record by its prefixed content digest.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeStoreError::Sqlite`] on storage failures.
    pub fn get(&self, content_digest: &str) -> Result<Option<ExchangeRecord>, ExchangeStoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT request_digest, response_digest, timestamp
                 FROM dcl_exchanges WHERE content_digest = ?1",
                params![content_digest],
                |row| {
                    Ok(ExchangeRecord {
                        request_digest: row.get(0)?,
                        response_digest: row.get(1)?,
                        timestamp: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Whether a record exists.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeStoreError::Sqlite`] on storage failures.
    pub fn exists(&self, content_digest: &str) -> Result<bool, ExchangeStoreError> {
        Ok(self.get(content_digest)?.is_some())
    }

    /// All exchanges with the given request digest, in time order.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeStoreError::Sqlite`] on storage failures.
    pub fn list_by_request(
        &self,
        request_digest: &str,
    ) -> Result<Vec<ExchangeRecord>, ExchangeStoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT request_digest, response_digest, timestamp
             FROM dcl_exchanges WHERE request_digest = ?1
             ORDER BY timestamp",
        )?;
        let rows = stmt.query_map(params![request_digest], |row| {
            Ok(ExchangeRecord {
                request_digest: row.get(0)?,
                response_digest: row.get(1)?,
                timestamp: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Total number of stored records.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeStoreError::Sqlite`] on storage failures.
    pub fn count(&self) -> Result<u64, ExchangeStoreError> {
        let conn = self.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM dcl_exchanges", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn body_path(&self, digest: &str) -> Result<Option<PathBuf>, ExchangeStoreError> {
        let Some(root) = &self.body_root else {
            return Ok(None);
        };
        let Some(hex_part) = digest.strip_prefix("sha256:") else {
            return Err(ExchangeStoreError::BadDigest(digest.to_string()));
        };
        let fanout = hex_part.get(..2).unwrap_or("00");
        Ok(Some(root.join("sha256").join(fanout).join(format!("{hex_part}.blob"))))
    }

    fn put_body(&self, digest: &str, body: &[u8]) -> Result<(), ExchangeStoreError> {
        let Some(path) = self.body_path(digest)? else {
            return Ok(());
        };
        if path.exists() {
            // Content-addressed and immutable: nothing to do.
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, body)?;
        Ok(())
    }

    /// Fetch a body blob by its prefixed digest. `None` when absent or
    /// body storage is not configured.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeStoreError`] on I/O failures or malformed
    /// digests.
    pub fn get_body(&self, digest: &str) -> Result<Option<Vec<u8>>, ExchangeStoreError> {
        let Some(path) = self.body_path(digest)? else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(&path)?))
    }

    /// Whether a body blob exists.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeStoreError::BadDigest`] on malformed digests.
    pub fn body_exists(&self, digest: &str) -> Result<bool, ExchangeStoreError> {
        Ok(self.body_path(digest)?.is_some_and(|p| p.exists()))
    }
}
