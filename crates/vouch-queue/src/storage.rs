// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite storage for the attestation queue.
//!
//! Two tables, minimal: a durable intent ledger with cached status, and
//! an append-only receipt log. Receipts are never updated or deleted;
//! intent status is derived from receipts but cached for queries.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, params};

use crate::QueueError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS attestation_intents (
    queue_id TEXT PRIMARY KEY,
    intent_digest TEXT NOT NULL UNIQUE,
    intent_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    last_attempt INTEGER NOT NULL DEFAULT 0,
    last_error_code TEXT,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_intents_status
ON attestation_intents(status);

CREATE INDEX IF NOT EXISTS idx_intents_created
ON attestation_intents(created_at);

CREATE TABLE IF NOT EXISTS attestation_receipts (
    receipt_digest TEXT PRIMARY KEY,
    intent_digest TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    backend TEXT NOT NULL,
    status TEXT NOT NULL,
    receipt_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_receipts_intent
ON attestation_receipts(intent_digest, attempt);
";

/// A raw intent row.
#[derive(Debug, Clone)]
pub(crate) struct IntentRow {
    pub queue_id: String,
    pub intent_digest: String,
    pub intent_json: String,
    pub created_at: String,
    pub status: String,
    pub last_attempt: u32,
    pub last_error_code: Option<String>,
    pub updated_at: String,
}

/// A raw receipt row.
#[derive(Debug, Clone)]
pub(crate) struct ReceiptRow {
    pub receipt_json: String,
}

/// SQLite-backed storage for attestation intents and receipts.
#[derive(Debug, Clone)]
pub(crate) struct QueueStorage {
    conn: Arc<Mutex<Connection>>,
}

impl QueueStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, QueueError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, QueueError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an intent row. Returns `false` when the row already exists
    /// (idempotent enqueue).
    pub fn insert_intent(
        &self,
        queue_id: &str,
        intent_digest: &str,
        intent_json: &str,
        created_at: &str,
    ) -> Result<bool, QueueError> {
        let conn = self.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO attestation_intents
             (queue_id, intent_digest, intent_json, created_at, status, last_attempt, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'PENDING', 0, ?5)",
            params![queue_id, intent_digest, intent_json, created_at, created_at],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_intent(&self, queue_id: &str) -> Result<Option<IntentRow>, QueueError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT queue_id, intent_digest, intent_json, created_at, status,
                        last_attempt, last_error_code, updated_at
                 FROM attestation_intents WHERE queue_id = ?1",
                params![queue_id],
                row_to_intent,
            )
            .optional()?;
        Ok(row)
    }

    /// Intents eligible for processing (`PENDING` or `DEFERRED`),
    /// ordered deterministically by `(created_at, intent_digest)`.
    pub fn list_pending(&self, limit: u32) -> Result<Vec<IntentRow>, QueueError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT queue_id, intent_digest, intent_json, created_at, status,
                    last_attempt, last_error_code, updated_at
             FROM attestation_intents
             WHERE status IN ('PENDING', 'DEFERRED')
             ORDER BY created_at, intent_digest
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_intent)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Insert a receipt and update the owning intent's cached status in
    /// the same transaction. Returns `true` when the receipt was new.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_receipt_and_update_intent(
        &self,
        receipt_digest: &str,
        intent_digest: &str,
        attempt: u32,
        created_at: &str,
        backend: &str,
        status: &str,
        receipt_json: &str,
        last_error_code: Option<&str>,
    ) -> Result<bool, QueueError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO attestation_receipts
             (receipt_digest, intent_digest, attempt, created_at, backend, status, receipt_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![receipt_digest, intent_digest, attempt, created_at, backend, status, receipt_json],
        )?;

        // The status update runs even for duplicate receipts — it is
        // idempotent and the final row reflects the last writer.
        tx.execute(
            "UPDATE attestation_intents
             SET status = ?1, last_attempt = ?2, updated_at = ?3, last_error_code = ?4
             WHERE queue_id = ?5",
            params![status, attempt, created_at, last_error_code, intent_digest],
        )?;

        tx.commit()?;
        Ok(inserted > 0)
    }

    /// All receipts for an intent, ordered by `(attempt, created_at)`.
    pub fn list_receipts(&self, intent_digest: &str) -> Result<Vec<ReceiptRow>, QueueError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT receipt_json FROM attestation_receipts
             WHERE intent_digest = ?1
             ORDER BY attempt, created_at",
        )?;
        let rows = stmt.query_map(params![intent_digest], |row| {
            Ok(ReceiptRow { receipt_json: row.get(0)? })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn row_to_intent(row: &rusqlite::Row<'_>) -> rusqlite::Result<IntentRow> {
    Ok(IntentRow {
        queue_id: row.get(0)?,
        intent_digest: row.get(1)?,
        intent_json: row.get(2)?,
        created_at: row.get(3)?,
        status: row.get(4)?,
        last_attempt: row.get(5)?,
        last_error_code: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
