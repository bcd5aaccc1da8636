// SPDX-License-Identifier: MIT OR Apache-2.0

//! The durable attestation queue.
//!
//! Queue id == intent digest (prefixed form). One queue entry per
//! intent, keyed by the thing that makes intents unique — the simplest
//! correct choice.
//!
//! Status transitions:
//!
//! ```text
//! PENDING   → SUBMITTED | FAILED
//! SUBMITTED → CONFIRMED | DEFERRED | FAILED
//! DEFERRED  → SUBMITTED | CONFIRMED | FAILED
//! CONFIRMED, FAILED: terminal
//! ```
//!
//! The queue owns attempt numbers: `next_attempt = last_attempt + 1`.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use vouch_core::CanonicalError;

use crate::intent::{AttestationIntent, IntentError};
use crate::receipt::{AttestationReceipt, ReceiptBuildError};
use crate::storage::QueueStorage;

/// Errors from queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// A stored intent row no longer parses as a valid intent.
    #[error("corrupt intent row {queue_id}: {source}")]
    CorruptIntent {
        /// The affected queue entry.
        queue_id: String,
        /// The underlying validation failure.
        source: IntentError,
    },
    /// A stored receipt row no longer parses as a valid receipt.
    #[error("corrupt receipt row for {intent_digest}: {source}")]
    CorruptReceipt {
        /// The affected intent.
        intent_digest: String,
        /// The underlying validation failure.
        source: ReceiptBuildError,
    },
    /// Canonical encoding failed.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    /// Underlying SQLite failure; the in-flight transaction is rolled
    /// back.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// An intent fetched from the queue for processing.
#[derive(Debug, Clone)]
pub struct QueuedIntent {
    /// Queue identifier (== prefixed intent digest).
    pub queue_id: String,
    /// The parsed intent.
    pub intent: AttestationIntent,
    /// Prefixed intent digest.
    pub intent_digest: String,
    /// Current queue status string.
    pub status: String,
    /// The attempt number to use for the next submit/confirm.
    pub next_attempt: u32,
    /// When the intent was enqueued.
    pub created_at: String,
}

/// Current status of a queued intent.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    /// Queue identifier.
    pub queue_id: String,
    /// Prefixed intent digest.
    pub intent_digest: String,
    /// Current status string.
    pub status: String,
    /// Highest attempt recorded so far.
    pub last_attempt: u32,
    /// When the intent was enqueued.
    pub created_at: String,
    /// When the status last changed.
    pub updated_at: String,
    /// Error code from the most recent failed attempt, if any.
    pub last_error_code: Option<String>,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Durable attestation queue backed by SQLite.
#[derive(Debug, Clone)]
pub struct AttestationQueue {
    storage: QueueStorage,
}

impl AttestationQueue {
    /// Open (or create) a queue at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Sqlite`] when the database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        Ok(Self { storage: QueueStorage::open(path)? })
    }

    /// Open an in-memory queue (tests, ephemeral use).
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Sqlite`] when the schema cannot be created.
    pub fn in_memory() -> Result<Self, QueueError> {
        Ok(Self { storage: QueueStorage::in_memory()? })
    }

    /// Enqueue an intent for attestation.
    ///
    /// Idempotent: enqueueing an intent whose digest is already present
    /// is a no-op returning the existing queue id.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] on storage or encoding failures.
    pub fn enqueue(
        &self,
        intent: &AttestationIntent,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<String, QueueError> {
        let created_at = created_at
            .map_or_else(now_rfc3339, |t| t.to_rfc3339_opts(SecondsFormat::Secs, false));

        let queue_id = intent.prefixed_digest()?;
        let intent_json = vouch_core::canonical_json(&intent.to_value())?;

        let inserted =
            self.storage
                .insert_intent(&queue_id, &queue_id, &intent_json, &created_at)?;
        debug!(queue_id = %queue_id, inserted, "intent enqueued");
        Ok(queue_id)
    }

    /// Fetch intents eligible for processing: status `PENDING` or
    /// `DEFERRED`, ordered by `(created_at, intent_digest)` so separate
    /// processes converge on the same order.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] on storage failures or corrupt rows.
    pub fn next_pending(&self, limit: u32) -> Result<Vec<QueuedIntent>, QueueError> {
        let rows = self.storage.list_pending(limit)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let value: Value = serde_json::from_str(&row.intent_json)
                .map_err(CanonicalError::from)?;
            let intent = AttestationIntent::from_value(&value).map_err(|source| {
                QueueError::CorruptIntent { queue_id: row.queue_id.clone(), source }
            })?;
            out.push(QueuedIntent {
                queue_id: row.queue_id,
                intent,
                intent_digest: row.intent_digest,
                status: row.status,
                next_attempt: row.last_attempt + 1,
                created_at: row.created_at,
            });
        }
        Ok(out)
    }

    /// Record a receipt and update the intent's cached status.
    ///
    /// The receipt log is append-only and idempotent on receipt digest:
    /// recording the same receipt twice inserts once and returns `false`
    /// the second time. The status update runs either way, in the same
    /// transaction as the insert.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] on storage or encoding failures.
    pub fn record_receipt(&self, receipt: &AttestationReceipt) -> Result<bool, QueueError> {
        let receipt_digest = receipt.receipt_digest()?;
        let receipt_json = vouch_core::canonical_json(&receipt.to_value())?;
        let error_code = receipt.error.as_ref().map(|e| e.code.as_str());

        let inserted = self.storage.insert_receipt_and_update_intent(
            &receipt_digest,
            &receipt.intent_digest,
            receipt.attempt,
            &receipt.created_at,
            &receipt.backend,
            receipt.status.as_str(),
            &receipt_json,
            error_code,
        )?;
        debug!(
            intent_digest = %receipt.intent_digest,
            attempt = receipt.attempt,
            status = %receipt.status,
            inserted,
            "receipt recorded"
        );
        Ok(inserted)
    }

    /// Replay all receipts for an intent, ordered by
    /// `(attempt, created_at)`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] on storage failures or corrupt rows.
    pub fn replay(&self, intent_digest: &str) -> Result<Vec<AttestationReceipt>, QueueError> {
        let rows = self.storage.list_receipts(intent_digest)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let value: Value = serde_json::from_str(&row.receipt_json)
                .map_err(CanonicalError::from)?;
            let receipt = AttestationReceipt::from_value(&value).map_err(|source| {
                QueueError::CorruptReceipt { intent_digest: intent_digest.to_string(), source }
            })?;
            out.push(receipt);
        }
        Ok(out)
    }

    /// Current status of a queued intent, or `None` when unknown.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] on storage failures.
    pub fn get_status(&self, queue_id: &str) -> Result<Option<StatusSummary>, QueueError> {
        let Some(row) = self.storage.get_intent(queue_id)? else {
            return Ok(None);
        };
        Ok(Some(StatusSummary {
            queue_id: row.queue_id,
            intent_digest: row.intent_digest,
            status: row.status,
            last_attempt: row.last_attempt,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_error_code: row.last_error_code,
        }))
    }
}
