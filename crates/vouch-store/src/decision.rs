// SPDX-License-Identifier: MIT OR Apache-2.0

//! The decision event store.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use vouch_core::{Actor, ActorType, EventPayload, EventType};

use crate::template::TemplateStore;
use crate::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS decisions (
    decision_id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS decision_events (
    decision_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    ts TEXT NOT NULL,
    actor_type TEXT NOT NULL,
    actor_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    digest TEXT NOT NULL,
    PRIMARY KEY (decision_id, seq),
    FOREIGN KEY (decision_id) REFERENCES decisions(decision_id)
);

CREATE INDEX IF NOT EXISTS idx_events_decision
ON decision_events(decision_id);

CREATE INDEX IF NOT EXISTS idx_events_type
ON decision_events(event_type);
";

/// An event as persisted: content plus its log position and provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// The decision this event belongs to.
    pub decision_id: String,
    /// Position in the decision's log. Starts at 0, no gaps.
    pub seq: i64,
    /// Event discriminator.
    pub event_type: EventType,
    /// When the event was appended.
    pub ts: DateTime<Utc>,
    /// Who caused the event.
    pub actor: Actor,
    /// Typed payload.
    pub payload: EventPayload,
    /// SHA-256 of canonical `{event_type, payload}`.
    pub digest: String,
}

impl StoredEvent {
    /// Deterministic event id derived from log position.
    #[must_use]
    pub fn event_id(&self) -> String {
        format!("evt_{}_{}", self.decision_id, self.seq)
    }
}

/// A raw event row for atomic import. Inserted verbatim — seq, digest,
/// and payload are preserved exactly as given.
#[derive(Debug, Clone)]
pub struct ImportEvent {
    /// Log position as recorded in the source bundle.
    pub seq: i64,
    /// Event type wire string.
    pub event_type: String,
    /// Timestamp wire string.
    pub ts: String,
    /// Actor type wire string.
    pub actor_type: String,
    /// Actor id.
    pub actor_id: String,
    /// JSON-encoded payload.
    pub payload_json: String,
    /// Pre-computed event digest.
    pub digest: String,
}

/// SQLite-backed append-only event store for decisions.
///
/// A single connection owns the database; a mutex serializes access so
/// transactions are never interleaved. Single-writer per decision is
/// assumed — concurrent appenders to the same decision race on the
/// `(decision_id, seq)` primary key and the loser must retry.
#[derive(Debug, Clone)]
pub struct DecisionStore {
    conn: Arc<Mutex<Connection>>,
}

impl DecisionStore {
    /// Open (or create) a store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the database cannot be opened or
    /// the schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::with_connection(conn)
    }

    /// Open an in-memory store (tests, ephemeral use).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the schema cannot be created.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A [`TemplateStore`] sharing this store's database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the template schema cannot be
    /// created.
    pub fn template_store(&self) -> Result<TemplateStore, StoreError> {
        TemplateStore::with_shared_connection(Arc::clone(&self.conn))
    }

    /// Create a new decision header.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DecisionExists`] when an explicit id is
    /// already taken.
    pub fn create_decision(&self, decision_id: Option<String>) -> Result<String, StoreError> {
        let decision_id = decision_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let created_at = Utc::now().to_rfc3339();

        let conn = self.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO decisions (decision_id, created_at) VALUES (?1, ?2)",
            params![decision_id, created_at],
        )?;
        if inserted == 0 {
            return Err(StoreError::DecisionExists(decision_id));
        }
        debug!(decision_id = %decision_id, "decision created");
        Ok(decision_id)
    }

    /// Append an event to a decision's log.
    ///
    /// The next sequence number is allocated as `MAX(seq) + 1` inside the
    /// same transaction as the insert, and the digest is computed from the
    /// canonical `{event_type, payload}` form.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DecisionNotFound`] when the decision is
    /// absent; storage failures roll the transaction back.
    pub fn append_event(
        &self,
        decision_id: &str,
        actor: Actor,
        payload: EventPayload,
    ) -> Result<StoredEvent, StoreError> {
        let ts = Utc::now();
        let event_type = payload.event_type();
        let payload_value = payload.to_value()?;
        let digest = vouch_core::event_digest(event_type, &payload_value)?;
        let payload_json = payload_value.to_string();

        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM decisions WHERE decision_id = ?1",
                params![decision_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::DecisionNotFound(decision_id.to_string()));
        }

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), -1) + 1 FROM decision_events WHERE decision_id = ?1",
            params![decision_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO decision_events
             (decision_id, seq, event_type, ts, actor_type, actor_id, payload, digest)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                decision_id,
                seq,
                event_type.as_str(),
                ts.to_rfc3339(),
                actor_type_str(actor.kind),
                actor.id,
                payload_json,
                digest,
            ],
        )?;
        tx.commit()?;

        debug!(decision_id = %decision_id, seq, event_type = %event_type, "event appended");

        Ok(StoredEvent {
            decision_id: decision_id.to_string(),
            seq,
            event_type,
            ts,
            actor,
            payload,
            digest,
        })
    }

    /// All events of a decision in sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DecisionNotFound`] when the decision is
    /// absent, or [`StoreError::CorruptRow`] when a stored row fails to
    /// parse back into the typed contract.
    pub fn get_events(&self, decision_id: &str) -> Result<Vec<StoredEvent>, StoreError> {
        let conn = self.lock();

        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM decisions WHERE decision_id = ?1",
                params![decision_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::DecisionNotFound(decision_id.to_string()));
        }

        let mut stmt = conn.prepare(
            "SELECT seq, event_type, ts, actor_type, actor_id, payload, digest
             FROM decision_events
             WHERE decision_id = ?1
             ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![decision_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (seq, event_type, ts, actor_type, actor_id, payload, digest) = row?;
            events.push(parse_event_row(
                decision_id, seq, &event_type, &ts, &actor_type, actor_id, &payload, digest,
            )?);
        }
        Ok(events)
    }

    /// List decisions newest-first by creation time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage or row-parse failures.
    pub fn list_decisions(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT decision_id, created_at FROM decisions
             ORDER BY created_at DESC
             LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit, offset], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, created_at) = row?;
            let created_at = parse_ts(&id, &created_at)?;
            out.push((id, created_at));
        }
        Ok(out)
    }

    /// Whether a decision header exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] on storage failure.
    pub fn decision_exists(&self, decision_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock();
        let row: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM decisions WHERE decision_id = ?1",
                params![decision_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    /// Delete a decision and all its events. Used only by import
    /// overwrite and replay rollback.
    ///
    /// Returns `true` if a decision was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] on storage failure; the transaction
    /// rolls back and nothing is deleted.
    pub fn delete_decision(&self, decision_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM decision_events WHERE decision_id = ?1",
            params![decision_id],
        )?;
        let deleted = tx.execute(
            "DELETE FROM decisions WHERE decision_id = ?1",
            params![decision_id],
        )?;
        tx.commit()?;
        debug!(decision_id = %decision_id, deleted = deleted > 0, "decision deleted");
        Ok(deleted > 0)
    }

    /// Atomically import a decision with all its events.
    ///
    /// Inside one transaction: if the decision exists and `overwrite` is
    /// false, fail with [`StoreError::DecisionExists`]; if it exists and
    /// `overwrite` is true, delete it first; then insert the header and
    /// every event row verbatim. Either everything is applied or nothing.
    ///
    /// # Errors
    ///
    /// [`StoreError::DecisionExists`] on an un-overwritten conflict;
    /// [`StoreError::Sqlite`] on storage failure (transaction rolled
    /// back).
    pub fn import_decision_atomic(
        &self,
        decision_id: &str,
        created_at: &str,
        events: &[ImportEvent],
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM decisions WHERE decision_id = ?1",
                params![decision_id],
                |row| row.get(0),
            )
            .optional()?;

        if exists.is_some() {
            if !overwrite {
                return Err(StoreError::DecisionExists(decision_id.to_string()));
            }
            tx.execute(
                "DELETE FROM decision_events WHERE decision_id = ?1",
                params![decision_id],
            )?;
            tx.execute(
                "DELETE FROM decisions WHERE decision_id = ?1",
                params![decision_id],
            )?;
        }

        tx.execute(
            "INSERT INTO decisions (decision_id, created_at) VALUES (?1, ?2)",
            params![decision_id, created_at],
        )?;

        for event in events {
            tx.execute(
                "INSERT INTO decision_events
                 (decision_id, seq, event_type, ts, actor_type, actor_id, payload, digest)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    decision_id,
                    event.seq,
                    event.event_type,
                    event.ts,
                    event.actor_type,
                    event.actor_id,
                    event.payload_json,
                    event.digest,
                ],
            )?;
        }

        tx.commit()?;
        debug!(decision_id = %decision_id, events = events.len(), overwrite, "decision imported");
        Ok(())
    }
}

fn actor_type_str(kind: ActorType) -> &'static str {
    match kind {
        ActorType::Human => "human",
        ActorType::System => "system",
    }
}

fn parse_ts(aggregate: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            aggregate: aggregate.to_string(),
            detail: format!("bad timestamp {raw:?}: {e}"),
        })
}

#[allow(clippy::too_many_arguments)]
fn parse_event_row(
    decision_id: &str,
    seq: i64,
    event_type: &str,
    ts: &str,
    actor_type: &str,
    actor_id: String,
    payload: &str,
    digest: String,
) -> Result<StoredEvent, StoreError> {
    let corrupt = |detail: String| StoreError::CorruptRow {
        aggregate: decision_id.to_string(),
        detail,
    };

    let event_type = EventType::parse(event_type)
        .ok_or_else(|| corrupt(format!("unknown event type {event_type:?}")))?;
    let ts = parse_ts(decision_id, ts)?;
    let kind = match actor_type {
        "human" => ActorType::Human,
        "system" => ActorType::System,
        other => return Err(corrupt(format!("unknown actor type {other:?}"))),
    };
    let payload_value: Value = serde_json::from_str(payload)
        .map_err(|e| corrupt(format!("bad payload JSON at seq {seq}: {e}")))?;
    let payload = EventPayload::from_value(event_type, payload_value)
        .map_err(|e| corrupt(format!("payload shape mismatch at seq {seq}: {e}")))?;

    Ok(StoredEvent {
        decision_id: decision_id.to_string(),
        seq,
        event_type,
        ts,
        actor: Actor { kind, id: actor_id },
        payload,
        digest,
    })
}
