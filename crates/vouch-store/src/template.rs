// SPDX-License-Identifier: MIT OR Apache-2.0

//! Named, immutable policy templates.
//!
//! Templates capture "how to govern" separately from "what to do". A
//! template is written once (a `TEMPLATE_CREATED` event at seq 0 plus a
//! materialized row for fast lookup) and never mutated afterwards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Value, json};
use tracing::debug;

use vouch_core::{
    Actor, ActorType, EventType, Mode, TemplateCreatedPayload, content_digest, event_digest,
};

use crate::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS templates (
    name TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    min_approvals INTEGER NOT NULL,
    allowed_modes TEXT NOT NULL,
    require_adapter_capabilities TEXT NOT NULL,
    max_steps INTEGER,
    labels TEXT NOT NULL,
    created_at TEXT NOT NULL,
    created_by_type TEXT NOT NULL,
    created_by_id TEXT NOT NULL,
    digest TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS template_events (
    template_name TEXT NOT NULL,
    seq INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    ts TEXT NOT NULL,
    actor_type TEXT NOT NULL,
    actor_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    digest TEXT NOT NULL,
    PRIMARY KEY (template_name, seq)
);

CREATE INDEX IF NOT EXISTS idx_template_events_name
ON template_events(template_name);
";

/// An immutable policy template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// Unique template name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Minimum distinct approvers required.
    pub min_approvals: u32,
    /// Permitted execution modes.
    pub allowed_modes: Vec<Mode>,
    /// Required adapter capabilities.
    pub require_adapter_capabilities: Vec<String>,
    /// Cap on router steps, if any.
    pub max_steps: Option<u32>,
    /// Governance labels.
    pub labels: Vec<String>,
    /// When the template was created.
    pub created_at: DateTime<Utc>,
    /// Who created the template.
    pub created_by: Actor,
}

impl Template {
    fn validate(&self) -> Result<(), StoreError> {
        if self.name.is_empty() {
            return Err(StoreError::InvalidTemplate(
                "template name cannot be empty".into(),
            ));
        }
        if self.min_approvals < 1 {
            return Err(StoreError::InvalidTemplate(
                "min_approvals must be at least 1".into(),
            ));
        }
        if self.allowed_modes.is_empty() {
            return Err(StoreError::InvalidTemplate(
                "allowed_modes cannot be empty".into(),
            ));
        }
        if self.max_steps == Some(0) {
            return Err(StoreError::InvalidTemplate(
                "max_steps must be at least 1 if specified".into(),
            ));
        }
        Ok(())
    }

    /// Full dict form, the input to [`Template::digest`].
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "min_approvals": self.min_approvals,
            "allowed_modes": self.allowed_modes,
            "require_adapter_capabilities": self.require_adapter_capabilities,
            "max_steps": self.max_steps,
            "labels": self.labels,
            "created_at": self.created_at.to_rfc3339(),
            "created_by": self.created_by,
        })
    }

    /// Minimal snapshot of the policy values for embedding in a
    /// `POLICY_ATTACHED` event.
    #[must_use]
    pub fn to_snapshot(&self) -> Value {
        json!({
            "template_name": self.name,
            "template_description": self.description,
            "min_approvals": self.min_approvals,
            "allowed_modes": self.allowed_modes,
            "require_adapter_capabilities": self.require_adapter_capabilities,
            "max_steps": self.max_steps,
            "labels": self.labels,
        })
    }

    /// SHA-256 content digest of the template (raw hex).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Canonical`] if serialization fails.
    pub fn digest(&self) -> Result<String, StoreError> {
        Ok(content_digest(&self.to_value())?)
    }
}

/// Parameters for [`TemplateStore::create_template`].
#[derive(Debug, Clone, Default)]
pub struct TemplateSpec {
    /// Human-readable description.
    pub description: String,
    /// Minimum distinct approvers required. Zero is rejected.
    pub min_approvals: u32,
    /// Permitted execution modes. Empty is rejected.
    pub allowed_modes: Vec<Mode>,
    /// Required adapter capabilities.
    pub require_adapter_capabilities: Vec<String>,
    /// Cap on router steps, if any.
    pub max_steps: Option<u32>,
    /// Governance labels.
    pub labels: Vec<String>,
}

impl TemplateSpec {
    /// A spec with the usual defaults: one approver, dry-run only.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            min_approvals: 1,
            allowed_modes: vec![Mode::DryRun],
            ..Self::default()
        }
    }
}

/// An event as stored in the template event log.
#[derive(Debug, Clone)]
pub struct StoredTemplateEvent {
    /// The template the event belongs to.
    pub template_name: String,
    /// Position in the template's log.
    pub seq: i64,
    /// Event discriminator.
    pub event_type: EventType,
    /// When the event was appended.
    pub ts: DateTime<Utc>,
    /// Who caused the event.
    pub actor: Actor,
    /// Payload in dict form.
    pub payload: Value,
    /// SHA-256 of canonical `{event_type, payload}`.
    pub digest: String,
}

/// SQLite-backed storage for templates, sharing the decision store's
/// connection.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    conn: Arc<Mutex<Connection>>,
}

impl TemplateStore {
    pub(crate) fn with_shared_connection(
        conn: Arc<Mutex<Connection>>,
    ) -> Result<Self, StoreError> {
        {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            guard.execute_batch(SCHEMA)?;
        }
        Ok(Self { conn })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a template: the materialized row and its seq-0
    /// `TEMPLATE_CREATED` event in one transaction.
    ///
    /// # Errors
    ///
    /// [`StoreError::TemplateExists`] on a duplicate name,
    /// [`StoreError::InvalidTemplate`] when the spec violates template
    /// invariants.
    pub fn create_template(
        &self,
        name: &str,
        actor: Actor,
        spec: TemplateSpec,
    ) -> Result<Template, StoreError> {
        let ts = Utc::now();
        let template = Template {
            name: name.to_string(),
            description: spec.description,
            min_approvals: spec.min_approvals,
            allowed_modes: spec.allowed_modes,
            require_adapter_capabilities: spec.require_adapter_capabilities,
            max_steps: spec.max_steps,
            labels: spec.labels,
            created_at: ts,
            created_by: actor.clone(),
        };
        template.validate()?;

        let payload = TemplateCreatedPayload {
            name: template.name.clone(),
            description: template.description.clone(),
            min_approvals: template.min_approvals,
            allowed_modes: template.allowed_modes.clone(),
            require_adapter_capabilities: template.require_adapter_capabilities.clone(),
            max_steps: template.max_steps,
            labels: template.labels.clone(),
        };
        let payload_value = serde_json::to_value(&payload).map_err(vouch_core::CanonicalError::from)?;
        let event_dig = event_digest(EventType::TemplateCreated, &payload_value)?;
        let template_dig = template.digest()?;

        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM templates WHERE name = ?1",
                params![template.name],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::TemplateExists(template.name));
        }

        tx.execute(
            "INSERT INTO templates
             (name, description, min_approvals, allowed_modes,
              require_adapter_capabilities, max_steps, labels,
              created_at, created_by_type, created_by_id, digest)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                template.name,
                template.description,
                template.min_approvals,
                serde_json::to_string(&template.allowed_modes)
                    .map_err(vouch_core::CanonicalError::from)?,
                serde_json::to_string(&template.require_adapter_capabilities)
                    .map_err(vouch_core::CanonicalError::from)?,
                template.max_steps,
                serde_json::to_string(&template.labels)
                    .map_err(vouch_core::CanonicalError::from)?,
                ts.to_rfc3339(),
                actor_type_str(template.created_by.kind),
                template.created_by.id,
                template_dig,
            ],
        )?;

        tx.execute(
            "INSERT INTO template_events
             (template_name, seq, event_type, ts, actor_type, actor_id, payload, digest)
             VALUES (?1, 0, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                template.name,
                EventType::TemplateCreated.as_str(),
                ts.to_rfc3339(),
                actor_type_str(template.created_by.kind),
                template.created_by.id,
                payload_value.to_string(),
                event_dig,
            ],
        )?;

        tx.commit()?;
        debug!(template = %template.name, "template created");
        Ok(template)
    }

    /// Fetch a template by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage or row-parse failures.
    pub fn get_template(&self, name: &str) -> Result<Option<Template>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT name, description, min_approvals, allowed_modes,
                        require_adapter_capabilities, max_steps, labels,
                        created_at, created_by_type, created_by_id
                 FROM templates WHERE name = ?1",
                params![name],
                row_to_template_parts,
            )
            .optional()?;
        row.map(parts_to_template).transpose()
    }

    /// List templates newest-first with optional label filtering.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage or row-parse failures.
    pub fn list_templates(
        &self,
        limit: u32,
        offset: u32,
        label_filter: Option<&str>,
    ) -> Result<Vec<Template>, StoreError> {
        const COLUMNS: &str = "SELECT name, description, min_approvals, allowed_modes,
                   require_adapter_capabilities, max_steps, labels,
                   created_at, created_by_type, created_by_id
            FROM templates";

        let conn = self.lock();
        let mut out = Vec::new();

        if let Some(label) = label_filter {
            // labels is a JSON array; match the quoted element.
            let pattern = format!("%\"{label}\"%");
            let mut stmt = conn.prepare(&format!(
                "{COLUMNS} WHERE labels LIKE ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(params![pattern, limit, offset], row_to_template_parts)?;
            for row in rows {
                out.push(parts_to_template(row?)?);
            }
        } else {
            let mut stmt = conn.prepare(&format!(
                "{COLUMNS} ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(params![limit, offset], row_to_template_parts)?;
            for row in rows {
                out.push(parts_to_template(row?)?);
            }
        }
        Ok(out)
    }

    /// All events of a template in sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage or row-parse failures.
    pub fn get_template_events(
        &self,
        name: &str,
    ) -> Result<Vec<StoredTemplateEvent>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT seq, event_type, ts, actor_type, actor_id, payload, digest
             FROM template_events WHERE template_name = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![name], |row| {
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

        let corrupt = |detail: String| StoreError::CorruptRow {
            aggregate: name.to_string(),
            detail,
        };

        let mut events = Vec::new();
        for row in rows {
            let (seq, event_type, ts, actor_type, actor_id, payload, digest) = row?;
            events.push(StoredTemplateEvent {
                template_name: name.to_string(),
                seq,
                event_type: EventType::parse(&event_type)
                    .ok_or_else(|| corrupt(format!("unknown event type {event_type:?}")))?,
                ts: DateTime::parse_from_rfc3339(&ts)
                    .map_err(|e| corrupt(format!("bad timestamp {ts:?}: {e}")))?
                    .with_timezone(&Utc),
                actor: Actor {
                    kind: match actor_type.as_str() {
                        "system" => ActorType::System,
                        _ => ActorType::Human,
                    },
                    id: actor_id,
                },
                payload: serde_json::from_str(&payload)
                    .map_err(|e| corrupt(format!("bad payload JSON: {e}")))?,
                digest,
            });
        }
        Ok(events)
    }
}

type TemplateParts = (
    String,
    String,
    u32,
    String,
    String,
    Option<u32>,
    String,
    String,
    String,
    String,
);

fn row_to_template_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<TemplateParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn parts_to_template(parts: TemplateParts) -> Result<Template, StoreError> {
    let (
        name,
        description,
        min_approvals,
        allowed_modes,
        require_caps,
        max_steps,
        labels,
        created_at,
        created_by_type,
        created_by_id,
    ) = parts;
    let aggregate = name.clone();
    let corrupt = move |detail: String| StoreError::CorruptRow {
        aggregate: aggregate.clone(),
        detail,
    };

    Ok(Template {
        description,
        min_approvals,
        allowed_modes: serde_json::from_str(&allowed_modes)
            .map_err(|e| corrupt(format!("bad allowed_modes: {e}")))?,
        require_adapter_capabilities: serde_json::from_str(&require_caps)
            .map_err(|e| corrupt(format!("bad capabilities: {e}")))?,
        max_steps,
        labels: serde_json::from_str(&labels)
            .map_err(|e| corrupt(format!("bad labels: {e}")))?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| corrupt(format!("bad timestamp {created_at:?}: {e}")))?
            .with_timezone(&Utc),
        created_by: Actor {
            kind: match created_by_type.as_str() {
                "system" => ActorType::System,
                _ => ActorType::Human,
            },
            id: created_by_id,
        },
        name,
    })
}

fn actor_type_str(kind: ActorType) -> &'static str {
    match kind {
        ActorType::Human => "human",
        ActorType::System => "system",
    }
}
