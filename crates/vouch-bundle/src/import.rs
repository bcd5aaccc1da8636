// SPDX-License-Identifier: MIT OR Apache-2.0

//! Safe bundle import.
//!
//! Imports are safe by default: digest verification before any write,
//! explicit conflict modes, atomic application, and replay validation
//! with rollback. Any failure leaves the target store untouched.

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use vouch_core::strip_digest_prefix;
use vouch_projection::{Decision, compute_lifecycle};
use vouch_store::{DecisionStore, ImportEvent, StoreError};

use crate::types::{
    BundleEvent, DecisionBundle, compute_bundle_digest, validate_bundle_schema,
};
use crate::BundleError;

/// How to handle an existing decision with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictMode {
    /// Fail with `DECISION_EXISTS` (the default).
    #[default]
    RejectOnConflict,
    /// Mint a fresh decision id for the imported copy.
    NewDecisionId,
    /// Delete the existing decision and replace it atomically.
    Overwrite,
}

impl ConflictMode {
    /// Stable wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RejectOnConflict => "reject_on_conflict",
            Self::NewDecisionId => "new_decision_id",
            Self::Overwrite => "overwrite",
        }
    }

    /// Parse a wire string.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::ConflictModeInvalid`] for anything else.
    pub fn parse(s: &str) -> Result<Self, BundleError> {
        match s {
            "reject_on_conflict" => Ok(Self::RejectOnConflict),
            "new_decision_id" => Ok(Self::NewDecisionId),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(BundleError::ConflictModeInvalid(other.to_string())),
        }
    }
}

/// Options for [`import_bundle`]. Defaults are the safe path: verify the
/// digest, reject conflicts, replay after import.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Recompute and compare the canonical digest before any write.
    pub verify_digest: bool,
    /// How to handle an existing decision.
    pub conflict_mode: ConflictMode,
    /// Replay the imported events and validate the result.
    pub replay_after_import: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            verify_digest: true,
            conflict_mode: ConflictMode::default(),
            replay_after_import: true,
        }
    }
}

/// Replay validation outcome attached to a successful import.
#[derive(Debug, Clone)]
pub struct ReplayReport {
    /// Blocking reasons of the imported decision.
    pub blocking_reasons: Vec<Value>,
    /// Whether the lifecycle timeline was truncated.
    pub timeline_truncated: bool,
}

/// A successful import.
#[derive(Debug, Clone)]
pub struct ImportReport {
    /// The id the decision lives under in the target store.
    pub decision_id: String,
    /// The id recorded in the bundle.
    pub original_decision_id: String,
    /// Freshly minted id, when conflict mode remapped.
    pub new_decision_id: Option<String>,
    /// Number of events imported.
    pub events_imported: usize,
    /// Whether the digest was verified.
    pub digest_verified: bool,
    /// Conflict mode in effect.
    pub conflict_mode: ConflictMode,
    /// Whether replay validation ran.
    pub replay_ran: bool,
    /// Replay validation outcome, when it ran.
    pub replay: Option<ReplayReport>,
}

/// Import a decision bundle into the store.
///
/// Follows a fixed order: schema validation, parse, digest verification,
/// conflict resolution, sequence validation, atomic apply, replay
/// validation (with rollback on failure). Digest verification always
/// precedes any store mutation.
///
/// # Errors
///
/// Stable-coded [`BundleError`]s per step; the store is unchanged on any
/// failure.
pub fn import_bundle(
    store: &DecisionStore,
    data: &Value,
    options: &ImportOptions,
) -> Result<ImportReport, BundleError> {
    let schema_errors = validate_bundle_schema(data);
    if !schema_errors.is_empty() {
        return Err(BundleError::InvalidSchema(format!(
            "Invalid bundle schema: {}",
            schema_errors.join("; ")
        )));
    }

    let bundle = DecisionBundle::from_value(data)
        .map_err(|e| BundleError::InvalidSchema(format!("Failed to parse bundle: {e}")))?;

    if options.verify_digest {
        verify_bundle_digest(&bundle)?;
    }

    let original_decision_id = bundle.decision.decision_id.clone();
    let mut target_decision_id = original_decision_id.clone();
    let mut new_decision_id = None;

    if store.decision_exists(&original_decision_id)? {
        match options.conflict_mode {
            ConflictMode::RejectOnConflict => {
                return Err(BundleError::DecisionExists(original_decision_id));
            }
            ConflictMode::NewDecisionId => {
                target_decision_id = Uuid::new_v4().to_string();
                new_decision_id = Some(target_decision_id.clone());
            }
            // Handled atomically inside the store.
            ConflictMode::Overwrite => {}
        }
    }

    let events = prepare_events(&bundle.events)?;
    validate_event_sequence(&events)?;

    match store.import_decision_atomic(
        &target_decision_id,
        &bundle.decision.created_at,
        &events,
        options.conflict_mode == ConflictMode::Overwrite,
    ) {
        Ok(()) => {}
        Err(StoreError::DecisionExists(id)) => return Err(BundleError::DecisionExists(id)),
        Err(other) => {
            return Err(BundleError::AtomicityFailed(format!(
                "Import transaction failed: {other}"
            )));
        }
    }

    let mut replay = None;
    if options.replay_after_import {
        match validate_replay(store, &target_decision_id) {
            Ok(report) => replay = Some(report),
            Err(reason) => {
                // Roll the import back before surfacing the failure.
                store.delete_decision(&target_decision_id)?;
                return Err(BundleError::ReplayInvalid(reason));
            }
        }
    }

    debug!(
        decision_id = %target_decision_id,
        events = events.len(),
        conflict_mode = options.conflict_mode.as_str(),
        "bundle imported"
    );

    Ok(ImportReport {
        decision_id: target_decision_id,
        original_decision_id,
        new_decision_id,
        events_imported: events.len(),
        digest_verified: options.verify_digest,
        conflict_mode: options.conflict_mode,
        replay_ran: options.replay_after_import,
        replay,
    })
}

/// Parse a bundle from a JSON string, validating the schema.
///
/// # Errors
///
/// Returns [`BundleError::InvalidSchema`] on malformed JSON or schema
/// violations.
pub fn parse_bundle_from_json(json_str: &str) -> Result<DecisionBundle, BundleError> {
    let data: Value = serde_json::from_str(json_str)
        .map_err(|e| BundleError::InvalidSchema(format!("Invalid JSON: {e}")))?;

    let schema_errors = validate_bundle_schema(&data);
    if !schema_errors.is_empty() {
        return Err(BundleError::InvalidSchema(format!(
            "Invalid bundle schema: {}",
            schema_errors.join("; ")
        )));
    }

    DecisionBundle::from_value(&data)
        .map_err(|e| BundleError::InvalidSchema(format!("Failed to parse bundle: {e}")))
}

fn verify_bundle_digest(bundle: &DecisionBundle) -> Result<(), BundleError> {
    let expected = strip_digest_prefix(&bundle.integrity.canonical_digest).to_string();
    let computed = compute_bundle_digest(
        &bundle.bundle_version,
        &bundle.decision,
        &bundle.events,
        &bundle.template_snapshot,
        &bundle.router_link,
    )?;

    if computed == expected {
        Ok(())
    } else {
        Err(BundleError::IntegrityMismatch { expected, actual: computed })
    }
}

fn prepare_events(events: &[BundleEvent]) -> Result<Vec<ImportEvent>, BundleError> {
    let mut sorted: Vec<_> = events.iter().collect();
    sorted.sort_by_key(|e| e.seq);

    // decision_id references inside payloads are not rewritten: by
    // convention payloads carry no redundant decision_id.
    let mut prepared = Vec::with_capacity(sorted.len());
    for event in sorted {
        prepared.push(ImportEvent {
            seq: event.seq,
            event_type: event.event_type.clone(),
            ts: event.ts.clone(),
            actor_type: match event.actor.kind {
                vouch_core::ActorType::Human => "human".into(),
                vouch_core::ActorType::System => "system".into(),
            },
            actor_id: event.actor.id.clone(),
            payload_json: event.payload.to_string(),
            digest: event.digest.clone(),
        });
    }
    Ok(prepared)
}

fn validate_event_sequence(events: &[ImportEvent]) -> Result<(), BundleError> {
    let Some(first) = events.first() else {
        return Ok(());
    };
    if first.seq != 0 {
        return Err(BundleError::ReplayInvalid(format!(
            "Event sequence must start at 0, got {}",
            first.seq
        )));
    }
    for pair in events.windows(2) {
        let expected = pair[0].seq + 1;
        if pair[1].seq != expected {
            return Err(BundleError::ReplayInvalid(format!(
                "Event sequence gap: expected {expected}, got {}",
                pair[1].seq
            )));
        }
    }
    Ok(())
}

fn validate_replay(store: &DecisionStore, decision_id: &str) -> Result<ReplayReport, String> {
    let decision = Decision::load(store, decision_id).map_err(|e| e.to_string())?;
    let lifecycle = compute_lifecycle(&decision, Some(vouch_projection::DEFAULT_TIMELINE_LIMIT));
    let blocking_reasons = lifecycle
        .blocking_reasons
        .iter()
        .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
        .collect();
    Ok(ReplayReport {
        blocking_reasons,
        timeline_truncated: lifecycle.timeline_truncated,
    })
}
