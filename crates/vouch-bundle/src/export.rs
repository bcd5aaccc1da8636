// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic decision export.
//!
//! The canonical digest is identical for the same store state (same
//! events, same order). `meta.exported_at` and provenance are outside
//! the digest, so re-exports at different times differ only there.

use chrono::Utc;
use serde_json::json;
use tracing::debug;

use vouch_core::{DIGEST_PREFIX, sha256_hex};
use vouch_projection::Decision;
use vouch_store::DecisionStore;

use crate::types::{
    BUNDLE_VERSION, BundleDecision, BundleEvent, BundleIntegrity, BundleProvenance,
    BundleRouterLink, BundleTemplateSnapshot, DecisionBundle, ProvenanceRecord,
    compute_bundle_digest, compute_router_link_digest,
};
use crate::BundleError;

/// Method id recorded in export provenance.
pub const EXPORT_METHOD_ID: &str = "vouch.export_v0_5";

/// A successful export: the bundle plus its prefixed digest.
#[derive(Debug, Clone)]
pub struct Export {
    /// The assembled bundle.
    pub bundle: DecisionBundle,
    /// Prefixed canonical digest (same value as
    /// `bundle.integrity.canonical_digest`).
    pub digest: String,
}

/// Export a decision as a portable bundle.
///
/// # Errors
///
/// [`BundleError::DecisionNotFound`] when the decision is absent;
/// [`BundleError::ReplayInvalid`] when its event log does not replay.
pub fn export_decision(store: &DecisionStore, decision_id: &str) -> Result<Export, BundleError> {
    let decision = load_decision(store, decision_id)?;

    let bundle_decision = build_decision_header(&decision);
    let bundle_events = build_events(&decision)?;
    let template_snapshot = build_template_snapshot(&decision);
    let router_link = build_router_link(&decision)?;

    let digest = compute_bundle_digest(
        BUNDLE_VERSION,
        &bundle_decision,
        &bundle_events,
        &template_snapshot,
        &router_link,
    )?;

    let integrity = BundleIntegrity {
        alg: "sha256".into(),
        canonical_digest: format!("{DIGEST_PREFIX}{digest}"),
    };
    let provenance = build_provenance(decision_id, &digest);

    let bundle = DecisionBundle {
        bundle_version: BUNDLE_VERSION.into(),
        decision: bundle_decision,
        events: bundle_events,
        template_snapshot,
        router_link,
        integrity,
        provenance,
        meta: json!({"exported_at": Utc::now().to_rfc3339()}),
    };

    debug!(decision_id = %decision_id, digest = %digest, "decision exported");
    Ok(Export { digest: format!("{DIGEST_PREFIX}{digest}"), bundle })
}

pub(crate) fn load_decision(
    store: &DecisionStore,
    decision_id: &str,
) -> Result<Decision, BundleError> {
    use vouch_projection::LoadError;
    use vouch_store::StoreError;

    Decision::load(store, decision_id).map_err(|err| match err {
        LoadError::Store(StoreError::DecisionNotFound(id)) => BundleError::DecisionNotFound(id),
        LoadError::Store(other) => BundleError::Store(other),
        LoadError::Projection(err) => BundleError::ReplayInvalid(err.to_string()),
    })
}

fn build_decision_header(decision: &Decision) -> BundleDecision {
    let created_at = decision
        .events
        .first()
        .map(|e| e.ts.to_rfc3339())
        .unwrap_or_default();

    BundleDecision {
        decision_id: decision.decision_id.clone(),
        goal: decision.goal.clone(),
        mode: decision
            .requested_mode
            .map_or("dry_run", |m| m.as_str())
            .to_string(),
        created_at,
        status: decision.state.as_str().to_uppercase(),
    }
}

fn build_events(decision: &Decision) -> Result<Vec<BundleEvent>, BundleError> {
    let mut sorted: Vec<_> = decision.events.iter().collect();
    sorted.sort_by_key(|e| e.seq);

    let mut events = Vec::with_capacity(sorted.len());
    for event in sorted {
        events.push(BundleEvent {
            event_id: event.event_id(),
            decision_id: event.decision_id.clone(),
            seq: event.seq,
            event_type: event.event_type.as_str().to_string(),
            payload: event.payload.to_value()?,
            ts: event.ts.to_rfc3339(),
            actor: event.actor.clone(),
            digest: event.digest.clone(),
        });
    }
    Ok(events)
}

fn build_template_snapshot(decision: &Decision) -> BundleTemplateSnapshot {
    let Some(template) = &decision.template_ref else {
        return BundleTemplateSnapshot::absent();
    };
    BundleTemplateSnapshot {
        present: true,
        name: Some(template.name.clone()),
        digest: Some(format!("{DIGEST_PREFIX}{}", template.digest)),
        snapshot: (!template.snapshot.is_null()).then(|| template.snapshot.clone()),
        overrides: template
            .overrides_applied
            .as_object()
            .is_some_and(|m| !m.is_empty())
            .then(|| template.overrides_applied.clone()),
    }
}

fn build_router_link(decision: &Decision) -> Result<BundleRouterLink, BundleError> {
    let Some(exec) = decision.latest_execution() else {
        return Ok(BundleRouterLink::empty());
    };

    let link_digest = compute_router_link_digest(
        &decision.decision_id,
        exec.run_id.as_deref(),
        exec.request_digest.as_deref(),
        exec.response_digest.as_deref(),
    )?;

    Ok(BundleRouterLink {
        run_id: exec.run_id.clone(),
        adapter_id: Some(exec.adapter_id.clone()),
        router_request_digest: exec
            .request_digest
            .as_ref()
            .map(|d| format!("{DIGEST_PREFIX}{d}")),
        router_result_digest: exec
            .response_digest
            .as_ref()
            .map(|d| format!("{DIGEST_PREFIX}{d}")),
        control_router_link_digest: link_digest.map(|d| format!("{DIGEST_PREFIX}{d}")),
    })
}

fn build_provenance(decision_id: &str, bundle_digest: &str) -> BundleProvenance {
    // Deterministic: the same export always produces the same prov_id.
    let prov_seed = format!("{decision_id}:{bundle_digest}");
    let prov_id = format!("prov_{}", &sha256_hex(prov_seed.as_bytes())[..12]);

    BundleProvenance {
        records: vec![ProvenanceRecord {
            prov_id,
            method_id: EXPORT_METHOD_ID.into(),
            inputs: vec![format!("decision:{decision_id}")],
            outputs: vec![format!("bundle:{DIGEST_PREFIX}{bundle_digest}")],
        }],
    }
}
