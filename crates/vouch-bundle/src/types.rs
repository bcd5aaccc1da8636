// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bundle wire types and digest computation.
//!
//! The canonical digest covers `{bundle_version, decision, events,
//! template_snapshot, router_link}` — integrity, provenance, and meta are
//! deliberately outside it, so re-exporting at a different time or
//! attaching different provenance never changes the digest.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use vouch_core::{Actor, CanonicalError, content_digest};

/// Bundle format version — update when the format changes.
pub const BUNDLE_VERSION: &str = "0.5";

fn default_mode() -> String {
    "dry_run".to_string()
}

/// Decision header in bundle format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleDecision {
    /// Decision id.
    pub decision_id: String,
    /// Goal, when the decision has one.
    #[serde(default)]
    pub goal: Option<String>,
    /// Requested mode (falls back to `"dry_run"`).
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Creation timestamp (first event's ts).
    pub created_at: String,
    /// Uppercased lifecycle state at export time.
    pub status: String,
}

/// Event in bundle format. The payload keeps its public dict shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEvent {
    /// Deterministic event id.
    pub event_id: String,
    /// Owning decision id.
    pub decision_id: String,
    /// Log position.
    pub seq: i64,
    /// Event type wire string.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload dict.
    #[serde(default)]
    pub payload: Value,
    /// Timestamp wire string.
    pub ts: String,
    /// Acting identity.
    pub actor: Actor,
    /// Event content digest.
    #[serde(default)]
    pub digest: String,
}

/// Template snapshot in bundle format.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BundleTemplateSnapshot {
    /// Whether the decision carried a template reference.
    pub present: bool,
    /// Template name.
    pub name: Option<String>,
    /// Prefixed template digest.
    pub digest: Option<String>,
    /// Policy snapshot captured at decision creation.
    pub snapshot: Option<Value>,
    /// Overrides the creator applied on top of the template.
    pub overrides: Option<Value>,
}

impl BundleTemplateSnapshot {
    /// An absent snapshot.
    #[must_use]
    pub fn absent() -> Self {
        Self::default()
    }

    /// Dict form: `{"present": false}` alone when absent.
    #[must_use]
    pub fn to_value(&self) -> Value {
        if !self.present {
            return json!({"present": false});
        }
        json!({
            "present": true,
            "name": self.name,
            "digest": self.digest,
            "snapshot": self.snapshot,
            "overrides": self.overrides,
        })
    }

    /// Parse from dict form.
    #[must_use]
    pub fn from_value(value: Option<&Value>) -> Self {
        let Some(obj) = value.and_then(Value::as_object) else {
            return Self::absent();
        };
        if !obj.get("present").and_then(Value::as_bool).unwrap_or(false) {
            return Self::absent();
        }
        Self {
            present: true,
            name: obj.get("name").and_then(Value::as_str).map(str::to_string),
            digest: obj.get("digest").and_then(Value::as_str).map(str::to_string),
            snapshot: obj.get("snapshot").filter(|v| !v.is_null()).cloned(),
            overrides: obj.get("overrides").filter(|v| !v.is_null()).cloned(),
        }
    }
}

/// Router link in bundle format. All fields optional; absent fields are
/// omitted from the dict form.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BundleRouterLink {
    /// Router-assigned run id.
    pub run_id: Option<String>,
    /// Adapter used for dispatch.
    pub adapter_id: Option<String>,
    /// Prefixed digest of the compiled router request.
    pub router_request_digest: Option<String>,
    /// Prefixed digest of the router result.
    pub router_result_digest: Option<String>,
    /// Prefixed portable link digest — "this decision authorized that
    /// run".
    pub control_router_link_digest: Option<String>,
}

impl BundleRouterLink {
    /// An empty link (no execution).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Dict form with absent fields omitted.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(v) = &self.run_id {
            map.insert("run_id".into(), Value::from(v.clone()));
        }
        if let Some(v) = &self.adapter_id {
            map.insert("adapter_id".into(), Value::from(v.clone()));
        }
        if let Some(v) = &self.router_request_digest {
            map.insert("router_request_digest".into(), Value::from(v.clone()));
        }
        if let Some(v) = &self.router_result_digest {
            map.insert("router_result_digest".into(), Value::from(v.clone()));
        }
        if let Some(v) = &self.control_router_link_digest {
            map.insert("control_router_link_digest".into(), Value::from(v.clone()));
        }
        Value::Object(map)
    }

    /// Parse from dict form.
    #[must_use]
    pub fn from_value(value: Option<&Value>) -> Self {
        let Some(obj) = value.and_then(Value::as_object) else {
            return Self::empty();
        };
        let get = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            run_id: get("run_id"),
            adapter_id: get("adapter_id"),
            router_request_digest: get("router_request_digest"),
            router_result_digest: get("router_result_digest"),
            control_router_link_digest: get("control_router_link_digest"),
        }
    }
}

/// Integrity section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleIntegrity {
    /// Digest algorithm (always `"sha256"`).
    pub alg: String,
    /// Prefixed canonical digest.
    pub canonical_digest: String,
}

/// A single provenance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    /// Deterministic provenance id.
    pub prov_id: String,
    /// What produced this artifact.
    pub method_id: String,
    /// Input artifact references.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Output artifact references.
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// Provenance section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BundleProvenance {
    /// Records in production order.
    #[serde(default)]
    pub records: Vec<ProvenanceRecord>,
}

/// A complete decision bundle.
///
/// `meta` holds convenience metadata (e.g. `exported_at`) that is NOT
/// part of the canonical digest input.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionBundle {
    /// Bundle format version.
    pub bundle_version: String,
    /// Decision header.
    pub decision: BundleDecision,
    /// Events sorted by seq.
    pub events: Vec<BundleEvent>,
    /// Template snapshot.
    pub template_snapshot: BundleTemplateSnapshot,
    /// Router link.
    pub router_link: BundleRouterLink,
    /// Integrity section.
    pub integrity: BundleIntegrity,
    /// Provenance section.
    pub provenance: BundleProvenance,
    /// Convenience metadata, outside the digest.
    pub meta: Value,
}

impl DecisionBundle {
    /// Full dict form. `meta` is included only when non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if a section fails to serialize.
    pub fn to_value(&self) -> Result<Value, CanonicalError> {
        let mut map = Map::new();
        map.insert("bundle_version".into(), Value::from(self.bundle_version.clone()));
        map.insert("decision".into(), serde_json::to_value(&self.decision)?);
        map.insert("events".into(), serde_json::to_value(&self.events)?);
        map.insert("template_snapshot".into(), self.template_snapshot.to_value());
        map.insert("router_link".into(), self.router_link.to_value());
        map.insert("integrity".into(), serde_json::to_value(&self.integrity)?);
        map.insert("provenance".into(), serde_json::to_value(&self.provenance)?);
        if self.meta.as_object().is_some_and(|m| !m.is_empty()) {
            map.insert("meta".into(), self.meta.clone());
        }
        Ok(Value::Object(map))
    }

    /// Canonical JSON of the full dict form.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if serialization fails.
    pub fn to_canonical_json(&self) -> Result<String, CanonicalError> {
        vouch_core::canonical_json(&self.to_value()?)
    }

    /// Parse a bundle from its dict form. Schema validation is the
    /// caller's concern ([`validate_bundle_schema`]).
    ///
    /// # Errors
    ///
    /// Returns the JSON error when required sections have the wrong
    /// shape.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        let obj = value.as_object().cloned().unwrap_or_default();
        Ok(Self {
            bundle_version: obj
                .get("bundle_version")
                .and_then(Value::as_str)
                .unwrap_or(BUNDLE_VERSION)
                .to_string(),
            decision: serde_json::from_value(
                obj.get("decision").cloned().unwrap_or(Value::Null),
            )?,
            events: serde_json::from_value(
                obj.get("events").cloned().unwrap_or_else(|| json!([])),
            )?,
            template_snapshot: BundleTemplateSnapshot::from_value(obj.get("template_snapshot")),
            router_link: BundleRouterLink::from_value(obj.get("router_link")),
            integrity: serde_json::from_value(
                obj.get("integrity").cloned().unwrap_or(Value::Null),
            )?,
            provenance: serde_json::from_value(
                obj.get("provenance").cloned().unwrap_or_else(|| json!({"records": []})),
            )?,
            meta: obj.get("meta").cloned().unwrap_or_else(|| json!({})),
        })
    }
}

/// Build the canonical payload for digest computation. Events must
/// already be sorted by seq.
///
/// # Errors
///
/// Returns [`CanonicalError`] if a section fails to serialize.
pub fn compute_canonical_payload(
    bundle_version: &str,
    decision: &BundleDecision,
    events: &[BundleEvent],
    template_snapshot: &BundleTemplateSnapshot,
    router_link: &BundleRouterLink,
) -> Result<Value, CanonicalError> {
    Ok(json!({
        "bundle_version": bundle_version,
        "decision": serde_json::to_value(decision)?,
        "events": serde_json::to_value(events)?,
        "template_snapshot": template_snapshot.to_value(),
        "router_link": router_link.to_value(),
    }))
}

/// Compute the canonical bundle digest (raw hex).
///
/// # Errors
///
/// Returns [`CanonicalError`] if serialization fails.
pub fn compute_bundle_digest(
    bundle_version: &str,
    decision: &BundleDecision,
    events: &[BundleEvent],
    template_snapshot: &BundleTemplateSnapshot,
    router_link: &BundleRouterLink,
) -> Result<String, CanonicalError> {
    content_digest(&compute_canonical_payload(
        bundle_version,
        decision,
        events,
        template_snapshot,
        router_link,
    )?)
}

/// Compute the portable control↔router link digest (raw hex).
///
/// Proves "this decision authorized that run" without depending on
/// either side's internal representation. `None` when there was no run.
///
/// # Errors
///
/// Returns [`CanonicalError`] if serialization fails.
pub fn compute_router_link_digest(
    decision_id: &str,
    run_id: Option<&str>,
    router_request_digest: Option<&str>,
    router_result_digest: Option<&str>,
) -> Result<Option<String>, CanonicalError> {
    let Some(run_id) = run_id else {
        return Ok(None);
    };
    let digest = content_digest(&json!({
        "decision_id": decision_id,
        "run_id": run_id,
        "router_request_digest": router_request_digest,
        "router_result_digest": router_result_digest,
    }))?;
    Ok(Some(digest))
}

/// Validate bundle schema structure. Returns the list of problems
/// (empty when valid).
#[must_use]
pub fn validate_bundle_schema(data: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(obj) = data.as_object() else {
        return vec!["Bundle must be an object".into()];
    };

    if !obj.contains_key("bundle_version") {
        errors.push("Missing required field: bundle_version".into());
    }

    match obj.get("decision") {
        None => errors.push("Missing required field: decision".into()),
        Some(decision) => match decision.as_object() {
            None => errors.push("Field 'decision' must be an object".into()),
            Some(decision) => {
                for field in ["decision_id", "created_at", "status"] {
                    if !decision.contains_key(field) {
                        errors.push(format!("Missing required field: decision.{field}"));
                    }
                }
            }
        },
    }

    match obj.get("events") {
        None => errors.push("Missing required field: events".into()),
        Some(events) => match events.as_array() {
            None => errors.push("Field 'events' must be an array".into()),
            Some(events) => {
                for (i, event) in events.iter().enumerate() {
                    let Some(event) = event.as_object() else {
                        errors.push(format!("Event at index {i} must be an object"));
                        continue;
                    };
                    for field in ["event_id", "seq", "type", "ts"] {
                        if !event.contains_key(field) {
                            errors.push(format!("Missing required field: events[{i}].{field}"));
                        }
                    }
                }
            }
        },
    }

    match obj.get("integrity") {
        None => errors.push("Missing required field: integrity".into()),
        Some(integrity) => match integrity.as_object() {
            None => errors.push("Field 'integrity' must be an object".into()),
            Some(integrity) => {
                if !integrity.contains_key("canonical_digest") {
                    errors.push("Missing required field: integrity.canonical_digest".into());
                }
            }
        },
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_snapshot_serializes_minimal() {
        assert_eq!(
            BundleTemplateSnapshot::absent().to_value(),
            json!({"present": false})
        );
    }

    #[test]
    fn router_link_omits_absent_fields() {
        let link = BundleRouterLink { run_id: Some("r1".into()), ..BundleRouterLink::empty() };
        let v = link.to_value();
        assert_eq!(v, json!({"run_id": "r1"}));
        assert_eq!(BundleRouterLink::empty().to_value(), json!({}));
    }

    #[test]
    fn link_digest_absent_without_run() {
        assert_eq!(
            compute_router_link_digest("d1", None, None, None).unwrap(),
            None
        );
        let digest = compute_router_link_digest("d1", Some("r1"), Some("req"), Some("res"))
            .unwrap()
            .unwrap();
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn schema_validation_reports_all_problems() {
        let errors = validate_bundle_schema(&json!({"events": "nope"}));
        assert!(errors.iter().any(|e| e.contains("bundle_version")));
        assert!(errors.iter().any(|e| e.contains("decision")));
        assert!(errors.iter().any(|e| e.contains("events")));
        assert!(errors.iter().any(|e| e.contains("integrity")));
    }

    #[test]
    fn schema_validation_accepts_minimal_bundle() {
        let bundle = json!({
            "bundle_version": BUNDLE_VERSION,
            "decision": {"decision_id": "d1", "created_at": "t", "status": "DRAFT"},
            "events": [],
            "integrity": {"alg": "sha256", "canonical_digest": "sha256:abc"},
        });
        assert!(validate_bundle_schema(&bundle).is_empty());
    }
}
