// SPDX-License-Identifier: MIT OR Apache-2.0

//! The decision event vocabulary.
//!
//! Events are the only way state enters the system. Each event type has a
//! dedicated payload struct; on disk and on the wire the payload keeps its
//! public dict shape, in code you pattern match on [`EventPayload`].
//!
//! An event's digest is a pure function of `(event_type, payload)` — two
//! logically identical events hash identically regardless of when or where
//! they were appended.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::canonical::{CanonicalError, content_digest};

/// Who performed an action: a human operator or an automated system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// A human operator.
    Human,
    /// An automated system component.
    System,
}

/// An acting identity attached to every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Actor {
    /// Whether the actor is a human or a system.
    #[serde(rename = "type")]
    pub kind: ActorType,
    /// Stable identifier (user name, service name).
    pub id: String,
}

impl Actor {
    /// Convenience constructor for a human actor.
    #[must_use]
    pub fn human(id: impl Into<String>) -> Self {
        Self { kind: ActorType::Human, id: id.into() }
    }

    /// Convenience constructor for a system actor.
    #[must_use]
    pub fn system(id: impl Into<String>) -> Self {
        Self { kind: ActorType::System, id: id.into() }
    }
}

/// Requested or permitted execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Simulate only; the router must not mutate anything.
    DryRun,
    /// Perform the real operation.
    Apply,
}

impl Mode {
    /// Stable wire string (`"dry_run"` / `"apply"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DryRun => "dry_run",
            Self::Apply => "apply",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminator for decision and template events.
///
/// Serialized as stable `SCREAMING_SNAKE_CASE` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A decision came into existence.
    DecisionCreated,
    /// A governance policy was attached to the decision.
    PolicyAttached,
    /// An actor granted approval.
    ApprovalGranted,
    /// An actor revoked a previously granted approval.
    ApprovalRevoked,
    /// Execution was requested through a router adapter.
    ExecutionRequested,
    /// The router accepted the request and started executing.
    ExecutionStarted,
    /// The router finished successfully.
    ExecutionCompleted,
    /// The router failed.
    ExecutionFailed,
    /// A policy template came into existence.
    TemplateCreated,
}

impl EventType {
    /// Stable wire string (e.g. `"DECISION_CREATED"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecisionCreated => "DECISION_CREATED",
            Self::PolicyAttached => "POLICY_ATTACHED",
            Self::ApprovalGranted => "APPROVAL_GRANTED",
            Self::ApprovalRevoked => "APPROVAL_REVOKED",
            Self::ExecutionRequested => "EXECUTION_REQUESTED",
            Self::ExecutionStarted => "EXECUTION_STARTED",
            Self::ExecutionCompleted => "EXECUTION_COMPLETED",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::TemplateCreated => "TEMPLATE_CREATED",
        }
    }

    /// Parse a wire string back into an [`EventType`].
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DECISION_CREATED" => Some(Self::DecisionCreated),
            "POLICY_ATTACHED" => Some(Self::PolicyAttached),
            "APPROVAL_GRANTED" => Some(Self::ApprovalGranted),
            "APPROVAL_REVOKED" => Some(Self::ApprovalRevoked),
            "EXECUTION_REQUESTED" => Some(Self::ExecutionRequested),
            "EXECUTION_STARTED" => Some(Self::ExecutionStarted),
            "EXECUTION_COMPLETED" => Some(Self::ExecutionCompleted),
            "EXECUTION_FAILED" => Some(Self::ExecutionFailed),
            "TEMPLATE_CREATED" => Some(Self::TemplateCreated),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of [`EventType::DecisionCreated`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DecisionCreatedPayload {
    /// What the requester wants accomplished.
    pub goal: String,
    /// Optional pre-defined plan forwarded to the router.
    pub plan: Option<String>,
    /// The mode the requester asked for.
    pub requested_mode: Mode,
    /// Governance labels.
    pub labels: Vec<String>,
}

/// Payload of [`EventType::PolicyAttached`].
///
/// Template fields are present only when the policy was derived from a
/// template; `overrides_applied` records which template fields the
/// creator overrode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PolicyAttachedPayload {
    /// Minimum distinct active approvals required before execution.
    pub min_approvals: u32,
    /// Modes execution may use.
    pub allowed_modes: Vec<Mode>,
    /// Capabilities the router adapter must advertise.
    pub require_adapter_capabilities: Vec<String>,
    /// Cap on router steps, if any.
    pub max_steps: Option<u32>,
    /// Governance labels.
    pub labels: Vec<String>,
    /// Name of the source template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    /// Content digest of the source template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_digest: Option<String>,
    /// Snapshot of the template's policy values at decision creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_snapshot: Option<Value>,
    /// Which template fields the creator overrode, and with what.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides_applied: Option<Value>,
}

/// Payload of [`EventType::ApprovalGranted`]. Keyed by the event's actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ApprovalGrantedPayload {
    /// When this approval stops counting, if ever.
    pub expires_at: Option<DateTime<Utc>>,
    /// Free-form approval comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Payload of [`EventType::ApprovalRevoked`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ApprovalRevokedPayload {
    /// Why the approval was withdrawn.
    pub reason: String,
}

/// Payload of [`EventType::ExecutionRequested`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionRequestedPayload {
    /// Router adapter chosen for dispatch.
    pub adapter_id: String,
    /// Whether this run is a dry run.
    pub dry_run: bool,
}

/// Payload of [`EventType::ExecutionStarted`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionStartedPayload {
    /// Content digest of the compiled router request.
    pub router_request_digest: String,
}

/// Payload of [`EventType::ExecutionCompleted`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionCompletedPayload {
    /// Router-assigned run identifier.
    pub run_id: String,
    /// Content digest of the router's response.
    pub response_digest: String,
    /// Steps the router reports having executed.
    pub steps_executed: Option<u32>,
}

/// Payload of [`EventType::ExecutionFailed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionFailedPayload {
    /// Stable failure code (e.g. `"ROUTER_ERROR"`).
    pub error_code: String,
    /// Human-readable failure description.
    pub error_message: String,
    /// Run id, when the router got far enough to assign one.
    pub run_id: Option<String>,
}

/// Payload of [`EventType::TemplateCreated`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateCreatedPayload {
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
}

/// Tagged event payload — one variant per [`EventType`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// See [`DecisionCreatedPayload`].
    DecisionCreated(DecisionCreatedPayload),
    /// See [`PolicyAttachedPayload`].
    PolicyAttached(PolicyAttachedPayload),
    /// See [`ApprovalGrantedPayload`].
    ApprovalGranted(ApprovalGrantedPayload),
    /// See [`ApprovalRevokedPayload`].
    ApprovalRevoked(ApprovalRevokedPayload),
    /// See [`ExecutionRequestedPayload`].
    ExecutionRequested(ExecutionRequestedPayload),
    /// See [`ExecutionStartedPayload`].
    ExecutionStarted(ExecutionStartedPayload),
    /// See [`ExecutionCompletedPayload`].
    ExecutionCompleted(ExecutionCompletedPayload),
    /// See [`ExecutionFailedPayload`].
    ExecutionFailed(ExecutionFailedPayload),
    /// See [`TemplateCreatedPayload`].
    TemplateCreated(TemplateCreatedPayload),
}

impl EventPayload {
    /// The event type this payload belongs to.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::DecisionCreated(_) => EventType::DecisionCreated,
            Self::PolicyAttached(_) => EventType::PolicyAttached,
            Self::ApprovalGranted(_) => EventType::ApprovalGranted,
            Self::ApprovalRevoked(_) => EventType::ApprovalRevoked,
            Self::ExecutionRequested(_) => EventType::ExecutionRequested,
            Self::ExecutionStarted(_) => EventType::ExecutionStarted,
            Self::ExecutionCompleted(_) => EventType::ExecutionCompleted,
            Self::ExecutionFailed(_) => EventType::ExecutionFailed,
            Self::TemplateCreated(_) => EventType::TemplateCreated,
        }
    }

    /// Serialize the payload to its public dict shape.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError::Json`] if serialization fails.
    pub fn to_value(&self) -> Result<Value, CanonicalError> {
        let v = match self {
            Self::DecisionCreated(p) => serde_json::to_value(p),
            Self::PolicyAttached(p) => serde_json::to_value(p),
            Self::ApprovalGranted(p) => serde_json::to_value(p),
            Self::ApprovalRevoked(p) => serde_json::to_value(p),
            Self::ExecutionRequested(p) => serde_json::to_value(p),
            Self::ExecutionStarted(p) => serde_json::to_value(p),
            Self::ExecutionCompleted(p) => serde_json::to_value(p),
            Self::ExecutionFailed(p) => serde_json::to_value(p),
            Self::TemplateCreated(p) => serde_json::to_value(p),
        }?;
        Ok(v)
    }

    /// Reconstruct a typed payload from its stored dict shape.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error when the shape does not match the
    /// event type.
    pub fn from_value(event_type: EventType, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match event_type {
            EventType::DecisionCreated => Self::DecisionCreated(serde_json::from_value(value)?),
            EventType::PolicyAttached => Self::PolicyAttached(serde_json::from_value(value)?),
            EventType::ApprovalGranted => Self::ApprovalGranted(serde_json::from_value(value)?),
            EventType::ApprovalRevoked => Self::ApprovalRevoked(serde_json::from_value(value)?),
            EventType::ExecutionRequested => {
                Self::ExecutionRequested(serde_json::from_value(value)?)
            }
            EventType::ExecutionStarted => Self::ExecutionStarted(serde_json::from_value(value)?),
            EventType::ExecutionCompleted => {
                Self::ExecutionCompleted(serde_json::from_value(value)?)
            }
            EventType::ExecutionFailed => Self::ExecutionFailed(serde_json::from_value(value)?),
            EventType::TemplateCreated => Self::TemplateCreated(serde_json::from_value(value)?),
        })
    }

    /// Compute the event content digest for this payload.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError::Json`] if serialization fails.
    pub fn digest(&self) -> Result<String, CanonicalError> {
        event_digest(self.event_type(), &self.to_value()?)
    }
}

/// Digest of event content: SHA-256 over canonical
/// `{"event_type": <type>, "payload": <payload>}`.
///
/// This is deliberately independent of sequence number, timestamp, and
/// actor, so logically identical events hash identically.
///
/// # Errors
///
/// Returns [`CanonicalError::Json`] if serialization fails.
pub fn event_digest(event_type: EventType, payload: &Value) -> Result<String, CanonicalError> {
    content_digest(&serde_json::json!({
        "event_type": event_type.as_str(),
        "payload": payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_strings_are_stable() {
        assert_eq!(EventType::DecisionCreated.as_str(), "DECISION_CREATED");
        assert_eq!(EventType::parse("APPROVAL_REVOKED"), Some(EventType::ApprovalRevoked));
        assert_eq!(EventType::parse("NOT_A_TYPE"), None);
    }

    #[test]
    fn actor_serializes_with_type_key() {
        let v = serde_json::to_value(Actor::human("alice")).unwrap();
        assert_eq!(v, json!({"type": "human", "id": "alice"}));
    }

    #[test]
    fn digest_is_pure_function_of_type_and_payload() {
        let a = EventPayload::DecisionCreated(DecisionCreatedPayload {
            goal: "rotate keys".into(),
            plan: None,
            requested_mode: Mode::Apply,
            labels: vec!["prod".into()],
        });
        let b = a.clone();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[test]
    fn digest_changes_with_payload() {
        let a = EventPayload::ApprovalRevoked(ApprovalRevokedPayload { reason: "oops".into() });
        let b = EventPayload::ApprovalRevoked(ApprovalRevokedPayload { reason: "nope".into() });
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[test]
    fn payload_roundtrips_through_dict_shape() {
        let p = EventPayload::PolicyAttached(PolicyAttachedPayload {
            min_approvals: 2,
            allowed_modes: vec![Mode::DryRun, Mode::Apply],
            require_adapter_capabilities: vec!["timeout".into()],
            max_steps: Some(10),
            labels: vec![],
            template_name: None,
            template_digest: None,
            template_snapshot: None,
            overrides_applied: None,
        });
        let v = p.to_value().unwrap();
        assert!(v.get("template_name").is_none());
        let back = EventPayload::from_value(EventType::PolicyAttached, v).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn approval_payload_keeps_null_expiry() {
        let p = ApprovalGrantedPayload { expires_at: None, comment: None };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v, json!({"expires_at": null}));
    }

    #[test]
    fn mismatched_shape_fails_to_parse() {
        let err = EventPayload::from_value(
            EventType::ExecutionStarted,
            json!({"unexpected": true}),
        );
        assert!(err.is_err());
    }
}
