// SPDX-License-Identifier: MIT OR Apache-2.0

//! The decision fold: `events → Decision`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use vouch_core::{Actor, EventPayload, Mode, Policy, PolicyError};
use vouch_store::{DecisionStore, StoreError, StoredEvent};

/// Lifecycle states of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionState {
    /// Created but no policy attached.
    Draft,
    /// Policy attached, awaiting approvals.
    PendingApproval,
    /// Has sufficient approvals.
    Approved,
    /// Execution in progress.
    Executing,
    /// Execution finished successfully.
    Completed,
    /// Execution failed.
    Failed,
}

impl DecisionState {
    /// Stable wire string (`"draft"`, `"pending_approval"`, ...).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DecisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One actor's approval, as accumulated by replay.
#[derive(Debug, Clone, PartialEq)]
pub struct Approval {
    /// Who approved.
    pub actor: Actor,
    /// When the approval was granted.
    pub granted_at: DateTime<Utc>,
    /// When the approval stops counting, if ever.
    pub expires_at: Option<DateTime<Utc>>,
    /// Free-form approval comment.
    pub comment: Option<String>,
    /// Whether the approval has been revoked.
    pub revoked: bool,
    /// When it was revoked.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Why it was revoked.
    pub revoke_reason: Option<String>,
}

impl Approval {
    /// Counts toward the threshold at `now`: not revoked and not expired.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// One execution attempt, as accumulated by replay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionRecord {
    /// Router adapter chosen for dispatch.
    pub adapter_id: String,
    /// Whether this run was a dry run.
    pub dry_run: bool,
    /// When execution was requested.
    pub requested_at: Option<DateTime<Utc>>,
    /// When the router accepted the request.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run finished (either way).
    pub completed_at: Option<DateTime<Utc>>,
    /// Router-assigned run id.
    pub run_id: Option<String>,
    /// Digest of the compiled router request.
    pub request_digest: Option<String>,
    /// Digest of the router's response.
    pub response_digest: Option<String>,
    /// Steps the router reports having executed.
    pub steps_executed: Option<u32>,
    /// Failure code, when the run failed.
    pub error_code: Option<String>,
    /// Failure message, when the run failed.
    pub error_message: Option<String>,
}

/// Reference to the template a decision's policy came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRef {
    /// Template name.
    pub name: String,
    /// Template content digest at decision creation.
    pub digest: String,
    /// Policy snapshot captured at decision creation.
    pub snapshot: Value,
    /// Which template fields the creator overrode.
    pub overrides_applied: Value,
}

/// Errors from replay.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// A `POLICY_ATTACHED` event carried an invalid policy.
    #[error("invalid policy in event log: {0}")]
    Policy(#[from] PolicyError),
}

/// Errors from loading a decision out of a store.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The store failed or the decision is absent.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The event log did not replay cleanly.
    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Decision state derived from event replay.
///
/// This is a read-only value produced from the store's event log, not a
/// source of truth. All mutation happens through event appends.
#[derive(Debug, Clone)]
pub struct Decision {
    /// The decision id.
    pub decision_id: String,
    /// Current lifecycle state.
    pub state: DecisionState,
    /// What the requester wants accomplished.
    pub goal: Option<String>,
    /// Optional pre-defined plan.
    pub plan: Option<String>,
    /// The mode the requester asked for.
    pub requested_mode: Option<Mode>,
    /// Governance labels.
    pub labels: Vec<String>,
    /// Attached policy, if any.
    pub policy: Option<Policy>,
    /// Template the policy came from, if any.
    pub template_ref: Option<TemplateRef>,
    /// Approvals keyed by actor id.
    pub approvals: BTreeMap<String, Approval>,
    /// Execution attempts in order.
    pub executions: Vec<ExecutionRecord>,
    /// The replayed events, for downstream renderers.
    pub events: Vec<StoredEvent>,
}

impl Decision {
    fn new(decision_id: impl Into<String>) -> Self {
        Self {
            decision_id: decision_id.into(),
            state: DecisionState::Draft,
            goal: None,
            plan: None,
            requested_mode: None,
            labels: Vec::new(),
            policy: None,
            template_ref: None,
            approvals: BTreeMap::new(),
            executions: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Replay an ordered event list into a decision.
    ///
    /// Replay is idempotent: the same events always produce the same
    /// decision.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] when an event carries content that
    /// violates a contract invariant (e.g. a zero-approval policy).
    pub fn replay(decision_id: &str, events: &[StoredEvent]) -> Result<Self, ProjectionError> {
        let mut decision = Self::new(decision_id);
        for event in events {
            decision.apply_event(event)?;
        }
        Ok(decision)
    }

    /// Load a decision from the store by replaying its events.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when the decision is absent or does not
    /// replay cleanly.
    pub fn load(store: &DecisionStore, decision_id: &str) -> Result<Self, LoadError> {
        let events = store.get_events(decision_id)?;
        Ok(Self::replay(decision_id, &events)?)
    }

    /// Apply one event. This is the state machine.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] on contract-violating event content.
    pub fn apply_event(&mut self, event: &StoredEvent) -> Result<(), ProjectionError> {
        self.events.push(event.clone());

        match &event.payload {
            EventPayload::DecisionCreated(p) => {
                self.goal = Some(p.goal.clone());
                self.plan = p.plan.clone();
                self.requested_mode = Some(p.requested_mode);
                self.labels = p.labels.clone();
                self.state = DecisionState::Draft;
            }

            EventPayload::PolicyAttached(p) => {
                self.policy = Some(Policy::try_from(p)?);
                if let Some(name) = &p.template_name {
                    self.template_ref = Some(TemplateRef {
                        name: name.clone(),
                        digest: p.template_digest.clone().unwrap_or_default(),
                        snapshot: p.template_snapshot.clone().unwrap_or(Value::Null),
                        overrides_applied: p
                            .overrides_applied
                            .clone()
                            .unwrap_or_else(|| json!({})),
                    });
                }
                self.state = DecisionState::PendingApproval;
            }

            EventPayload::ApprovalGranted(p) => {
                self.approvals.insert(
                    event.actor.id.clone(),
                    Approval {
                        actor: event.actor.clone(),
                        granted_at: event.ts,
                        expires_at: p.expires_at,
                        comment: p.comment.clone(),
                        revoked: false,
                        revoked_at: None,
                        revoke_reason: None,
                    },
                );
                self.recompute_approval_state(Utc::now());
            }

            EventPayload::ApprovalRevoked(p) => {
                if let Some(approval) = self.approvals.get_mut(&event.actor.id) {
                    approval.revoked = true;
                    approval.revoked_at = Some(event.ts);
                    approval.revoke_reason = Some(p.reason.clone());
                }
                self.recompute_approval_state(Utc::now());
            }

            EventPayload::ExecutionRequested(p) => {
                self.executions.push(ExecutionRecord {
                    adapter_id: p.adapter_id.clone(),
                    dry_run: p.dry_run,
                    requested_at: Some(event.ts),
                    ..ExecutionRecord::default()
                });
            }

            EventPayload::ExecutionStarted(p) => {
                let ts = event.ts;
                if let Some(exec) = self.executions.last_mut() {
                    exec.started_at = Some(ts);
                    exec.request_digest = Some(p.router_request_digest.clone());
                }
                self.state = DecisionState::Executing;
            }

            EventPayload::ExecutionCompleted(p) => {
                let ts = event.ts;
                if let Some(exec) = self.executions.last_mut() {
                    exec.completed_at = Some(ts);
                    exec.run_id = Some(p.run_id.clone());
                    exec.response_digest = Some(p.response_digest.clone());
                    exec.steps_executed = p.steps_executed;
                }
                self.state = DecisionState::Completed;
            }

            EventPayload::ExecutionFailed(p) => {
                let ts = event.ts;
                if let Some(exec) = self.executions.last_mut() {
                    exec.completed_at = Some(ts);
                    exec.error_code = Some(p.error_code.clone());
                    exec.error_message = Some(p.error_message.clone());
                    exec.run_id = p.run_id.clone();
                }
                self.state = DecisionState::Failed;
            }

            // Template events live in the template log; they never occur
            // in decision replay.
            EventPayload::TemplateCreated(_) => {}
        }

        Ok(())
    }

    fn recompute_approval_state(&mut self, now: DateTime<Utc>) {
        if matches!(
            self.state,
            DecisionState::PendingApproval | DecisionState::Approved
        ) {
            self.state = if self.is_approved_at(now) {
                DecisionState::Approved
            } else {
                DecisionState::PendingApproval
            };
        }
    }

    /// Count of approvals that are neither revoked nor expired at `now`.
    #[must_use]
    pub fn active_approval_count_at(&self, now: DateTime<Utc>) -> u32 {
        self.approvals
            .values()
            .filter(|a| a.is_active_at(now))
            .count() as u32
    }

    /// [`Self::active_approval_count_at`] evaluated at the wall clock.
    #[must_use]
    pub fn active_approval_count(&self) -> u32 {
        self.active_approval_count_at(Utc::now())
    }

    /// Whether the active approval count meets the policy threshold at
    /// `now`. Always `false` without a policy.
    #[must_use]
    pub fn is_approved_at(&self, now: DateTime<Utc>) -> bool {
        match &self.policy {
            Some(policy) => self.active_approval_count_at(now) >= policy.min_approvals,
            None => false,
        }
    }

    /// [`Self::is_approved_at`] evaluated at the wall clock.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.is_approved_at(Utc::now())
    }

    /// Most recent execution attempt, if any.
    #[must_use]
    pub fn latest_execution(&self) -> Option<&ExecutionRecord> {
        self.executions.last()
    }

    /// Run id from the most recent execution, if any.
    #[must_use]
    pub fn latest_run_id(&self) -> Option<&str> {
        self.latest_execution().and_then(|e| e.run_id.as_deref())
    }

    /// Serializable summary view of the projection.
    #[must_use]
    pub fn summary(&self) -> Value {
        let now = Utc::now();
        let mut out = json!({
            "decision_id": self.decision_id,
            "state": self.state.as_str(),
            "goal": self.goal,
            "plan": self.plan,
            "requested_mode": self.requested_mode,
            "labels": self.labels,
            "policy": self.policy,
            "active_approvals": self.active_approval_count_at(now),
            "total_approvals": self.approvals.len(),
            "is_approved": self.is_approved_at(now),
            "executions": self.executions.iter().map(|e| json!({
                "adapter_id": e.adapter_id,
                "dry_run": e.dry_run,
                "requested_at": e.requested_at.map(|t| t.to_rfc3339()),
                "started_at": e.started_at.map(|t| t.to_rfc3339()),
                "completed_at": e.completed_at.map(|t| t.to_rfc3339()),
                "run_id": e.run_id,
                "steps_executed": e.steps_executed,
                "error_code": e.error_code,
                "error_message": e.error_message,
            })).collect::<Vec<_>>(),
            "event_count": self.events.len(),
        });
        if let Some(template) = &self.template_ref {
            out["template"] = json!({
                "name": template.name,
                "digest": template.digest,
                "overrides_applied": template.overrides_applied,
            });
        }
        out
    }
}
