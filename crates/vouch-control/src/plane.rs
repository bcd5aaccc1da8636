// SPDX-License-Identifier: MIT OR Apache-2.0

//! The control plane command surface.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use vouch_core::{
    Actor, ApprovalGrantedPayload, ApprovalRevokedPayload, DecisionCreatedPayload, EventPayload,
    ExecutionCompletedPayload, ExecutionFailedPayload, ExecutionRequestedPayload,
    ExecutionStartedPayload, Mode, PolicyAttachedPayload, content_digest,
    validate_execution_request,
};
use vouch_projection::{
    Decision, DecisionState, Lifecycle, compute_lifecycle, DEFAULT_TIMELINE_LIMIT,
};
use vouch_store::{DecisionStore, Template, TemplateStore};

use crate::router::{Router, RouterRunRequest};
use crate::ControlError;

/// Actor recorded on system-emitted execution events.
const SYSTEM_ACTOR: &str = "vouch-control";

/// Parameters for [`ControlPlane::request`].
///
/// When `template_name` is set, the template supplies policy defaults
/// and any explicit field here is recorded as an override. Without a
/// template, absent fields fall back to conservative defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestSpec {
    /// What should be accomplished.
    pub goal: String,
    /// Requested execution mode. Defaults to dry-run.
    pub mode: Option<Mode>,
    /// Optional pre-defined plan.
    pub plan: Option<String>,
    /// Template to draw policy defaults from.
    pub template_name: Option<String>,
    /// Minimum approvers (override when templated).
    pub min_approvals: Option<u32>,
    /// Allowed modes (override when templated).
    pub allowed_modes: Option<Vec<Mode>>,
    /// Required adapter capabilities (override when templated).
    pub require_adapter_capabilities: Option<Vec<String>>,
    /// Step cap (override when templated).
    pub max_steps: Option<u32>,
    /// Governance labels (override when templated; replaces, does not
    /// merge).
    pub labels: Option<Vec<String>>,
}

/// Outcome of [`ControlPlane::request`].
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// The new decision id.
    pub request_id: String,
    /// State after policy attachment.
    pub state: DecisionState,
    /// Effective approval threshold.
    pub min_approvals: u32,
    /// Template used, if any.
    pub template_name: Option<String>,
    /// Digest of the template used, if any.
    pub template_digest: Option<String>,
    /// Overrides recorded on top of the template, if any.
    pub overrides_applied: Option<Value>,
}

/// Outcome of [`ControlPlane::approve`] and
/// [`ControlPlane::revoke_approval`].
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    /// The decision id.
    pub request_id: String,
    /// State after the event.
    pub state: DecisionState,
    /// Active approvals after the event.
    pub current_approvals: u32,
    /// Required approvals.
    pub required_approvals: u32,
    /// Whether the threshold is met.
    pub is_approved: bool,
}

/// Outcome of [`ControlPlane::execute`].
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// The decision id.
    pub request_id: String,
    /// Router-assigned run id.
    pub run_id: String,
    /// Mode the run used.
    pub mode: Mode,
    /// Steps the router reports having executed.
    pub steps_executed: u32,
    /// Digest of the compiled router request.
    pub request_digest: String,
    /// Digest of the router response.
    pub response_digest: String,
}

/// Status view: the decision summary plus its lifecycle analysis.
#[derive(Debug, Clone)]
pub struct StatusView {
    /// Serialized projection summary.
    pub decision: Value,
    /// Lifecycle analysis.
    pub lifecycle: Lifecycle,
}

/// The command layer over a decision store.
#[derive(Debug, Clone)]
pub struct ControlPlane {
    store: DecisionStore,
}

impl ControlPlane {
    /// Build a control plane over an existing store.
    #[must_use]
    pub fn new(store: DecisionStore) -> Self {
        Self { store }
    }

    /// The underlying decision store.
    #[must_use]
    pub fn store(&self) -> &DecisionStore {
        &self.store
    }

    /// The template store sharing this plane's database.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Store`] when the template schema cannot
    /// be created.
    pub fn templates(&self) -> Result<TemplateStore, ControlError> {
        Ok(self.store.template_store()?)
    }

    /// Create an execution request: a decision with a policy attached.
    ///
    /// Emits `DECISION_CREATED` followed by `POLICY_ATTACHED`. With a
    /// template, the template's values are the defaults and explicit
    /// spec fields are recorded in `overrides_applied`.
    ///
    /// # Errors
    ///
    /// [`ControlError::TemplateNotFound`], [`ControlError::ModeNotAllowed`],
    /// or store/policy failures.
    pub fn request(&self, spec: RequestSpec, actor: Actor) -> Result<RequestOutcome, ControlError> {
        let mode = spec.mode.unwrap_or(Mode::DryRun);

        let mut template: Option<Template> = None;
        let mut template_snapshot: Option<Value> = None;
        let mut overrides_applied = serde_json::Map::new();

        let (min_approvals, allowed_modes, require_caps, max_steps, labels) =
            if let Some(name) = &spec.template_name {
                let found = self
                    .templates()?
                    .get_template(name)?
                    .ok_or_else(|| ControlError::TemplateNotFound(name.clone()))?;
                template_snapshot = Some(found.to_snapshot());

                let mut min_approvals = found.min_approvals;
                let mut allowed_modes = found.allowed_modes.clone();
                let mut require_caps = found.require_adapter_capabilities.clone();
                let mut max_steps = found.max_steps;
                let mut labels = found.labels.clone();

                if let Some(v) = spec.min_approvals {
                    overrides_applied.insert("min_approvals".into(), v.into());
                    min_approvals = v;
                }
                if let Some(v) = &spec.allowed_modes {
                    overrides_applied
                        .insert("allowed_modes".into(), serde_json::to_value(v).map_err(vouch_core::CanonicalError::from)?);
                    allowed_modes = v.clone();
                }
                if let Some(v) = &spec.require_adapter_capabilities {
                    overrides_applied
                        .insert("require_adapter_capabilities".into(), v.clone().into());
                    require_caps = v.clone();
                }
                if let Some(v) = spec.max_steps {
                    overrides_applied.insert("max_steps".into(), v.into());
                    max_steps = Some(v);
                }
                if let Some(v) = &spec.labels {
                    overrides_applied.insert("labels".into(), v.clone().into());
                    labels = v.clone();
                }

                template = Some(found);
                (min_approvals, allowed_modes, require_caps, max_steps, labels)
            } else {
                let allowed_modes = spec.allowed_modes.clone().unwrap_or_else(|| match mode {
                    Mode::DryRun => vec![Mode::DryRun],
                    Mode::Apply => vec![Mode::DryRun, Mode::Apply],
                });
                (
                    spec.min_approvals.unwrap_or(1),
                    allowed_modes,
                    spec.require_adapter_capabilities.clone().unwrap_or_default(),
                    spec.max_steps,
                    spec.labels.clone().unwrap_or_default(),
                )
            };

        if !allowed_modes.contains(&mode) {
            return Err(ControlError::ModeNotAllowed { mode, allowed: allowed_modes });
        }

        // Validate the policy before anything is written; a decision
        // whose log cannot replay must never come into existence.
        vouch_core::Policy::new(
            min_approvals,
            allowed_modes.clone(),
            require_caps.clone(),
            max_steps,
            labels.clone(),
        )?;

        let decision_id = self.store.create_decision(None)?;

        self.store.append_event(
            &decision_id,
            actor.clone(),
            EventPayload::DecisionCreated(DecisionCreatedPayload {
                goal: spec.goal.clone(),
                plan: spec.plan.clone(),
                requested_mode: mode,
                labels: labels.clone(),
            }),
        )?;

        let template_digest = template.as_ref().map(|t| t.digest()).transpose()?;
        let overrides_value = (!overrides_applied.is_empty())
            .then(|| Value::Object(overrides_applied.clone()));

        self.store.append_event(
            &decision_id,
            actor,
            EventPayload::PolicyAttached(PolicyAttachedPayload {
                min_approvals,
                allowed_modes,
                require_adapter_capabilities: require_caps,
                max_steps,
                labels,
                template_name: template.as_ref().map(|t| t.name.clone()),
                template_digest: template_digest.clone(),
                template_snapshot,
                overrides_applied: template
                    .as_ref()
                    .map(|_| overrides_value.clone().unwrap_or_else(|| Value::Object(Default::default()))),
            }),
        )?;

        debug!(decision_id = %decision_id, min_approvals, "request created");

        Ok(RequestOutcome {
            request_id: decision_id,
            state: DecisionState::PendingApproval,
            min_approvals,
            template_name: template.as_ref().map(|t| t.name.clone()),
            template_digest,
            overrides_applied: overrides_value,
        })
    }

    fn load(&self, request_id: &str) -> Result<Decision, ControlError> {
        use vouch_projection::LoadError;
        use vouch_store::StoreError;

        Decision::load(&self.store, request_id).map_err(|err| match err {
            LoadError::Store(StoreError::DecisionNotFound(id)) => {
                ControlError::DecisionNotFound(id)
            }
            LoadError::Store(other) => ControlError::Store(other),
            LoadError::Projection(err) => ControlError::ReplayInvalid(err.to_string()),
        })
    }

    /// Approve a request.
    ///
    /// An actor gets exactly one `APPROVAL_GRANTED` for the lifetime of
    /// a decision — a second grant is rejected even after revocation.
    ///
    /// # Errors
    ///
    /// [`ControlError::InvalidState`] outside the approval window,
    /// [`ControlError::DuplicateApproval`] for repeat approvers.
    pub fn approve(
        &self,
        request_id: &str,
        actor: Actor,
        comment: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ApprovalOutcome, ControlError> {
        let decision = self.load(request_id)?;

        if !matches!(
            decision.state,
            DecisionState::PendingApproval | DecisionState::Approved
        ) {
            return Err(ControlError::InvalidState {
                action: "approve",
                state: decision.state,
            });
        }

        if decision.approvals.contains_key(&actor.id) {
            return Err(ControlError::DuplicateApproval(actor.id));
        }

        self.store.append_event(
            request_id,
            actor,
            EventPayload::ApprovalGranted(ApprovalGrantedPayload { expires_at, comment }),
        )?;

        self.approval_outcome(request_id)
    }

    /// Revoke a previous approval. Only valid before execution, and
    /// only for the actor's own non-revoked approval.
    ///
    /// # Errors
    ///
    /// [`ControlError::InvalidState`], [`ControlError::ApprovalNotFound`],
    /// or [`ControlError::ApprovalAlreadyRevoked`].
    pub fn revoke_approval(
        &self,
        request_id: &str,
        actor: Actor,
        reason: impl Into<String>,
    ) -> Result<ApprovalOutcome, ControlError> {
        let decision = self.load(request_id)?;

        if matches!(
            decision.state,
            DecisionState::Executing | DecisionState::Completed
        ) {
            return Err(ControlError::InvalidState {
                action: "revoke_approval",
                state: decision.state,
            });
        }

        match decision.approvals.get(&actor.id) {
            None => return Err(ControlError::ApprovalNotFound(actor.id)),
            Some(approval) if approval.revoked => {
                return Err(ControlError::ApprovalAlreadyRevoked(actor.id));
            }
            Some(_) => {}
        }

        self.store.append_event(
            request_id,
            actor,
            EventPayload::ApprovalRevoked(ApprovalRevokedPayload { reason: reason.into() }),
        )?;

        self.approval_outcome(request_id)
    }

    fn approval_outcome(&self, request_id: &str) -> Result<ApprovalOutcome, ControlError> {
        let decision = self.load(request_id)?;
        let now = Utc::now();
        Ok(ApprovalOutcome {
            request_id: request_id.to_string(),
            state: decision.state,
            current_approvals: decision.active_approval_count_at(now),
            required_approvals: decision.policy.as_ref().map_or(1, |p| p.min_approvals),
            is_approved: decision.is_approved_at(now),
        })
    }

    /// Execute an approved request through the router.
    ///
    /// Gates against the policy (mode, approvals, adapter capabilities),
    /// then emits `EXECUTION_REQUESTED` → `EXECUTION_STARTED` → either
    /// `EXECUTION_COMPLETED` or `EXECUTION_FAILED` with
    /// `error_code = "ROUTER_ERROR"`.
    ///
    /// # Errors
    ///
    /// [`ControlError::NoPolicy`], [`ControlError::PolicyBlocked`], or
    /// [`ControlError::RouterFailed`] (the failure is also recorded as
    /// an event — failures are evidence).
    pub fn execute(
        &self,
        request_id: &str,
        adapter_id: &str,
        actor: Actor,
        router: &dyn Router,
        dry_run: Option<bool>,
    ) -> Result<ExecutionOutcome, ControlError> {
        let decision = self.load(request_id)?;

        let mode = match dry_run {
            Some(true) => Mode::DryRun,
            Some(false) => Mode::Apply,
            None => decision.requested_mode.unwrap_or(Mode::DryRun),
        };

        let Some(policy) = decision.policy.clone() else {
            return Err(ControlError::NoPolicy(request_id.to_string()));
        };

        let adapter_caps = router.adapter_capabilities(adapter_id);
        let validation = validate_execution_request(
            &policy,
            mode,
            decision.active_approval_count_at(Utc::now()),
            adapter_caps.as_ref(),
        );
        if !validation.is_valid() {
            return Err(ControlError::PolicyBlocked(validation.errors));
        }

        self.store.append_event(
            request_id,
            actor,
            EventPayload::ExecutionRequested(ExecutionRequestedPayload {
                adapter_id: adapter_id.to_string(),
                dry_run: mode == Mode::DryRun,
            }),
        )?;

        let goal = decision.goal.clone().unwrap_or_default();
        let compiled = policy.compile_to_router_request(
            &goal,
            decision.plan.as_deref(),
            adapter_id,
            mode == Mode::DryRun,
        );
        let request_digest = content_digest(&compiled)?;

        self.store.append_event(
            request_id,
            Actor::system(SYSTEM_ACTOR),
            EventPayload::ExecutionStarted(ExecutionStartedPayload {
                router_request_digest: request_digest.clone(),
            }),
        )?;

        let run_request = RouterRunRequest {
            goal,
            adapter_id: adapter_id.to_string(),
            dry_run: mode == Mode::DryRun,
            plan: decision.plan.clone(),
            max_steps: policy.max_steps,
            require_capabilities: (!policy.require_adapter_capabilities.is_empty())
                .then(|| policy.require_adapter_capabilities.clone()),
        };

        match router.run(&run_request) {
            Ok(response) => {
                let run_id = response
                    .get("run_id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                let response_digest = content_digest(&response)?;
                let steps_executed = response
                    .get("steps_executed")
                    .and_then(Value::as_u64)
                    .and_then(|s| u32::try_from(s).ok())
                    .unwrap_or(0);

                self.store.append_event(
                    request_id,
                    Actor::system(SYSTEM_ACTOR),
                    EventPayload::ExecutionCompleted(ExecutionCompletedPayload {
                        run_id: run_id.clone(),
                        response_digest: response_digest.clone(),
                        steps_executed: Some(steps_executed),
                    }),
                )?;

                debug!(decision_id = %request_id, run_id = %run_id, "execution completed");
                Ok(ExecutionOutcome {
                    request_id: request_id.to_string(),
                    run_id,
                    mode,
                    steps_executed,
                    request_digest,
                    response_digest,
                })
            }
            Err(router_error) => {
                warn!(decision_id = %request_id, error = %router_error, "router dispatch failed");
                self.store.append_event(
                    request_id,
                    Actor::system(SYSTEM_ACTOR),
                    EventPayload::ExecutionFailed(ExecutionFailedPayload {
                        error_code: "ROUTER_ERROR".into(),
                        error_message: router_error.to_string(),
                        run_id: None,
                    }),
                )?;
                Err(ControlError::RouterFailed(router_error.to_string()))
            }
        }
    }

    /// Full status view: projection summary plus lifecycle analysis.
    ///
    /// # Errors
    ///
    /// [`ControlError::DecisionNotFound`] or replay failures.
    pub fn status(
        &self,
        request_id: &str,
        timeline_limit: Option<usize>,
    ) -> Result<StatusView, ControlError> {
        let decision = self.load(request_id)?;
        let lifecycle = compute_lifecycle(
            &decision,
            timeline_limit.or(Some(DEFAULT_TIMELINE_LIMIT)),
        );
        Ok(StatusView { decision: decision.summary(), lifecycle })
    }

    /// List decisions newest-first.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn list_requests(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<(String, DateTime<Utc>)>, ControlError> {
        Ok(self.store.list_decisions(limit, offset)?)
    }
}
