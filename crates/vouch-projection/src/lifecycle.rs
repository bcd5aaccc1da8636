// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle analysis: blocking reasons, timeline, progress.
//!
//! All of this is derived from events, never stored. The blocking-reason
//! ordering is a public contract for automation and must not change.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use vouch_core::{ActorType, EventPayload};

use crate::decision::{Decision, DecisionState};

/// Default timeline truncation: keep the last N entries.
pub const DEFAULT_TIMELINE_LIMIT: usize = 20;

/// Synthetic timeline event type marking the approval threshold.
pub const THRESHOLD_MET: &str = "THRESHOLD_MET";

/// Machine-readable reason a decision cannot execute.
///
/// Codes are stable for automation. At most one blocking reason is
/// reported per decision; the triage ladder in
/// [`compute_blocking_reasons`] decides which.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockingCode {
    /// Decision has no policy attached.
    NoPolicy,
    /// Not enough active approvals yet.
    MissingApprovals,
    /// Had enough approvals but some expired.
    ApprovalExpired,
    /// Decision already ran successfully.
    AlreadyExecuted,
    /// Previous execution failed.
    ExecutionFailed,
}

impl BlockingCode {
    /// Stable wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoPolicy => "NO_POLICY",
            Self::MissingApprovals => "MISSING_APPROVALS",
            Self::ApprovalExpired => "APPROVAL_EXPIRED",
            Self::AlreadyExecuted => "ALREADY_EXECUTED",
            Self::ExecutionFailed => "EXECUTION_FAILED",
        }
    }
}

/// A blocking reason with human message and structured details.
#[derive(Debug, Clone, Serialize)]
pub struct BlockingReason {
    /// Stable machine-readable code.
    pub code: BlockingCode,
    /// Human-readable explanation.
    pub message: String,
    /// Code-specific detail fields.
    pub details: Value,
}

/// Timeline entry grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineCategory {
    /// Decision-level milestones.
    Decision,
    /// Policy attachment.
    Policy,
    /// Approval grants and revocations.
    Approval,
    /// Execution milestones.
    Execution,
}

/// Single entry in the decision timeline.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEntry {
    /// RFC 3339 timestamp of the underlying event.
    pub ts: String,
    /// Entry grouping.
    pub category: TimelineCategory,
    /// Short action label (`"created"`, `"approved"`, ...).
    pub label: String,
    /// Human-readable summary.
    pub summary: String,
    /// Who did it (`None` for synthetic entries).
    pub actor: Option<String>,
    /// Original event type, or [`THRESHOLD_MET`] for synthetic entries.
    pub event_type: String,
    /// Sequence number the entry anchors to.
    pub seq: i64,
}

/// Progress toward execution.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleProgress {
    /// Active approvals right now.
    pub approvals_current: u32,
    /// Approvals the policy requires (1 when no policy yet).
    pub approvals_required: u32,
    /// Approved and not yet in a terminal state.
    pub ready_to_execute: bool,
    /// Whether execution has been attempted.
    pub has_executed: bool,
    /// `"pending"`, `"success"`, or `"failed"`, once execution started.
    pub execution_outcome: Option<&'static str>,
}

/// Complete lifecycle view of a decision.
#[derive(Debug, Clone, Serialize)]
pub struct Lifecycle {
    /// Current state.
    pub state: DecisionState,
    /// The (at most one) blocking reason, in triage order.
    pub blocking_reasons: Vec<BlockingReason>,
    /// Progress summary.
    pub progress: LifecycleProgress,
    /// Timeline entries (possibly truncated to the most recent).
    pub timeline: Vec<LifecycleEntry>,
    /// Total entries before truncation.
    pub timeline_total: usize,
    /// Whether the timeline was truncated.
    pub timeline_truncated: bool,
}

impl Lifecycle {
    /// Whether the decision is blocked from execution.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        !self.blocking_reasons.is_empty()
    }
}

/// Compute why a decision cannot execute, at `now`.
///
/// Returns an empty vec when the decision is executable. Reasons follow a
/// fixed triage ladder and the first matching rule wins exclusively:
///
/// 1. `NO_POLICY`
/// 2. `ALREADY_EXECUTED`
/// 3. `EXECUTION_FAILED`
/// 4. `APPROVAL_EXPIRED` — only when the expiry-ignoring non-revoked
///    count still meets the threshold
/// 5. `MISSING_APPROVALS`
#[must_use]
pub fn compute_blocking_reasons(decision: &Decision, now: DateTime<Utc>) -> Vec<BlockingReason> {
    let Some(policy) = &decision.policy else {
        return vec![BlockingReason {
            code: BlockingCode::NoPolicy,
            message: "Decision has no policy attached".into(),
            details: json!({}),
        }];
    };

    if decision.state == DecisionState::Completed {
        return vec![BlockingReason {
            code: BlockingCode::AlreadyExecuted,
            message: "Decision has already been executed successfully".into(),
            details: json!({"run_id": decision.latest_run_id()}),
        }];
    }

    if decision.state == DecisionState::Failed {
        let error_code = decision
            .latest_execution()
            .and_then(|e| e.error_code.clone());
        let error_message = decision
            .latest_execution()
            .and_then(|e| e.error_message.clone())
            .unwrap_or_default();
        let message = if error_message.is_empty() {
            "Previous execution failed".to_string()
        } else {
            format!("Previous execution failed: {error_message}")
        };
        return vec![BlockingReason {
            code: BlockingCode::ExecutionFailed,
            message,
            details: json!({
                "error_code": error_code,
                "error_message": error_message,
            }),
        }];
    }

    let required = policy.min_approvals;
    let current = decision.active_approval_count_at(now);
    if current >= required {
        return Vec::new();
    }

    // The expired-vs-missing split intentionally ignores expiry when
    // counting grants: "you had enough, they lapsed" reads differently
    // from "you never had enough".
    let total_granted = decision.approvals.values().filter(|a| !a.revoked).count() as u32;
    let expired_count = decision
        .approvals
        .values()
        .filter(|a| !a.revoked && a.expires_at.is_some_and(|exp| exp <= now))
        .count() as u32;

    if expired_count > 0 && total_granted >= required {
        vec![BlockingReason {
            code: BlockingCode::ApprovalExpired,
            message: format!("Approvals expired: {expired_count} approval(s) have expired"),
            details: json!({
                "expired_count": expired_count,
                "current_valid": current,
                "required": required,
            }),
        }]
    } else {
        let missing = required - current;
        let plural = if missing == 1 { "" } else { "s" };
        vec![BlockingReason {
            code: BlockingCode::MissingApprovals,
            message: format!("Missing {missing} approval{plural}"),
            details: json!({
                "required": required,
                "current": current,
                "missing": missing,
            }),
        }]
    }
}

/// Compute the human-friendly timeline from events.
///
/// A synthetic [`THRESHOLD_MET`] entry is inserted at the seq of the
/// approval that first met the policy threshold (grant +1, revoke −1,
/// expiry ignored). Entries sort by `(seq, real-before-synthetic)`.
#[must_use]
pub fn compute_timeline(decision: &Decision) -> Vec<LifecycleEntry> {
    let mut entries: Vec<LifecycleEntry> = Vec::new();

    for event in &decision.events {
        let actor = match event.actor.kind {
            ActorType::System => format!("system:{}", event.actor.id),
            ActorType::Human => event.actor.id.clone(),
        };
        let ts = event.ts.to_rfc3339();
        let base = |category, label: &str, summary: String| LifecycleEntry {
            ts: ts.clone(),
            category,
            label: label.to_string(),
            summary,
            actor: Some(actor.clone()),
            event_type: event.event_type.as_str().to_string(),
            seq: event.seq,
        };

        match &event.payload {
            EventPayload::DecisionCreated(_) => {
                entries.push(base(
                    TimelineCategory::Decision,
                    "created",
                    "Decision created".into(),
                ));
            }
            EventPayload::PolicyAttached(p) => {
                let summary = match &p.template_name {
                    Some(name) => format!("Policy attached from template \"{name}\""),
                    None => "Policy attached".into(),
                };
                entries.push(base(TimelineCategory::Policy, "policy", summary));
            }
            EventPayload::ApprovalGranted(p) => {
                let mut summary = format!("Approval granted by {}", event.actor.id);
                if let Some(comment) = &p.comment {
                    summary = format!("{summary}: \"{comment}\"");
                }
                entries.push(base(TimelineCategory::Approval, "approved", summary));
            }
            EventPayload::ApprovalRevoked(p) => {
                let mut summary = format!("Approval revoked by {}", event.actor.id);
                if !p.reason.is_empty() {
                    summary = format!("{summary}: \"{}\"", p.reason);
                }
                entries.push(base(TimelineCategory::Approval, "revoked", summary));
            }
            EventPayload::ExecutionRequested(p) => {
                let mode = if p.dry_run { "dry-run" } else { "apply" };
                entries.push(base(
                    TimelineCategory::Execution,
                    "requested",
                    format!("Execution requested ({mode}) via {}", p.adapter_id),
                ));
            }
            EventPayload::ExecutionStarted(_) => {
                entries.push(base(
                    TimelineCategory::Execution,
                    "started",
                    "Execution started".into(),
                ));
            }
            EventPayload::ExecutionCompleted(p) => {
                let summary = match p.steps_executed {
                    Some(steps) if steps > 0 => format!("Execution completed ({steps} steps)"),
                    _ => "Execution completed".into(),
                };
                entries.push(base(TimelineCategory::Execution, "completed", summary));
            }
            EventPayload::ExecutionFailed(p) => {
                let summary = if p.error_message.is_empty() {
                    "Execution failed".to_string()
                } else {
                    let mut msg = p.error_message.clone();
                    if msg.chars().count() > 50 {
                        msg = format!("{}...", msg.chars().take(47).collect::<String>());
                    }
                    format!("Execution failed: {msg}")
                };
                entries.push(base(TimelineCategory::Execution, "failed", summary));
            }
            EventPayload::TemplateCreated(_) => {}
        }
    }

    if let Some(policy) = &decision.policy {
        let required = policy.min_approvals;
        let mut approval_count: i64 = 0;
        let mut threshold_met = false;

        for event in &decision.events {
            match &event.payload {
                EventPayload::ApprovalGranted(_) => {
                    approval_count += 1;
                    if approval_count == i64::from(required) && !threshold_met {
                        threshold_met = true;
                        entries.push(LifecycleEntry {
                            ts: event.ts.to_rfc3339(),
                            category: TimelineCategory::Decision,
                            label: "approved".into(),
                            summary: format!("Approval threshold met ({required}/{required})"),
                            actor: None,
                            event_type: THRESHOLD_MET.into(),
                            seq: event.seq,
                        });
                    }
                }
                EventPayload::ApprovalRevoked(_) => approval_count -= 1,
                _ => {}
            }
        }
    }

    // Stable sort keeps synthetic entries right after their trigger.
    entries.sort_by_key(|e| (e.seq, i32::from(e.event_type == THRESHOLD_MET)));
    entries
}

/// Compute progress toward execution, at `now`.
#[must_use]
pub fn compute_progress(decision: &Decision, now: DateTime<Utc>) -> LifecycleProgress {
    let required = decision
        .policy
        .as_ref()
        .map_or(1, |p| p.min_approvals);
    let current = decision.active_approval_count_at(now);

    let has_executed = matches!(
        decision.state,
        DecisionState::Completed | DecisionState::Failed | DecisionState::Executing
    );
    let execution_outcome = match decision.state {
        DecisionState::Completed => Some("success"),
        DecisionState::Failed => Some("failed"),
        DecisionState::Executing => Some("pending"),
        _ => None,
    };
    let ready = decision.is_approved_at(now)
        && !matches!(
            decision.state,
            DecisionState::Completed | DecisionState::Failed
        );

    LifecycleProgress {
        approvals_current: current,
        approvals_required: required,
        ready_to_execute: ready,
        has_executed,
        execution_outcome,
    }
}

/// Compute the complete lifecycle view, at `now`.
///
/// `timeline_limit = None` disables truncation; the default keeps the
/// last [`DEFAULT_TIMELINE_LIMIT`] entries.
#[must_use]
pub fn compute_lifecycle_at(
    decision: &Decision,
    timeline_limit: Option<usize>,
    now: DateTime<Utc>,
) -> Lifecycle {
    let full_timeline = compute_timeline(decision);
    let timeline_total = full_timeline.len();

    let (timeline, timeline_truncated) = match timeline_limit {
        Some(limit) if timeline_total > limit => {
            (full_timeline[timeline_total - limit..].to_vec(), true)
        }
        _ => (full_timeline, false),
    };

    Lifecycle {
        state: decision.state,
        blocking_reasons: compute_blocking_reasons(decision, now),
        progress: compute_progress(decision, now),
        timeline,
        timeline_total,
        timeline_truncated,
    }
}

/// [`compute_lifecycle_at`] with the default truncation and wall clock.
#[must_use]
pub fn compute_lifecycle(decision: &Decision, timeline_limit: Option<usize>) -> Lifecycle {
    compute_lifecycle_at(decision, timeline_limit, Utc::now())
}
