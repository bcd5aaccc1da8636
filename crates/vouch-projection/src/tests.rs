// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::{DateTime, Duration, TimeZone, Utc};
use vouch_core::{
    Actor, ApprovalGrantedPayload, ApprovalRevokedPayload, DecisionCreatedPayload, EventPayload,
    ExecutionCompletedPayload, ExecutionFailedPayload, ExecutionRequestedPayload,
    ExecutionStartedPayload, Mode, PolicyAttachedPayload,
};
use vouch_store::StoredEvent;

use crate::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn event(seq: i64, actor: Actor, payload: EventPayload) -> StoredEvent {
    let digest = payload.digest().unwrap();
    StoredEvent {
        decision_id: "d1".into(),
        seq,
        event_type: payload.event_type(),
        ts: t0() + Duration::seconds(seq),
        actor,
        payload,
        digest,
    }
}

fn created(mode: Mode) -> EventPayload {
    EventPayload::DecisionCreated(DecisionCreatedPayload {
        goal: "rotate keys".into(),
        plan: None,
        requested_mode: mode,
        labels: vec![],
    })
}

fn policy(min_approvals: u32) -> EventPayload {
    EventPayload::PolicyAttached(PolicyAttachedPayload {
        min_approvals,
        allowed_modes: vec![Mode::DryRun, Mode::Apply],
        require_adapter_capabilities: vec![],
        max_steps: None,
        labels: vec![],
        template_name: None,
        template_digest: None,
        template_snapshot: None,
        overrides_applied: None,
    })
}

fn approval(expires_at: Option<DateTime<Utc>>) -> EventPayload {
    EventPayload::ApprovalGranted(ApprovalGrantedPayload { expires_at, comment: None })
}

// ── Fold ───────────────────────────────────────────────────────────

#[test]
fn two_of_two_approval_progression() {
    let events = vec![
        event(0, Actor::human("creator"), created(Mode::Apply)),
        event(1, Actor::human("creator"), policy(2)),
        event(2, Actor::human("alice"), approval(None)),
        event(3, Actor::human("bob"), approval(None)),
    ];

    let after_one = Decision::replay("d1", &events[..3]).unwrap();
    assert_eq!(after_one.state, DecisionState::PendingApproval);
    assert!(!after_one.is_approved());

    let after_two = Decision::replay("d1", &events).unwrap();
    assert_eq!(after_two.state, DecisionState::Approved);
    assert!(after_two.is_approved());
    assert_eq!(after_two.active_approval_count(), 2);
}

#[test]
fn full_execution_reaches_completed() {
    let events = vec![
        event(0, Actor::human("creator"), created(Mode::Apply)),
        event(1, Actor::human("creator"), policy(1)),
        event(2, Actor::human("alice"), approval(None)),
        event(
            3,
            Actor::human("alice"),
            EventPayload::ExecutionRequested(ExecutionRequestedPayload {
                adapter_id: "stub".into(),
                dry_run: true,
            }),
        ),
        event(
            4,
            Actor::system("control"),
            EventPayload::ExecutionStarted(ExecutionStartedPayload {
                router_request_digest: "a".repeat(64),
            }),
        ),
        event(
            5,
            Actor::system("control"),
            EventPayload::ExecutionCompleted(ExecutionCompletedPayload {
                run_id: "r1".into(),
                response_digest: "b".repeat(64),
                steps_executed: Some(3),
            }),
        ),
    ];

    let decision = Decision::replay("d1", &events).unwrap();
    assert_eq!(decision.state, DecisionState::Completed);
    assert_eq!(decision.latest_run_id(), Some("r1"));
    assert_eq!(decision.events.len(), 6);
    let exec = decision.latest_execution().unwrap();
    assert_eq!(exec.steps_executed, Some(3));
    assert!(exec.started_at.is_some());
    assert!(exec.completed_at.is_some());
}

#[test]
fn failed_execution_reaches_failed() {
    let events = vec![
        event(0, Actor::human("c"), created(Mode::DryRun)),
        event(1, Actor::human("c"), policy(1)),
        event(2, Actor::human("alice"), approval(None)),
        event(
            3,
            Actor::human("alice"),
            EventPayload::ExecutionRequested(ExecutionRequestedPayload {
                adapter_id: "stub".into(),
                dry_run: true,
            }),
        ),
        event(
            4,
            Actor::system("control"),
            EventPayload::ExecutionFailed(ExecutionFailedPayload {
                error_code: "ROUTER_ERROR".into(),
                error_message: "router exploded".into(),
                run_id: None,
            }),
        ),
    ];
    let decision = Decision::replay("d1", &events).unwrap();
    assert_eq!(decision.state, DecisionState::Failed);
    let exec = decision.latest_execution().unwrap();
    assert_eq!(exec.error_code.as_deref(), Some("ROUTER_ERROR"));
}

#[test]
fn revocation_drops_back_to_pending() {
    let events = vec![
        event(0, Actor::human("c"), created(Mode::DryRun)),
        event(1, Actor::human("c"), policy(1)),
        event(2, Actor::human("alice"), approval(None)),
        event(
            3,
            Actor::human("alice"),
            EventPayload::ApprovalRevoked(ApprovalRevokedPayload { reason: "mistake".into() }),
        ),
    ];
    let decision = Decision::replay("d1", &events).unwrap();
    assert_eq!(decision.state, DecisionState::PendingApproval);
    assert_eq!(decision.active_approval_count(), 0);
    let approval = &decision.approvals["alice"];
    assert!(approval.revoked);
    assert_eq!(approval.revoke_reason.as_deref(), Some("mistake"));
}

#[test]
fn expired_approval_counts_zero() {
    let past = t0() - Duration::hours(1);
    let events = vec![
        event(0, Actor::human("c"), created(Mode::DryRun)),
        event(1, Actor::human("c"), policy(1)),
        event(2, Actor::human("alice"), approval(Some(past))),
    ];
    let decision = Decision::replay("d1", &events).unwrap();
    assert_eq!(decision.active_approval_count_at(t0()), 0);
    assert!(!decision.is_approved_at(t0()));
}

#[test]
fn replay_is_idempotent() {
    let events = vec![
        event(0, Actor::human("c"), created(Mode::Apply)),
        event(1, Actor::human("c"), policy(2)),
        event(2, Actor::human("alice"), approval(None)),
    ];
    let a = Decision::replay("d1", &events).unwrap();
    let b = Decision::replay("d1", &events).unwrap();
    assert_eq!(a.state, b.state);
    assert_eq!(a.approvals, b.approvals);
    assert_eq!(a.executions, b.executions);
    assert_eq!(a.summary()["event_count"], b.summary()["event_count"]);
}

#[test]
fn zero_approval_policy_fails_replay() {
    let events = vec![
        event(0, Actor::human("c"), created(Mode::DryRun)),
        event(1, Actor::human("c"), policy(0)),
    ];
    assert!(Decision::replay("d1", &events).is_err());
}

// ── Blocking reasons ───────────────────────────────────────────────

fn reasons(events: &[StoredEvent], now: DateTime<Utc>) -> Vec<BlockingReason> {
    let decision = Decision::replay("d1", events).unwrap();
    compute_blocking_reasons(&decision, now)
}

#[test]
fn no_policy_wins_triage() {
    let events = vec![event(0, Actor::human("c"), created(Mode::DryRun))];
    let reasons = reasons(&events, t0());
    assert_eq!(reasons.len(), 1);
    assert_eq!(reasons[0].code, BlockingCode::NoPolicy);
}

#[test]
fn missing_approvals_reports_counts() {
    let events = vec![
        event(0, Actor::human("c"), created(Mode::DryRun)),
        event(1, Actor::human("c"), policy(2)),
        event(2, Actor::human("alice"), approval(None)),
    ];
    let reasons = reasons(&events, t0() + Duration::minutes(1));
    assert_eq!(reasons.len(), 1);
    assert_eq!(reasons[0].code, BlockingCode::MissingApprovals);
    assert_eq!(reasons[0].details["required"], 2);
    assert_eq!(reasons[0].details["current"], 1);
    assert_eq!(reasons[0].details["missing"], 1);
}

#[test]
fn expired_approval_reports_expired_not_missing() {
    // Granted count (ignoring expiry) meets the threshold, so the lapse
    // is reported as APPROVAL_EXPIRED.
    let past = t0() - Duration::hours(1);
    let events = vec![
        event(0, Actor::human("c"), created(Mode::DryRun)),
        event(1, Actor::human("c"), policy(1)),
        event(2, Actor::human("alice"), approval(Some(past))),
    ];
    let reasons = reasons(&events, t0());
    assert_eq!(reasons.len(), 1);
    assert_eq!(reasons[0].code, BlockingCode::ApprovalExpired);
    assert_eq!(reasons[0].details["expired_count"], 1);
    assert_eq!(reasons[0].details["current_valid"], 0);
    assert_eq!(reasons[0].details["required"], 1);
}

#[test]
fn revoked_expired_approval_is_missing_not_expired() {
    // A revoked approval no longer counts as granted, so the ladder
    // falls through to MISSING_APPROVALS.
    let past = t0() - Duration::hours(1);
    let events = vec![
        event(0, Actor::human("c"), created(Mode::DryRun)),
        event(1, Actor::human("c"), policy(1)),
        event(2, Actor::human("alice"), approval(Some(past))),
        event(
            3,
            Actor::human("alice"),
            EventPayload::ApprovalRevoked(ApprovalRevokedPayload { reason: String::new() }),
        ),
    ];
    let reasons = reasons(&events, t0());
    assert_eq!(reasons[0].code, BlockingCode::MissingApprovals);
}

#[test]
fn completed_decision_reports_already_executed() {
    let events = vec![
        event(0, Actor::human("c"), created(Mode::DryRun)),
        event(1, Actor::human("c"), policy(1)),
        event(2, Actor::human("alice"), approval(None)),
        event(
            3,
            Actor::human("alice"),
            EventPayload::ExecutionRequested(ExecutionRequestedPayload {
                adapter_id: "stub".into(),
                dry_run: true,
            }),
        ),
        event(
            4,
            Actor::system("control"),
            EventPayload::ExecutionCompleted(ExecutionCompletedPayload {
                run_id: "r9".into(),
                response_digest: "c".repeat(64),
                steps_executed: None,
            }),
        ),
    ];
    let reasons = reasons(&events, t0());
    assert_eq!(reasons[0].code, BlockingCode::AlreadyExecuted);
    assert_eq!(reasons[0].details["run_id"], "r9");
}

#[test]
fn at_most_one_blocking_reason() {
    // Failed execution AND missing approvals: ladder reports only the
    // terminal failure.
    let events = vec![
        event(0, Actor::human("c"), created(Mode::DryRun)),
        event(1, Actor::human("c"), policy(3)),
        event(
            2,
            Actor::system("control"),
            EventPayload::ExecutionFailed(ExecutionFailedPayload {
                error_code: "ROUTER_ERROR".into(),
                error_message: "boom".into(),
                run_id: None,
            }),
        ),
    ];
    let reasons = reasons(&events, t0());
    assert_eq!(reasons.len(), 1);
    assert_eq!(reasons[0].code, BlockingCode::ExecutionFailed);
}

// ── Timeline ───────────────────────────────────────────────────────

#[test]
fn threshold_entry_lands_after_deciding_approval() {
    let events = vec![
        event(0, Actor::human("c"), created(Mode::DryRun)),
        event(1, Actor::human("c"), policy(2)),
        event(2, Actor::human("alice"), approval(None)),
        event(3, Actor::human("bob"), approval(None)),
    ];
    let decision = Decision::replay("d1", &events).unwrap();
    let timeline = compute_timeline(&decision);

    let threshold_pos = timeline
        .iter()
        .position(|e| e.event_type == THRESHOLD_MET)
        .unwrap();
    assert_eq!(timeline[threshold_pos].seq, 3);
    assert_eq!(timeline[threshold_pos - 1].summary, "Approval granted by bob");
    assert_eq!(timeline[threshold_pos].summary, "Approval threshold met (2/2)");
    assert!(timeline[threshold_pos].actor.is_none());
}

#[test]
fn timeline_truncates_to_last_n() {
    let mut events = vec![
        event(0, Actor::human("c"), created(Mode::DryRun)),
        event(1, Actor::human("c"), policy(50)),
    ];
    for i in 0..30i64 {
        events.push(event(2 + i, Actor::human(format!("user{i}")), approval(None)));
    }
    let decision = Decision::replay("d1", &events).unwrap();

    let lifecycle = compute_lifecycle_at(&decision, Some(DEFAULT_TIMELINE_LIMIT), t0());
    assert_eq!(lifecycle.timeline.len(), DEFAULT_TIMELINE_LIMIT);
    assert_eq!(lifecycle.timeline_total, 32);
    assert!(lifecycle.timeline_truncated);

    let unlimited = compute_lifecycle_at(&decision, None, t0());
    assert_eq!(unlimited.timeline.len(), 32);
    assert!(!unlimited.timeline_truncated);
}

#[test]
fn system_actor_is_prefixed_in_timeline() {
    let events = vec![
        event(0, Actor::human("c"), created(Mode::DryRun)),
        event(1, Actor::human("c"), policy(1)),
        event(2, Actor::human("alice"), approval(None)),
        event(
            3,
            Actor::human("alice"),
            EventPayload::ExecutionRequested(ExecutionRequestedPayload {
                adapter_id: "stub".into(),
                dry_run: false,
            }),
        ),
        event(
            4,
            Actor::system("control"),
            EventPayload::ExecutionStarted(ExecutionStartedPayload {
                router_request_digest: "a".repeat(64),
            }),
        ),
    ];
    let decision = Decision::replay("d1", &events).unwrap();
    let timeline = compute_timeline(&decision);
    let started = timeline.iter().find(|e| e.label == "started").unwrap();
    assert_eq!(started.actor.as_deref(), Some("system:control"));
    let requested = timeline.iter().find(|e| e.label == "requested").unwrap();
    assert_eq!(requested.summary, "Execution requested (apply) via stub");
}

// ── Progress ───────────────────────────────────────────────────────

#[test]
fn progress_tracks_readiness_and_outcome() {
    let events = vec![
        event(0, Actor::human("c"), created(Mode::Apply)),
        event(1, Actor::human("c"), policy(1)),
        event(2, Actor::human("alice"), approval(None)),
    ];
    let decision = Decision::replay("d1", &events).unwrap();
    let progress = compute_progress(&decision, t0() + Duration::minutes(1));
    assert_eq!(progress.approvals_current, 1);
    assert_eq!(progress.approvals_required, 1);
    assert!(progress.ready_to_execute);
    assert!(!progress.has_executed);
    assert!(progress.execution_outcome.is_none());
}
