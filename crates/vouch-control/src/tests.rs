// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::{Value, json};

use vouch_core::{Actor, Mode};
use vouch_projection::{BlockingCode, DecisionState};
use vouch_store::{DecisionStore, TemplateSpec};

use crate::*;

struct StubRouter {
    capabilities: Option<BTreeSet<String>>,
    fail: bool,
    calls: Mutex<Vec<RouterRunRequest>>,
}

impl StubRouter {
    fn new() -> Self {
        Self { capabilities: None, fail: false, calls: Mutex::new(Vec::new()) }
    }

    fn with_capabilities(caps: &[&str]) -> Self {
        Self {
            capabilities: Some(caps.iter().map(ToString::to_string).collect()),
            ..Self::new()
        }
    }

    fn failing() -> Self {
        Self { fail: true, ..Self::new() }
    }
}

impl Router for StubRouter {
    fn run(&self, request: &RouterRunRequest) -> Result<Value> {
        self.calls.lock().unwrap().push(request.clone());
        if self.fail {
            anyhow::bail!("adapter exploded");
        }
        Ok(json!({"run_id": "r1", "steps_executed": 3}))
    }

    fn adapter_capabilities(&self, _adapter_id: &str) -> Option<BTreeSet<String>> {
        self.capabilities.clone()
    }
}

fn plane() -> ControlPlane {
    ControlPlane::new(DecisionStore::in_memory().unwrap())
}

fn spec(goal: &str, mode: Mode, min_approvals: u32) -> RequestSpec {
    RequestSpec {
        goal: goal.into(),
        mode: Some(mode),
        min_approvals: Some(min_approvals),
        ..RequestSpec::default()
    }
}

// ── Request ────────────────────────────────────────────────────────

#[test]
fn request_attaches_policy_and_pends() {
    let plane = plane();
    let outcome = plane
        .request(spec("rotate keys", Mode::Apply, 2), Actor::human("creator"))
        .unwrap();

    assert_eq!(outcome.state, DecisionState::PendingApproval);
    assert_eq!(outcome.min_approvals, 2);

    let events = plane.store().get_events(&outcome.request_id).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type.as_str(), "DECISION_CREATED");
    assert_eq!(events[1].event_type.as_str(), "POLICY_ATTACHED");
}

#[test]
fn request_rejects_disallowed_mode() {
    let plane = plane();
    let err = plane
        .request(
            RequestSpec {
                goal: "g".into(),
                mode: Some(Mode::Apply),
                allowed_modes: Some(vec![Mode::DryRun]),
                ..RequestSpec::default()
            },
            Actor::human("creator"),
        )
        .unwrap_err();
    assert_eq!(err.code(), "MODE_NOT_ALLOWED");
}

#[test]
fn templated_request_records_overrides() {
    let plane = plane();
    plane
        .templates()
        .unwrap()
        .create_template(
            "prod-deploy",
            Actor::human("ops"),
            TemplateSpec {
                description: "prod deploys".into(),
                min_approvals: 3,
                allowed_modes: vec![Mode::DryRun, Mode::Apply],
                require_adapter_capabilities: vec!["timeout".into()],
                max_steps: Some(10),
                labels: vec!["prod".into()],
            },
        )
        .unwrap();

    let outcome = plane
        .request(
            RequestSpec {
                goal: "deploy v2".into(),
                mode: Some(Mode::Apply),
                template_name: Some("prod-deploy".into()),
                min_approvals: Some(2),
                ..RequestSpec::default()
            },
            Actor::human("creator"),
        )
        .unwrap();

    assert_eq!(outcome.min_approvals, 2);
    assert_eq!(outcome.template_name.as_deref(), Some("prod-deploy"));
    assert!(outcome.template_digest.is_some());
    assert_eq!(outcome.overrides_applied.unwrap()["min_approvals"], 2);

    let status = plane.status(&outcome.request_id, None).unwrap();
    assert_eq!(status.decision["template"]["name"], "prod-deploy");
}

#[test]
fn zero_approval_policy_rejected_before_any_write() {
    let plane = plane();
    let err = plane
        .request(spec("g", Mode::DryRun, 0), Actor::human("creator"))
        .unwrap_err();
    assert_eq!(err.code(), "POLICY_INVALID");
    assert!(plane.list_requests(10, 0).unwrap().is_empty());
}

#[test]
fn unknown_template_rejected() {
    let plane = plane();
    let err = plane
        .request(
            RequestSpec {
                goal: "g".into(),
                template_name: Some("nope".into()),
                ..RequestSpec::default()
            },
            Actor::human("creator"),
        )
        .unwrap_err();
    assert_eq!(err.code(), "TEMPLATE_NOT_FOUND");
}

// ── Approve / revoke ───────────────────────────────────────────────

#[test]
fn two_of_two_approval_flow() {
    let plane = plane();
    let request = plane
        .request(spec("rotate keys", Mode::Apply, 2), Actor::human("creator"))
        .unwrap();

    let first = plane
        .approve(&request.request_id, Actor::human("alice"), None, None)
        .unwrap();
    assert_eq!(first.state, DecisionState::PendingApproval);
    assert!(!first.is_approved);
    assert_eq!(first.current_approvals, 1);

    let second = plane
        .approve(&request.request_id, Actor::human("bob"), None, None)
        .unwrap();
    assert_eq!(second.state, DecisionState::Approved);
    assert!(second.is_approved);
    assert_eq!(second.current_approvals, 2);
}

#[test]
fn duplicate_approval_rejected_without_event() {
    let plane = plane();
    let request = plane
        .request(spec("g", Mode::DryRun, 2), Actor::human("creator"))
        .unwrap();

    plane
        .approve(&request.request_id, Actor::human("alice"), None, None)
        .unwrap();
    let err = plane
        .approve(&request.request_id, Actor::human("alice"), None, None)
        .unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_APPROVAL");

    // No duplicate event was appended.
    assert_eq!(plane.store().get_events(&request.request_id).unwrap().len(), 3);
}

#[test]
fn revoked_actor_cannot_reapprove() {
    let plane = plane();
    let request = plane
        .request(spec("g", Mode::DryRun, 1), Actor::human("creator"))
        .unwrap();

    plane
        .approve(&request.request_id, Actor::human("alice"), None, None)
        .unwrap();
    let revoked = plane
        .revoke_approval(&request.request_id, Actor::human("alice"), "changed my mind")
        .unwrap();
    assert_eq!(revoked.state, DecisionState::PendingApproval);
    assert_eq!(revoked.current_approvals, 0);

    // One approval per actor per decision lifetime.
    let err = plane
        .approve(&request.request_id, Actor::human("alice"), None, None)
        .unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_APPROVAL");
}

#[test]
fn revoke_requires_own_active_approval() {
    let plane = plane();
    let request = plane
        .request(spec("g", Mode::DryRun, 1), Actor::human("creator"))
        .unwrap();

    let err = plane
        .revoke_approval(&request.request_id, Actor::human("mallory"), "")
        .unwrap_err();
    assert_eq!(err.code(), "APPROVAL_NOT_FOUND");

    plane
        .approve(&request.request_id, Actor::human("alice"), None, None)
        .unwrap();
    plane
        .revoke_approval(&request.request_id, Actor::human("alice"), "x")
        .unwrap();
    let err = plane
        .revoke_approval(&request.request_id, Actor::human("alice"), "again")
        .unwrap_err();
    assert_eq!(err.code(), "APPROVAL_ALREADY_REVOKED");
}

#[test]
fn approve_rejected_after_completion() {
    let plane = plane();
    let router = StubRouter::new();
    let request = plane
        .request(spec("g", Mode::DryRun, 1), Actor::human("creator"))
        .unwrap();
    plane
        .approve(&request.request_id, Actor::human("alice"), None, None)
        .unwrap();
    plane
        .execute(&request.request_id, "stub", Actor::human("alice"), &router, None)
        .unwrap();

    let err = plane
        .approve(&request.request_id, Actor::human("bob"), None, None)
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");
}

// ── Execute ────────────────────────────────────────────────────────

#[test]
fn execute_records_full_event_trail() {
    let plane = plane();
    let router = StubRouter::new();
    let request = plane
        .request(spec("rotate keys", Mode::Apply, 2), Actor::human("creator"))
        .unwrap();
    plane
        .approve(&request.request_id, Actor::human("alice"), None, None)
        .unwrap();
    plane
        .approve(&request.request_id, Actor::human("bob"), None, None)
        .unwrap();

    let outcome = plane
        .execute(&request.request_id, "stub", Actor::human("alice"), &router, Some(true))
        .unwrap();

    assert_eq!(outcome.run_id, "r1");
    assert_eq!(outcome.steps_executed, 3);
    assert_eq!(outcome.mode, Mode::DryRun);

    let events = plane.store().get_events(&request.request_id).unwrap();
    let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![
            "DECISION_CREATED",
            "POLICY_ATTACHED",
            "APPROVAL_GRANTED",
            "APPROVAL_GRANTED",
            "EXECUTION_REQUESTED",
            "EXECUTION_STARTED",
            "EXECUTION_COMPLETED",
        ]
    );
    assert_eq!(events.last().unwrap().seq, 6);

    let status = plane.status(&request.request_id, None).unwrap();
    assert_eq!(status.lifecycle.state, DecisionState::Completed);
    assert_eq!(status.decision["executions"][0]["run_id"], "r1");
}

#[test]
fn unapproved_execution_blocked() {
    let plane = plane();
    let router = StubRouter::new();
    let request = plane
        .request(spec("g", Mode::DryRun, 2), Actor::human("creator"))
        .unwrap();
    plane
        .approve(&request.request_id, Actor::human("alice"), None, None)
        .unwrap();

    let err = plane
        .execute(&request.request_id, "stub", Actor::human("alice"), &router, None)
        .unwrap_err();
    assert_eq!(err.code(), "POLICY_BLOCKED");
    assert!(router.calls.lock().unwrap().is_empty());
    // Gate failures leave no execution events behind.
    assert_eq!(plane.store().get_events(&request.request_id).unwrap().len(), 3);
}

#[test]
fn missing_capability_blocks_execution() {
    let plane = plane();
    let router = StubRouter::with_capabilities(&["timeout"]);
    let request = plane
        .request(
            RequestSpec {
                goal: "g".into(),
                mode: Some(Mode::DryRun),
                min_approvals: Some(1),
                require_adapter_capabilities: Some(vec!["timeout".into(), "external".into()]),
                ..RequestSpec::default()
            },
            Actor::human("creator"),
        )
        .unwrap();
    plane
        .approve(&request.request_id, Actor::human("alice"), None, None)
        .unwrap();

    let err = plane
        .execute(&request.request_id, "stub", Actor::human("alice"), &router, None)
        .unwrap_err();
    assert_eq!(err.code(), "POLICY_BLOCKED");
}

#[test]
fn unknown_capabilities_skip_the_gate() {
    let plane = plane();
    let router = StubRouter::new();
    let request = plane
        .request(
            RequestSpec {
                goal: "g".into(),
                mode: Some(Mode::DryRun),
                min_approvals: Some(1),
                require_adapter_capabilities: Some(vec!["timeout".into()]),
                ..RequestSpec::default()
            },
            Actor::human("creator"),
        )
        .unwrap();
    plane
        .approve(&request.request_id, Actor::human("alice"), None, None)
        .unwrap();

    assert!(
        plane
            .execute(&request.request_id, "stub", Actor::human("alice"), &router, None)
            .is_ok()
    );
}

#[test]
fn router_failure_is_recorded_as_event() {
    let plane = plane();
    let router = StubRouter::failing();
    let request = plane
        .request(spec("g", Mode::DryRun, 1), Actor::human("creator"))
        .unwrap();
    plane
        .approve(&request.request_id, Actor::human("alice"), None, None)
        .unwrap();

    let err = plane
        .execute(&request.request_id, "stub", Actor::human("alice"), &router, None)
        .unwrap_err();
    assert_eq!(err.code(), "ROUTER_ERROR");

    let status = plane.status(&request.request_id, None).unwrap();
    assert_eq!(status.lifecycle.state, DecisionState::Failed);
    let reason = &status.lifecycle.blocking_reasons[0];
    assert_eq!(reason.code, BlockingCode::ExecutionFailed);
    assert_eq!(reason.details["error_code"], "ROUTER_ERROR");
    assert!(reason.details["error_message"]
        .as_str()
        .unwrap()
        .contains("adapter exploded"));
}

#[test]
fn router_receives_policy_constraints() {
    let plane = plane();
    let router = StubRouter::new();
    let request = plane
        .request(
            RequestSpec {
                goal: "deploy".into(),
                mode: Some(Mode::DryRun),
                plan: Some("step 1".into()),
                min_approvals: Some(1),
                max_steps: Some(25),
                ..RequestSpec::default()
            },
            Actor::human("creator"),
        )
        .unwrap();
    plane
        .approve(&request.request_id, Actor::human("alice"), None, None)
        .unwrap();
    plane
        .execute(&request.request_id, "stub", Actor::human("alice"), &router, None)
        .unwrap();

    let calls = router.calls.lock().unwrap();
    assert_eq!(calls[0].goal, "deploy");
    assert_eq!(calls[0].plan.as_deref(), Some("step 1"));
    assert_eq!(calls[0].max_steps, Some(25));
    assert!(calls[0].dry_run);
}

// ── Status with expiring approvals ─────────────────────────────────

#[test]
fn expired_approval_blocks_with_expired_code() {
    let plane = plane();
    let request = plane
        .request(spec("g", Mode::DryRun, 1), Actor::human("creator"))
        .unwrap();
    plane
        .approve(
            &request.request_id,
            Actor::human("alice"),
            None,
            Some(Utc::now() - Duration::hours(1)),
        )
        .unwrap();

    let status = plane.status(&request.request_id, None).unwrap();
    assert_eq!(status.lifecycle.state, DecisionState::PendingApproval);
    let reason = &status.lifecycle.blocking_reasons[0];
    assert_eq!(reason.code, BlockingCode::ApprovalExpired);
    assert_eq!(reason.details["expired_count"], 1);
}

#[test]
fn list_requests_returns_created_decisions() {
    let plane = plane();
    let a = plane.request(spec("a", Mode::DryRun, 1), Actor::human("c")).unwrap();
    let b = plane.request(spec("b", Mode::DryRun, 1), Actor::human("c")).unwrap();
    let listed = plane.list_requests(10, 0).unwrap();
    assert_eq!(listed.len(), 2);
    let ids: Vec<_> = listed.iter().map(|(id, _)| id.clone()).collect();
    assert!(ids.contains(&a.request_id));
    assert!(ids.contains(&b.request_id));
}
