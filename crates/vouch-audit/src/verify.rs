// SPDX-License-Identifier: MIT OR Apache-2.0

//! The trust verifier: a fixed checklist over an audit package.
//!
//! Every check always runs; one failure never short-circuits the rest.
//! The caller gets the full picture in one pass.

use serde::Serialize;
use serde_json::{Map, Value, json};

use vouch_core::content_digest;

use vouch_bundle::compute_bundle_digest;

use crate::package::{AuditPackage, RouterSection, compute_binding_digest};

/// Outcome of one verification check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Stable check name.
    pub name: &'static str,
    /// Whether the check passed.
    pub ok: bool,
    /// Expected value, on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// Actual value, on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    /// Why the check could not be evaluated, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CheckResult {
    fn pass(name: &'static str) -> Self {
        Self { name, ok: true, expected: None, actual: None, reason: None }
    }

    fn compare(name: &'static str, expected: &str, actual: &str) -> Self {
        if expected == actual {
            Self::pass(name)
        } else {
            Self {
                name,
                ok: false,
                expected: Some(expected.to_string()),
                actual: Some(actual.to_string()),
                reason: None,
            }
        }
    }

    fn fail(name: &'static str, reason: impl Into<String>) -> Self {
        Self { name, ok: false, expected: None, actual: None, reason: Some(reason.into()) }
    }
}

/// Aggregate verification outcome.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    /// `true` when every check passed.
    pub ok: bool,
    /// All checks, in fixed order.
    pub checks: Vec<CheckResult>,
}

impl VerificationReport {
    /// Number of passing checks.
    #[must_use]
    pub fn passed(&self) -> usize {
        self.checks.iter().filter(|c| c.ok).count()
    }

    /// Number of failing checks.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.checks.len() - self.passed()
    }

    /// Dict form with pass/fail counters.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "ok": self.ok,
            "passed": self.passed(),
            "failed": self.failed(),
            "total": self.checks.len(),
            "checks": self.checks,
        })
    }
}

/// Verify an audit package against its own digests.
///
/// Checklist (fixed order):
///
/// 1. `binding_digest` — recompute from package fields.
/// 2. `control_bundle_digest` — recompute the control bundle digest.
/// 3. `binding_control_match` — binding vs control bundle integrity.
/// 4. `binding_router_match` — binding vs router ref / embedded bundle.
/// 5. `binding_link_match` — binding vs control bundle router link.
/// 6. `router_bundle_digest` (embedded only) — recompute the embedded
///    bundle's digest from its content.
#[must_use]
pub fn verify_audit_package(package: &AuditPackage) -> VerificationReport {
    let mut checks = Vec::new();

    // 1. binding_digest
    checks.push(
        match compute_binding_digest(
            &package.package_version,
            &package.binding.control_digest,
            &package.binding.router_digest,
            &package.binding.control_router_link_digest,
        ) {
            Ok(recomputed) => CheckResult::compare(
                "binding_digest",
                &package.integrity.binding_digest,
                &format!("sha256:{recomputed}"),
            ),
            Err(e) => CheckResult::fail("binding_digest", e.to_string()),
        },
    );

    // 2. control_bundle_digest
    let control = &package.control_bundle;
    checks.push(
        match compute_bundle_digest(
            &control.bundle_version,
            &control.decision,
            &control.events,
            &control.template_snapshot,
            &control.router_link,
        ) {
            Ok(recomputed) => CheckResult::compare(
                "control_bundle_digest",
                &control.integrity.canonical_digest,
                &format!("sha256:{recomputed}"),
            ),
            Err(e) => CheckResult::fail("control_bundle_digest", e.to_string()),
        },
    );

    // 3. binding_control_match
    checks.push(CheckResult::compare(
        "binding_control_match",
        &control.integrity.canonical_digest,
        &package.binding.control_digest,
    ));

    // 4. binding_router_match
    checks.push(match &package.router {
        RouterSection::Reference { reference } => CheckResult::compare(
            "binding_router_match",
            &reference.digest,
            &package.binding.router_digest,
        ),
        RouterSection::Embedded { bundle } => {
            match bundle
                .get("integrity")
                .and_then(|i| i.get("canonical_digest"))
                .and_then(Value::as_str)
            {
                Some(stated) => CheckResult::compare(
                    "binding_router_match",
                    stated,
                    &package.binding.router_digest,
                ),
                None => CheckResult::fail(
                    "binding_router_match",
                    "embedded router bundle has no integrity.canonical_digest",
                ),
            }
        }
    });

    // 5. binding_link_match
    checks.push(
        match &package.control_bundle.router_link.control_router_link_digest {
            Some(link) => CheckResult::compare(
                "binding_link_match",
                link,
                &package.binding.control_router_link_digest,
            ),
            None => CheckResult::fail(
                "binding_link_match",
                "control bundle has no control_router_link_digest",
            ),
        },
    );

    // 6. router_bundle_digest (embedded only)
    if let RouterSection::Embedded { bundle } = &package.router {
        checks.push(verify_embedded_router_digest(bundle));
    }

    let ok = checks.iter().all(|c| c.ok);
    VerificationReport { ok, checks }
}

/// Recompute an embedded router bundle's digest from its content: the
/// digest input is the bundle dict minus its `integrity`, `provenance`,
/// and `meta` sections.
fn verify_embedded_router_digest(bundle: &Value) -> CheckResult {
    const NAME: &str = "router_bundle_digest";

    let Some(obj) = bundle.as_object() else {
        return CheckResult::fail(NAME, "embedded router bundle is not an object");
    };
    let Some(stated) = obj
        .get("integrity")
        .and_then(|i| i.get("canonical_digest"))
        .and_then(Value::as_str)
    else {
        return CheckResult::fail(NAME, "embedded router bundle has no integrity.canonical_digest");
    };

    let payload: Map<String, Value> = obj
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), "integrity" | "provenance" | "meta"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    match content_digest(&Value::Object(payload)) {
        Ok(recomputed) => CheckResult::compare(NAME, stated, &format!("sha256:{recomputed}")),
        Err(e) => CheckResult::fail(NAME, e.to_string()),
    }
}
