// SPDX-License-Identifier: MIT OR Apache-2.0

//! The governance policy model and the execution gate.
//!
//! A policy says how many approvals an operation needs, which modes it may
//! run in, and what the router adapter must be capable of. Construction
//! validates the invariants once; everything downstream can trust them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::event::{Mode, PolicyAttachedPayload};

/// Errors from policy construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// `min_approvals` was below 1.
    #[error("min_approvals must be at least 1, got {0}")]
    MinApprovals(u32),
    /// `allowed_modes` was empty.
    #[error("allowed_modes cannot be empty")]
    EmptyModes,
    /// `max_steps` was specified as 0.
    #[error("max_steps must be at least 1 if specified")]
    MaxSteps,
}

/// A validated governance policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
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
}

impl Policy {
    /// Construct a policy, validating its invariants.
    ///
    /// # Errors
    ///
    /// Returns a [`PolicyError`] when `min_approvals < 1`, `allowed_modes`
    /// is empty, or `max_steps == Some(0)`.
    pub fn new(
        min_approvals: u32,
        allowed_modes: Vec<Mode>,
        require_adapter_capabilities: Vec<String>,
        max_steps: Option<u32>,
        labels: Vec<String>,
    ) -> Result<Self, PolicyError> {
        if min_approvals < 1 {
            return Err(PolicyError::MinApprovals(min_approvals));
        }
        if allowed_modes.is_empty() {
            return Err(PolicyError::EmptyModes);
        }
        if max_steps == Some(0) {
            return Err(PolicyError::MaxSteps);
        }
        Ok(Self {
            min_approvals,
            allowed_modes,
            require_adapter_capabilities,
            max_steps,
            labels,
        })
    }

    /// Whether `mode` is permitted by this policy.
    #[must_use]
    pub fn allows_mode(&self, mode: Mode) -> bool {
        self.allowed_modes.contains(&mode)
    }

    /// Compile a router run request from this policy plus decision fields.
    ///
    /// None-valued fields are omitted, not set to null — the compiled
    /// request is digested and dispatched as-is.
    #[must_use]
    pub fn compile_to_router_request(
        &self,
        goal: &str,
        plan: Option<&str>,
        adapter_id: &str,
        dry_run: bool,
    ) -> Value {
        let mut req = Map::new();
        req.insert("goal".into(), Value::from(goal));
        req.insert("adapter_id".into(), Value::from(adapter_id));
        req.insert("dry_run".into(), Value::from(dry_run));
        if let Some(plan) = plan {
            req.insert("plan".into(), Value::from(plan));
        }
        if let Some(max_steps) = self.max_steps {
            req.insert("max_steps".into(), Value::from(max_steps));
        }
        if !self.require_adapter_capabilities.is_empty() {
            req.insert(
                "require_capabilities".into(),
                Value::from(self.require_adapter_capabilities.clone()),
            );
        }
        Value::Object(req)
    }
}

/// Outcome of the execution gate: all failures collected, not just the
/// first.
#[derive(Debug, Clone, Default)]
pub struct PolicyValidationResult {
    /// Human-readable reasons the request is not executable.
    pub errors: Vec<String>,
}

impl PolicyValidationResult {
    /// `true` when no gate failed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Gate an execution request against a policy.
///
/// Checks mode allowance, approval count, and adapter capabilities.
/// `adapter_capabilities = None` means "unknown" and skips that check.
#[must_use]
pub fn validate_execution_request(
    policy: &Policy,
    mode: Mode,
    approval_count: u32,
    adapter_capabilities: Option<&BTreeSet<String>>,
) -> PolicyValidationResult {
    let mut errors = Vec::new();

    if !policy.allows_mode(mode) {
        errors.push(format!("Mode '{mode}' not allowed by policy"));
    }

    if approval_count < policy.min_approvals {
        errors.push(format!(
            "Insufficient approvals: {approval_count}/{}",
            policy.min_approvals
        ));
    }

    if let Some(caps) = adapter_capabilities {
        let missing: Vec<&str> = policy
            .require_adapter_capabilities
            .iter()
            .filter(|c| !caps.contains(c.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            errors.push(format!(
                "Adapter missing required capabilities: {}",
                missing.join(", ")
            ));
        }
    }

    PolicyValidationResult { errors }
}

impl TryFrom<&PolicyAttachedPayload> for Policy {
    type Error = PolicyError;

    fn try_from(p: &PolicyAttachedPayload) -> Result<Self, Self::Error> {
        Self::new(
            p.min_approvals,
            p.allowed_modes.clone(),
            p.require_adapter_capabilities.clone(),
            p.max_steps,
            p.labels.clone(),
        )
    }
}
