// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod plane;
mod router;

pub use plane::{
    ApprovalOutcome, ControlPlane, ExecutionOutcome, RequestOutcome, RequestSpec, StatusView,
};
pub use router::{Router, RouterRunRequest};

use vouch_core::{CanonicalError, Mode, PolicyError};
use vouch_projection::DecisionState;
use vouch_store::StoreError;

/// Errors from control plane commands, with stable public codes.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The referenced decision does not exist.
    #[error("decision not found: {0}")]
    DecisionNotFound(String),
    /// The referenced template does not exist.
    #[error("template not found: {0}")]
    TemplateNotFound(String),
    /// The command is not valid in the decision's current state.
    #[error("cannot {action} decision in state {state}")]
    InvalidState {
        /// The attempted command.
        action: &'static str,
        /// The decision's current state.
        state: DecisionState,
    },
    /// The actor already holds an approval for this decision.
    #[error("actor {0} has already approved this request")]
    DuplicateApproval(String),
    /// The actor has no approval to revoke.
    #[error("actor {0} has not approved this request")]
    ApprovalNotFound(String),
    /// The actor's approval is already revoked.
    #[error("actor {0}'s approval is already revoked")]
    ApprovalAlreadyRevoked(String),
    /// The requested mode is not permitted.
    #[error("requested mode '{mode}' not in allowed modes {allowed:?}")]
    ModeNotAllowed {
        /// The requested mode.
        mode: Mode,
        /// The modes the policy permits.
        allowed: Vec<Mode>,
    },
    /// The decision has no policy attached.
    #[error("decision {0} has no policy attached")]
    NoPolicy(String),
    /// The execution gate rejected the request.
    #[error("policy validation failed: {}", .0.join("; "))]
    PolicyBlocked(Vec<String>),
    /// The router reported a failure (also recorded as an event).
    #[error("router execution failed: {0}")]
    RouterFailed(String),
    /// The decision's event log does not replay cleanly.
    #[error("replay failed: {0}")]
    ReplayInvalid(String),
    /// Policy construction failed.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// Canonical encoding failed.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ControlError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DecisionNotFound(_) => "DECISION_NOT_FOUND",
            Self::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::DuplicateApproval(_) => "DUPLICATE_APPROVAL",
            Self::ApprovalNotFound(_) => "APPROVAL_NOT_FOUND",
            Self::ApprovalAlreadyRevoked(_) => "APPROVAL_ALREADY_REVOKED",
            Self::ModeNotAllowed { .. } => "MODE_NOT_ALLOWED",
            Self::NoPolicy(_) => "NO_POLICY",
            Self::PolicyBlocked(_) => "POLICY_BLOCKED",
            Self::RouterFailed(_) => "ROUTER_ERROR",
            Self::ReplayInvalid(_) => "REPLAY_INVALID",
            Self::Policy(_) => "POLICY_INVALID",
            Self::Canonical(_) => "CANONICAL_ERROR",
            Self::Store(err) => err.code(),
        }
    }
}

#[cfg(test)]
mod tests;
