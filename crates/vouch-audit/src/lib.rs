// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod export;
mod package;
mod verify;

pub use export::{AUDIT_EXPORT_METHOD_ID, AuditExport, AuditExportOptions, export_audit_package};
pub use package::{
    AuditBinding, AuditIntegrity, AuditPackage, PACKAGE_VERSION, RouterRef, RouterSection,
    compute_binding_digest,
};
pub use verify::{CheckResult, VerificationReport, verify_audit_package};

use vouch_bundle::BundleError;
use vouch_core::CanonicalError;

/// Errors from audit package export, with stable public codes.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The decision has no router execution link.
    #[error("{0}")]
    NoRouterLink(String),
    /// An embedded router bundle's digest contradicts the control link.
    #[error(
        "router bundle digest {router_digest} does not match control bundle's \
         router_result_digest {control_digest}"
    )]
    RouterDigestMismatch {
        /// Digest stated by the router bundle.
        router_digest: String,
        /// Digest recorded in the control bundle's router link.
        control_digest: String,
    },
    /// The control and router link digests disagree.
    #[error("control-router link digest mismatch: {0}")]
    LinkDigestMismatch(String),
    /// The supplied router bundle is unusable.
    #[error("invalid router bundle: {0}")]
    InvalidRouterBundle(String),
    /// Canonical encoding failed.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    /// The underlying control bundle export failed.
    #[error(transparent)]
    Bundle(#[from] BundleError),
}

impl AuditError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoRouterLink(_) => "NO_ROUTER_LINK",
            Self::RouterDigestMismatch { .. } => "ROUTER_DIGEST_MISMATCH",
            Self::LinkDigestMismatch(_) => "LINK_DIGEST_MISMATCH",
            Self::InvalidRouterBundle(_) => "ROUTER_BUNDLE_INVALID",
            Self::Canonical(_) => "CANONICAL_ERROR",
            Self::Bundle(err) => err.code(),
        }
    }
}
