// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod export;
mod import;
mod types;

pub use export::{EXPORT_METHOD_ID, Export, export_decision};
pub use import::{
    ConflictMode, ImportOptions, ImportReport, ReplayReport, import_bundle,
    parse_bundle_from_json,
};
pub use types::{
    BUNDLE_VERSION, BundleDecision, BundleEvent, BundleIntegrity, BundleProvenance,
    BundleRouterLink, BundleTemplateSnapshot, DecisionBundle, ProvenanceRecord,
    compute_bundle_digest, compute_canonical_payload, compute_router_link_digest,
    validate_bundle_schema,
};

use vouch_core::CanonicalError;
use vouch_store::StoreError;

/// Errors from bundle export and import, with stable public codes.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// The referenced decision does not exist.
    #[error("decision not found: {0}")]
    DecisionNotFound(String),
    /// The bundle failed schema validation or parsing.
    #[error("{0}")]
    InvalidSchema(String),
    /// The recomputed canonical digest disagreed with the bundle.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// The digest the bundle claims (raw hex).
        expected: String,
        /// The digest recomputed from bundle content (raw hex).
        actual: String,
    },
    /// A decision with this id already exists in the target store.
    #[error("decision already exists: {0}")]
    DecisionExists(String),
    /// Unrecognized conflict mode string.
    #[error("invalid conflict_mode: {0}")]
    ConflictModeInvalid(String),
    /// Imported events do not form a valid, replayable log.
    #[error("replay validation failed: {0}")]
    ReplayInvalid(String),
    /// The atomic import transaction failed; nothing was written.
    #[error("{0}")]
    AtomicityFailed(String),
    /// Canonical encoding failed.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BundleError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DecisionNotFound(_) => "DECISION_NOT_FOUND",
            Self::InvalidSchema(_) => "BUNDLE_INVALID_SCHEMA",
            Self::IntegrityMismatch { .. } => "INTEGRITY_MISMATCH",
            Self::DecisionExists(_) => "DECISION_EXISTS",
            Self::ConflictModeInvalid(_) => "CONFLICT_MODE_INVALID",
            Self::ReplayInvalid(_) => "REPLAY_INVALID",
            Self::AtomicityFailed(_) => "IMPORT_ATOMICITY_FAILED",
            Self::Canonical(_) => "CANONICAL_ERROR",
            Self::Store(_) => "STORE_ERROR",
        }
    }
}
