// SPDX-License-Identifier: MIT OR Apache-2.0

//! Attestation receipts — the auditable record of one attempt.
//!
//! A receipt is where time and reality enter the attestation system.
//! Receipts are content-addressed, append-only, backend-agnostic, and
//! failure-first: an attempt always produces a receipt, success or not.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use vouch_core::{CanonicalError, content_digest, is_prefixed_digest};

/// Receipt schema version — bump when the canonical dict shape changes.
pub const RECEIPT_VERSION: &str = "0.1";

/// Outcome of one attestation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptStatus {
    /// The backend accepted the submission; confirmation pending.
    Submitted,
    /// The witness is final on the backend.
    Confirmed,
    /// The attempt failed; see `error`.
    Failed,
    /// Not yet decidable; eligible for another cycle.
    Deferred,
}

impl ReceiptStatus {
    /// Stable wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Confirmed => "CONFIRMED",
            Self::Failed => "FAILED",
            Self::Deferred => "DEFERRED",
        }
    }

    /// Parse a wire string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUBMITTED" => Some(Self::Submitted),
            "CONFIRMED" => Some(Self::Confirmed),
            "FAILED" => Some(Self::Failed),
            "DEFERRED" => Some(Self::Deferred),
            _ => None,
        }
    }

    /// Whether this status ends the intent's lifecycle.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable receipt error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptErrorCode {
    /// The backend never responded (transport-level failure).
    BackendUnavailable,
    /// The operation timed out.
    Timeout,
    /// The backend rejected the submission.
    Rejected,
    /// A policy forbade the attempt.
    PolicyBlocked,
    /// Unclassifiable failure.
    Unknown,
}

impl ReceiptErrorCode {
    /// Stable wire string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::Rejected => "REJECTED",
            Self::PolicyBlocked => "POLICY_BLOCKED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse a wire string, mapping unrecognized codes to
    /// [`Self::Unknown`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "BACKEND_UNAVAILABLE" => Self::BackendUnavailable,
            "TIMEOUT" => Self::Timeout,
            "REJECTED" => Self::Rejected,
            "POLICY_BLOCKED" => Self::PolicyBlocked,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ReceiptErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error attached to a failed receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptError {
    /// Stable error code.
    pub code: ReceiptErrorCode,
    /// Free-form diagnostic detail.
    pub detail: Option<String>,
}

impl ReceiptError {
    /// Construct an error with detail.
    #[must_use]
    pub fn with_detail(code: ReceiptErrorCode, detail: impl Into<String>) -> Self {
        Self { code, detail: Some(detail.into()) }
    }

    /// Dict form; `detail` omitted when absent.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("code".into(), Value::from(self.code.as_str()));
        if let Some(detail) = &self.detail {
            map.insert("detail".into(), Value::from(detail.clone()));
        }
        Value::Object(map)
    }
}

/// Errors from receipt construction or parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReceiptBuildError {
    /// `intent_digest` was not a prefixed digest.
    #[error("intent_digest must be \"sha256:\" + 64 lowercase hex, got {0:?}")]
    IntentDigest(String),
    /// `backend` violated `[a-z0-9._-]{1,64}`.
    #[error("invalid backend identifier {0:?}")]
    Backend(String),
    /// `attempt` was zero.
    #[error("attempt must be >= 1")]
    Attempt,
    /// `created_at` was not RFC 3339 UTC.
    #[error("created_at must be RFC3339 UTC, got {0:?}")]
    CreatedAt(String),
    /// An evidence digest value was not a prefixed digest.
    #[error("evidence digest for {0:?} must be a prefixed sha256 digest")]
    EvidenceDigest(String),
    /// A CONFIRMED receipt had an empty proof.
    #[error("CONFIRMED receipts must carry a non-empty proof")]
    MissingProof,
    /// A parsed receipt dict was missing a field or had the wrong shape.
    #[error("invalid receipt field {0:?}")]
    Field(&'static str),
}

fn valid_backend(backend: &str) -> bool {
    (1..=64).contains(&backend.len())
        && backend
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-'))
}

fn valid_rfc3339_utc(ts: &str) -> bool {
    (ts.ends_with('Z') || ts.ends_with("+00:00"))
        && chrono::DateTime::parse_from_rfc3339(ts).is_ok()
}

/// An immutable attestation receipt.
///
/// `(intent_digest, attempt, created_at)` uniquely identify an attempt;
/// the receipt digest content-addresses the whole record.
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationReceipt {
    /// Prefixed digest of the intent this receipt belongs to.
    pub intent_digest: String,
    /// Backend identifier (e.g. `"xrpl"`).
    pub backend: String,
    /// Attempt number, queue-owned, starts at 1.
    pub attempt: u32,
    /// Outcome of the attempt.
    pub status: ReceiptStatus,
    /// RFC 3339 UTC timestamp of the attempt.
    pub created_at: String,
    /// Named, prefixed digests of wire-level evidence.
    pub evidence_digests: BTreeMap<String, String>,
    /// Backend-specific proof (tx hash, ledger index, ...).
    pub proof: BTreeMap<String, Value>,
    /// Failure information, when the attempt failed.
    pub error: Option<ReceiptError>,
}

impl AttestationReceipt {
    /// Construct a validated receipt.
    ///
    /// # Errors
    ///
    /// Returns a [`ReceiptBuildError`] describing the first violated
    /// invariant.
    pub fn new(
        intent_digest: impl Into<String>,
        backend: impl Into<String>,
        attempt: u32,
        status: ReceiptStatus,
        created_at: impl Into<String>,
        evidence_digests: BTreeMap<String, String>,
        proof: BTreeMap<String, Value>,
        error: Option<ReceiptError>,
    ) -> Result<Self, ReceiptBuildError> {
        let intent_digest = intent_digest.into();
        let backend = backend.into();
        let created_at = created_at.into();

        if !is_prefixed_digest(&intent_digest) {
            return Err(ReceiptBuildError::IntentDigest(intent_digest));
        }
        if !valid_backend(&backend) {
            return Err(ReceiptBuildError::Backend(backend));
        }
        if attempt < 1 {
            return Err(ReceiptBuildError::Attempt);
        }
        if !valid_rfc3339_utc(&created_at) {
            return Err(ReceiptBuildError::CreatedAt(created_at));
        }
        for (key, value) in &evidence_digests {
            if !is_prefixed_digest(value) {
                return Err(ReceiptBuildError::EvidenceDigest(key.clone()));
            }
        }
        if status == ReceiptStatus::Confirmed && proof.is_empty() {
            return Err(ReceiptBuildError::MissingProof);
        }

        Ok(Self {
            intent_digest,
            backend,
            attempt,
            status,
            created_at,
            evidence_digests,
            proof,
            error,
        })
    }

    /// The canonical dict: empty maps and absent error omitted.
    #[must_use]
    pub fn to_canonical_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("receipt_version".into(), Value::from(RECEIPT_VERSION));
        map.insert("intent_digest".into(), Value::from(self.intent_digest.clone()));
        map.insert("backend".into(), Value::from(self.backend.clone()));
        map.insert("attempt".into(), Value::from(self.attempt));
        map.insert("status".into(), Value::from(self.status.as_str()));
        map.insert("created_at".into(), Value::from(self.created_at.clone()));
        if !self.evidence_digests.is_empty() {
            map.insert(
                "evidence_digests".into(),
                Value::Object(
                    self.evidence_digests
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                        .collect(),
                ),
            );
        }
        if !self.proof.is_empty() {
            map.insert(
                "proof".into(),
                Value::Object(self.proof.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            );
        }
        if let Some(error) = &self.error {
            map.insert("error".into(), error.to_value());
        }
        Value::Object(map)
    }

    /// Serializable dict form — same shape as the canonical dict.
    #[must_use]
    pub fn to_value(&self) -> Value {
        self.to_canonical_value()
    }

    /// SHA-256 digest of the canonical dict (raw hex). Attempt and
    /// timestamp are inside, so every attempt is uniquely addressable.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if serialization fails.
    pub fn receipt_digest(&self) -> Result<String, CanonicalError> {
        content_digest(&self.to_canonical_value())
    }

    /// Parse a receipt back from its dict form, re-running validation.
    ///
    /// # Errors
    ///
    /// Returns a [`ReceiptBuildError`] on missing fields or invariant
    /// violations.
    pub fn from_value(value: &Value) -> Result<Self, ReceiptBuildError> {
        let obj = value.as_object().ok_or(ReceiptBuildError::Field("receipt"))?;
        let get_str = |key: &'static str| -> Result<&str, ReceiptBuildError> {
            obj.get(key).and_then(Value::as_str).ok_or(ReceiptBuildError::Field(key))
        };

        let attempt = obj
            .get("attempt")
            .and_then(Value::as_u64)
            .ok_or(ReceiptBuildError::Field("attempt"))?;
        let status = ReceiptStatus::parse(get_str("status")?)
            .ok_or(ReceiptBuildError::Field("status"))?;

        let mut evidence_digests = BTreeMap::new();
        if let Some(raw) = obj.get("evidence_digests") {
            let raw = raw.as_object().ok_or(ReceiptBuildError::Field("evidence_digests"))?;
            for (key, value) in raw {
                let value = value
                    .as_str()
                    .ok_or(ReceiptBuildError::Field("evidence_digests"))?;
                evidence_digests.insert(key.clone(), value.to_string());
            }
        }

        let mut proof = BTreeMap::new();
        if let Some(raw) = obj.get("proof") {
            let raw = raw.as_object().ok_or(ReceiptBuildError::Field("proof"))?;
            for (key, value) in raw {
                proof.insert(key.clone(), value.clone());
            }
        }

        let error = match obj.get("error") {
            None | Some(Value::Null) => None,
            Some(raw) => {
                let raw = raw.as_object().ok_or(ReceiptBuildError::Field("error"))?;
                let code = raw
                    .get("code")
                    .and_then(Value::as_str)
                    .ok_or(ReceiptBuildError::Field("error"))?;
                Some(ReceiptError {
                    code: ReceiptErrorCode::parse(code),
                    detail: raw.get("detail").and_then(Value::as_str).map(str::to_string),
                })
            }
        };

        Self::new(
            get_str("intent_digest")?,
            get_str("backend")?,
            u32::try_from(attempt).map_err(|_| ReceiptBuildError::Field("attempt"))?,
            status,
            get_str("created_at")?,
            evidence_digests,
            proof,
            error,
        )
    }
}
