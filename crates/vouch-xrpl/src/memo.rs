// SPDX-License-Identifier: MIT OR Apache-2.0

//! The attestation memo format.
//!
//! The memo is the on-ledger footprint: short keys, hash-only content,
//! no labels, no PII, no secrets. Serialized as canonical JSON before
//! hex encoding; the memo digest covers the canonical bytes, not the
//! hex form.

use std::collections::BTreeMap;

use vouch_core::{CanonicalError, DIGEST_PREFIX, sha256_hex};
use vouch_queue::AttestationIntent;

use crate::PlanError;

/// Memo schema version — bump when the payload shape changes.
pub const MEMO_VERSION: &str = "0.1";

/// Memo type identifier carried in the transaction's `MemoType`.
pub const MEMO_TYPE: &str = "nexus.attest";

/// Maximum decoded payload size in bytes. Conservative limit under
/// XRPL's ~1KB memo ceiling, leaving room for hex overhead.
pub const MAX_MEMO_BYTES: usize = 700;

/// Hex-encoded [`MEMO_TYPE`] for the XRPL `MemoType` field.
#[must_use]
pub fn memo_type_hex() -> String {
    hex::encode(MEMO_TYPE.as_bytes())
}

/// Build the memo payload from an intent: short keys, string values,
/// absent optionals omitted. Labels never enter the memo — they stay in
/// the intent, off-ledger.
///
/// # Errors
///
/// Returns [`CanonicalError`] if the intent digest cannot be computed.
pub fn build_memo_payload(
    intent: &AttestationIntent,
) -> Result<BTreeMap<String, String>, CanonicalError> {
    let mut payload = BTreeMap::new();
    payload.insert("v".to_string(), MEMO_VERSION.to_string());
    payload.insert("t".to_string(), MEMO_TYPE.to_string());
    payload.insert(
        "id".to_string(),
        format!("{DIGEST_PREFIX}{}", intent.intent_digest()?),
    );
    payload.insert("st".to_string(), intent.subject_type().to_string());
    payload.insert("bd".to_string(), intent.binding_digest().to_string());

    if let Some(pv) = intent.package_version() {
        payload.insert("pv".to_string(), pv.to_string());
    }
    if let Some(rid) = intent.run_id() {
        payload.insert("rid".to_string(), rid.to_string());
    }
    if let Some(env) = intent.env() {
        payload.insert("env".to_string(), env.to_string());
    }
    if let Some(ten) = intent.tenant() {
        payload.insert("ten".to_string(), ten.to_string());
    }
    Ok(payload)
}

/// Serialize a memo payload to canonical JSON bytes.
///
/// # Errors
///
/// Returns [`CanonicalError`] if serialization fails.
pub fn serialize_memo(payload: &BTreeMap<String, String>) -> Result<Vec<u8>, CanonicalError> {
    vouch_core::canonical_json_bytes(payload)
}

/// Prefixed SHA-256 digest of the memo's canonical bytes.
#[must_use]
pub fn memo_digest(payload_bytes: &[u8]) -> String {
    format!("{DIGEST_PREFIX}{}", sha256_hex(payload_bytes))
}

/// Hex-encode memo bytes for the XRPL `MemoData` field.
#[must_use]
pub fn encode_memo_hex(payload_bytes: &[u8]) -> String {
    hex::encode(payload_bytes)
}

/// Enforce the decoded-size limit.
///
/// # Errors
///
/// Returns [`PlanError::MemoTooLarge`] above [`MAX_MEMO_BYTES`].
pub fn validate_memo_size(payload_bytes: &[u8]) -> Result<(), PlanError> {
    if payload_bytes.len() > MAX_MEMO_BYTES {
        return Err(PlanError::MemoTooLarge {
            size: payload_bytes.len(),
            max: MAX_MEMO_BYTES,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vouch_queue::IntentFields;

    fn intent(fields: IntentFields) -> AttestationIntent {
        AttestationIntent::new(
            "vouch.audit_package",
            format!("sha256:{}", "a".repeat(64)),
            fields,
        )
        .unwrap()
    }

    #[test]
    fn payload_has_required_short_keys() {
        let payload = build_memo_payload(&intent(IntentFields::default())).unwrap();
        assert_eq!(payload["v"], MEMO_VERSION);
        assert_eq!(payload["t"], MEMO_TYPE);
        assert!(payload["id"].starts_with("sha256:"));
        assert_eq!(payload["st"], "vouch.audit_package");
        assert!(payload["bd"].starts_with("sha256:"));
        assert!(!payload.contains_key("pv"));
        assert!(!payload.contains_key("rid"));
        assert!(!payload.contains_key("env"));
        assert!(!payload.contains_key("ten"));
    }

    #[test]
    fn optional_fields_use_short_keys() {
        let payload = build_memo_payload(&intent(IntentFields {
            package_version: Some("0.6".into()),
            run_id: Some("run_01H".into()),
            env: Some("prod".into()),
            tenant: Some("acme".into()),
            ..IntentFields::default()
        }))
        .unwrap();
        assert_eq!(payload["pv"], "0.6");
        assert_eq!(payload["rid"], "run_01H");
        assert_eq!(payload["env"], "prod");
        assert_eq!(payload["ten"], "acme");
    }

    #[test]
    fn labels_never_reach_the_memo() {
        let payload = build_memo_payload(&intent(IntentFields {
            labels: std::collections::BTreeMap::from([(
                "workflow".to_string(),
                "payroll".to_string(),
            )]),
            ..IntentFields::default()
        }))
        .unwrap();
        assert!(payload.values().all(|v| !v.contains("payroll")));
        assert!(!payload.contains_key("labels"));
    }

    #[test]
    fn digest_covers_canonical_bytes_not_hex() {
        let payload = build_memo_payload(&intent(IntentFields::default())).unwrap();
        let bytes = serialize_memo(&payload).unwrap();
        let digest = memo_digest(&bytes);
        assert_eq!(digest, format!("sha256:{}", vouch_core::sha256_hex(&bytes)));
        assert_ne!(
            digest,
            format!(
                "sha256:{}",
                vouch_core::sha256_hex(encode_memo_hex(&bytes).as_bytes())
            )
        );
    }

    #[test]
    fn hex_roundtrips() {
        let payload = build_memo_payload(&intent(IntentFields::default())).unwrap();
        let bytes = serialize_memo(&payload).unwrap();
        assert_eq!(hex::decode(encode_memo_hex(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn size_boundary_is_exact() {
        assert!(validate_memo_size(&vec![0u8; MAX_MEMO_BYTES]).is_ok());
        let err = validate_memo_size(&vec![0u8; MAX_MEMO_BYTES + 1]).unwrap_err();
        assert!(matches!(err, PlanError::MemoTooLarge { size: 701, max: 700 }));
    }
}
