// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical JSON encoding and SHA-256 content digests.
//!
//! Every digest in the system is computed over canonical JSON: map keys
//! sorted recursively, no intra-value whitespace, non-ASCII written as
//! UTF-8 (never `\u`-escaped). Two systems holding the same logical value
//! must produce identical bytes, or cross-system verification breaks.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Prefix used for all digest strings exchanged on the wire.
pub const DIGEST_PREFIX: &str = "sha256:";

/// Errors from canonical encoding.
#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    /// The value could not be serialized to JSON.
    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Produce the canonical JSON string for a value.
///
/// The value is first converted to [`serde_json::Value`], whose object map
/// is key-ordered, then written compactly. Non-finite floats cannot be
/// represented by [`serde_json::Number`], so `NaN`/`±Inf` never reach the
/// encoder.
///
/// # Errors
///
/// Returns [`CanonicalError::Json`] if the value cannot be serialized.
///
/// # Examples
///
/// ```
/// use serde_json::json;
///
/// let v = json!({"b": 1, "a": {"z": true, "y": "é"}});
/// let s = vouch_core::canonical_json(&v).unwrap();
/// assert_eq!(s, r#"{"a":{"y":"é","z":true},"b":1}"#);
/// ```
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&v)?)
}

/// Canonical JSON as UTF-8 bytes.
///
/// # Errors
///
/// Returns [`CanonicalError::Json`] if the value cannot be serialized.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    Ok(canonical_json(value)?.into_bytes())
}

/// Compute the hex-encoded SHA-256 digest of `bytes` (64 lowercase hex).
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// SHA-256 digest of a value's canonical JSON form (raw hex, no prefix).
///
/// # Errors
///
/// Returns [`CanonicalError::Json`] if the value cannot be serialized.
///
/// # Examples
///
/// ```
/// use serde_json::json;
///
/// let d1 = vouch_core::content_digest(&json!({"a": 1, "b": 2})).unwrap();
/// let d2 = vouch_core::content_digest(&json!({"b": 2, "a": 1})).unwrap();
/// assert_eq!(d1, d2);
/// assert_eq!(d1.len(), 64);
/// ```
pub fn content_digest<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    Ok(sha256_hex(&canonical_json_bytes(value)?))
}

/// Content digest in prefixed form (`"sha256:<64 hex>"`).
///
/// # Errors
///
/// Returns [`CanonicalError::Json`] if the value cannot be serialized.
pub fn prefixed_content_digest<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    Ok(format!("{DIGEST_PREFIX}{}", content_digest(value)?))
}

/// Returns `true` if `s` is a well-formed prefixed digest:
/// `"sha256:"` followed by exactly 64 lowercase hex characters.
#[must_use]
pub fn is_prefixed_digest(s: &str) -> bool {
    match s.strip_prefix(DIGEST_PREFIX) {
        Some(hex) => hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()),
        None => false,
    }
}

/// Strip the `"sha256:"` prefix if present.
#[must_use]
pub fn strip_digest_prefix(s: &str) -> &str {
    s.strip_prefix(DIGEST_PREFIX).unwrap_or(s)
}

/// Verify that a value's content digest matches `expected`.
///
/// `expected` may be raw hex or prefixed. Returns `false` when the value
/// cannot be serialized.
#[must_use]
pub fn verify_digest<T: Serialize>(value: &T, expected: &str) -> bool {
    match content_digest(value) {
        Ok(actual) => actual == strip_digest_prefix(expected),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    #[test]
    fn keys_sorted_recursively() {
        let v = json!({"z": {"b": 1, "a": 2}, "a": 3});
        assert_eq!(
            canonical_json(&v).unwrap(),
            r#"{"a":3,"z":{"a":2,"b":1}}"#
        );
    }

    #[test]
    fn no_whitespace_no_trailing_newline() {
        let s = canonical_json(&json!({"a": [1, 2], "b": "x"})).unwrap();
        assert!(!s.contains(' '));
        assert!(!s.ends_with('\n'));
    }

    #[test]
    fn non_ascii_stays_utf8() {
        let s = canonical_json(&json!({"name": "Søren π"})).unwrap();
        assert!(s.contains("Søren π"));
        assert!(!s.contains("\\u"));
    }

    #[test]
    fn nan_is_unrepresentable() {
        // serde_json::Number cannot hold a non-finite float, so the
        // canonical layer never sees one.
        assert!(serde_json::Number::from_f64(f64::NAN).is_none());
        assert!(serde_json::Number::from_f64(f64::INFINITY).is_none());
    }

    #[test]
    fn digest_is_64_lowercase_hex() {
        let d = content_digest(&json!({"k": "v"})).unwrap();
        assert_eq!(d.len(), 64);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn prefixed_digest_roundtrip() {
        let d = prefixed_content_digest(&json!({"k": "v"})).unwrap();
        assert!(is_prefixed_digest(&d));
        assert!(verify_digest(&json!({"k": "v"}), &d));
        assert!(!verify_digest(&json!({"k": "w"}), &d));
    }

    #[test]
    fn prefixed_digest_rejects_uppercase_and_short() {
        assert!(!is_prefixed_digest(&format!("sha256:{}", "A".repeat(64))));
        assert!(!is_prefixed_digest("sha256:abc"));
        assert!(!is_prefixed_digest(&"a".repeat(71)));
    }

    fn arb_json(depth: u32) -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 àéü]{0,12}".prop_map(Value::from),
        ];
        leaf.prop_recursive(depth, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn parse_of_canonical_is_canonical(v in arb_json(3)) {
            let once = canonical_json(&v).unwrap();
            let parsed: Value = serde_json::from_str(&once).unwrap();
            let twice = canonical_json(&parsed).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
