// SPDX-License-Identifier: MIT OR Apache-2.0

//! Attestation intents — what you want witnessed.
//!
//! An intent is a compact, canonical description of an artifact to be
//! attested: stable, hashable, policy-free, backend-agnostic, timeless,
//! and secret-free. Wall-clock time belongs to receipts, never intents.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use vouch_core::{CanonicalError, content_digest, is_prefixed_digest};

/// Intent schema version — bump when the canonical dict shape changes.
pub const INTENT_VERSION: &str = "0.1";

/// Maximum number of labels on one intent.
pub const LABELS_MAX_COUNT: usize = 32;

/// Maximum label value length in bytes.
pub const LABEL_VALUE_MAX: usize = 256;

/// Errors from intent construction or parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntentError {
    /// `binding_digest` was not `"sha256:"` + 64 lowercase hex.
    #[error("binding_digest must be \"sha256:\" + 64 lowercase hex, got {0:?}")]
    BindingDigest(String),
    /// `subject_type` was empty.
    #[error("subject_type cannot be empty")]
    SubjectType,
    /// A label key violated `[a-zA-Z0-9._-]{1,64}`.
    #[error("invalid label key {0:?}")]
    LabelKey(String),
    /// A label value was too long or contained control characters.
    #[error("invalid label value for key {0:?}")]
    LabelValue(String),
    /// More than [`LABELS_MAX_COUNT`] labels.
    #[error("too many labels: {0} (max {LABELS_MAX_COUNT})")]
    LabelCount(usize),
    /// A parsed intent dict was missing a required field or had the
    /// wrong shape.
    #[error("invalid intent field {0:?}")]
    Field(&'static str),
}

fn valid_label_key(key: &str) -> bool {
    (1..=64).contains(&key.len())
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

fn valid_label_value(value: &str) -> bool {
    value.len() <= LABEL_VALUE_MAX && !value.chars().any(char::is_control)
}

/// A validated attestation intent.
///
/// Construction enforces every invariant, so any `AttestationIntent`
/// value in the program is well-formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationIntent {
    subject_type: String,
    binding_digest: String,
    package_version: Option<String>,
    run_id: Option<String>,
    env: Option<String>,
    tenant: Option<String>,
    labels: BTreeMap<String, String>,
}

/// Optional fields for [`AttestationIntent::new`].
#[derive(Debug, Clone, Default)]
pub struct IntentFields {
    /// Package version of the subject artifact.
    pub package_version: Option<String>,
    /// Router run id the subject covers.
    pub run_id: Option<String>,
    /// Deployment environment tag.
    pub env: Option<String>,
    /// Tenant tag.
    pub tenant: Option<String>,
    /// Free-form labels. Keys `[a-zA-Z0-9._-]{1,64}`, values ≤ 256
    /// bytes without control characters, at most 32 entries.
    pub labels: BTreeMap<String, String>,
}

impl AttestationIntent {
    /// Construct a validated intent.
    ///
    /// # Errors
    ///
    /// Returns an [`IntentError`] describing the first violated
    /// invariant.
    pub fn new(
        subject_type: impl Into<String>,
        binding_digest: impl Into<String>,
        fields: IntentFields,
    ) -> Result<Self, IntentError> {
        let subject_type = subject_type.into();
        let binding_digest = binding_digest.into();

        if subject_type.is_empty() {
            return Err(IntentError::SubjectType);
        }
        if !is_prefixed_digest(&binding_digest) {
            return Err(IntentError::BindingDigest(binding_digest));
        }
        if fields.labels.len() > LABELS_MAX_COUNT {
            return Err(IntentError::LabelCount(fields.labels.len()));
        }
        for (key, value) in &fields.labels {
            if !valid_label_key(key) {
                return Err(IntentError::LabelKey(key.clone()));
            }
            if !valid_label_value(value) {
                return Err(IntentError::LabelValue(key.clone()));
            }
        }

        Ok(Self {
            subject_type,
            binding_digest,
            package_version: fields.package_version,
            run_id: fields.run_id,
            env: fields.env,
            tenant: fields.tenant,
            labels: fields.labels,
        })
    }

    /// What kind of artifact is being witnessed.
    #[must_use]
    pub fn subject_type(&self) -> &str {
        &self.subject_type
    }

    /// Prefixed binding digest of the subject artifact.
    #[must_use]
    pub fn binding_digest(&self) -> &str {
        &self.binding_digest
    }

    /// Package version, if recorded.
    #[must_use]
    pub fn package_version(&self) -> Option<&str> {
        self.package_version.as_deref()
    }

    /// Router run id, if recorded.
    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Environment tag, if recorded.
    #[must_use]
    pub fn env(&self) -> Option<&str> {
        self.env.as_deref()
    }

    /// Tenant tag, if recorded.
    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// Labels, sorted by key.
    #[must_use]
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// The canonical dict: only identity-bearing fields, None-valued
    /// fields and empty labels omitted, labels sorted by key.
    #[must_use]
    pub fn to_canonical_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("intent_version".into(), Value::from(INTENT_VERSION));
        map.insert("subject_type".into(), Value::from(self.subject_type.clone()));
        map.insert("binding_digest".into(), Value::from(self.binding_digest.clone()));
        if let Some(v) = &self.package_version {
            map.insert("package_version".into(), Value::from(v.clone()));
        }
        if let Some(v) = &self.run_id {
            map.insert("run_id".into(), Value::from(v.clone()));
        }
        if let Some(v) = &self.env {
            map.insert("env".into(), Value::from(v.clone()));
        }
        if let Some(v) = &self.tenant {
            map.insert("tenant".into(), Value::from(v.clone()));
        }
        if !self.labels.is_empty() {
            map.insert(
                "labels".into(),
                Value::Object(
                    self.labels
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                        .collect(),
                ),
            );
        }
        Value::Object(map)
    }

    /// Serializable dict form — same shape as the canonical dict.
    #[must_use]
    pub fn to_value(&self) -> Value {
        self.to_canonical_value()
    }

    /// SHA-256 digest of the canonical dict (raw hex).
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if serialization fails.
    pub fn intent_digest(&self) -> Result<String, CanonicalError> {
        content_digest(&self.to_canonical_value())
    }

    /// Intent digest in prefixed form (`"sha256:<hex>"`), which is also
    /// the queue id.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if serialization fails.
    pub fn prefixed_digest(&self) -> Result<String, CanonicalError> {
        Ok(format!("{}{}", vouch_core::DIGEST_PREFIX, self.intent_digest()?))
    }

    /// Parse an intent back from its dict form, re-running validation.
    ///
    /// # Errors
    ///
    /// Returns an [`IntentError`] on missing fields or invariant
    /// violations.
    pub fn from_value(value: &Value) -> Result<Self, IntentError> {
        let obj = value.as_object().ok_or(IntentError::Field("intent"))?;
        let get_str = |key: &'static str| -> Result<String, IntentError> {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(IntentError::Field(key))
        };
        let opt_str = |key: &'static str| -> Result<Option<String>, IntentError> {
            match obj.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(_) => Err(IntentError::Field(key)),
            }
        };

        let mut labels = BTreeMap::new();
        if let Some(raw) = obj.get("labels") {
            let raw = raw.as_object().ok_or(IntentError::Field("labels"))?;
            for (key, value) in raw {
                let value = value.as_str().ok_or(IntentError::Field("labels"))?;
                labels.insert(key.clone(), value.to_string());
            }
        }

        Self::new(
            get_str("subject_type")?,
            get_str("binding_digest")?,
            IntentFields {
                package_version: opt_str("package_version")?,
                run_id: opt_str("run_id")?,
                env: opt_str("env")?,
                tenant: opt_str("tenant")?,
                labels,
            },
        )
    }
}
