// SPDX-License-Identifier: MIT OR Apache-2.0

//! Audit package wire types and the binding digest.
//!
//! The binding digest inputs are frozen for a given `package_version`:
//! changing what contributes to the digest requires a new version, so
//! verification stays stable across releases.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use vouch_bundle::{BundleProvenance, DecisionBundle};
use vouch_core::{CanonicalError, content_digest};

/// Package format version — update when the format changes.
pub const PACKAGE_VERSION: &str = "0.6";

/// Reference to a router execution bundle that is not embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterRef {
    /// Router run id.
    pub run_id: String,
    /// Prefixed digest of the router bundle.
    pub digest: String,
}

/// Router section: either an embedded bundle or a reference.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterSection {
    /// The full router bundle is embedded in the package.
    Embedded {
        /// The router bundle dict, carried verbatim.
        bundle: Value,
    },
    /// Only a reference to the router bundle is carried.
    Reference {
        /// The reference.
        reference: RouterRef,
    },
}

impl RouterSection {
    /// Mode wire string (`"embedded"` / `"reference"`).
    #[must_use]
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Embedded { .. } => "embedded",
            Self::Reference { .. } => "reference",
        }
    }

    /// Dict form.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if the reference fails to serialize.
    pub fn to_value(&self) -> Result<Value, CanonicalError> {
        let mut map = Map::new();
        map.insert("mode".into(), Value::from(self.mode()));
        match self {
            Self::Embedded { bundle } => {
                map.insert("bundle".into(), bundle.clone());
            }
            Self::Reference { reference } => {
                map.insert("ref".into(), serde_json::to_value(reference)?);
            }
        }
        Ok(Value::Object(map))
    }

    /// Parse from dict form.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        match obj.get("mode")?.as_str()? {
            "embedded" => Some(Self::Embedded { bundle: obj.get("bundle")?.clone() }),
            "reference" => Some(Self::Reference {
                reference: serde_json::from_value(obj.get("ref")?.clone()).ok()?,
            }),
            _ => None,
        }
    }
}

/// The binding that ties control and router together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditBinding {
    /// Prefixed canonical digest of the control bundle.
    pub control_digest: String,
    /// Prefixed digest of the router bundle (or reference).
    pub router_digest: String,
    /// Prefixed portable control↔router link digest.
    pub control_router_link_digest: String,
}

/// Integrity section of an audit package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditIntegrity {
    /// Digest algorithm (always `"sha256"`).
    pub alg: String,
    /// Prefixed binding digest.
    pub binding_digest: String,
}

/// A complete audit package.
///
/// `meta` holds convenience metadata (e.g. `exported_at`) that is NOT
/// part of the binding digest input.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditPackage {
    /// Package format version.
    pub package_version: String,
    /// The decision-side half: the control bundle.
    pub control_bundle: DecisionBundle,
    /// The router-side half: embedded or referenced.
    pub router: RouterSection,
    /// The binding.
    pub binding: AuditBinding,
    /// Integrity section.
    pub integrity: AuditIntegrity,
    /// Provenance section.
    pub provenance: BundleProvenance,
    /// Convenience metadata, outside the digest.
    pub meta: Value,
}

impl AuditPackage {
    /// Full dict form. `meta` is included only when non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if a section fails to serialize.
    pub fn to_value(&self) -> Result<Value, CanonicalError> {
        let mut map = Map::new();
        map.insert("package_version".into(), Value::from(self.package_version.clone()));
        map.insert("control_bundle".into(), self.control_bundle.to_value()?);
        map.insert("router".into(), self.router.to_value()?);
        map.insert("binding".into(), serde_json::to_value(&self.binding)?);
        map.insert("integrity".into(), serde_json::to_value(&self.integrity)?);
        map.insert("provenance".into(), serde_json::to_value(&self.provenance)?);
        if self.meta.as_object().is_some_and(|m| !m.is_empty()) {
            map.insert("meta".into(), self.meta.clone());
        }
        Ok(Value::Object(map))
    }

    /// Canonical JSON of the full dict form.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] if serialization fails.
    pub fn to_canonical_json(&self) -> Result<String, CanonicalError> {
        vouch_core::canonical_json(&self.to_value()?)
    }

    /// Parse a package from its dict form.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when a required section is missing or has
    /// the wrong shape.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        use serde::de::Error;
        let obj = value.as_object().cloned().unwrap_or_default();
        Ok(Self {
            package_version: obj
                .get("package_version")
                .and_then(Value::as_str)
                .unwrap_or(PACKAGE_VERSION)
                .to_string(),
            control_bundle: DecisionBundle::from_value(
                obj.get("control_bundle").unwrap_or(&Value::Null),
            )?,
            router: RouterSection::from_value(obj.get("router").unwrap_or(&Value::Null))
                .ok_or_else(|| serde_json::Error::custom("invalid router section"))?,
            binding: serde_json::from_value(obj.get("binding").cloned().unwrap_or(Value::Null))?,
            integrity: serde_json::from_value(
                obj.get("integrity").cloned().unwrap_or(Value::Null),
            )?,
            provenance: serde_json::from_value(
                obj.get("provenance").cloned().unwrap_or_else(|| json!({"records": []})),
            )?,
            meta: obj.get("meta").cloned().unwrap_or_else(|| json!({})),
        })
    }
}

/// Compute the binding digest (raw hex).
///
/// All digest arguments are prefixed strings and flow into the canonical
/// payload as-is.
///
/// # Errors
///
/// Returns [`CanonicalError`] if serialization fails.
pub fn compute_binding_digest(
    package_version: &str,
    control_digest: &str,
    router_digest: &str,
    control_router_link_digest: &str,
) -> Result<String, CanonicalError> {
    content_digest(&json!({
        "package_version": package_version,
        "control_digest": control_digest,
        "router_digest": router_digest,
        "control_router_link_digest": control_router_link_digest,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_digest_is_pure() {
        let a = compute_binding_digest("0.6", "sha256:aaa", "sha256:bbb", "sha256:ccc").unwrap();
        let b = compute_binding_digest("0.6", "sha256:aaa", "sha256:bbb", "sha256:ccc").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn binding_digest_depends_on_each_input() {
        let base = compute_binding_digest("0.6", "sha256:a", "sha256:b", "sha256:c").unwrap();
        assert_ne!(
            base,
            compute_binding_digest("0.7", "sha256:a", "sha256:b", "sha256:c").unwrap()
        );
        assert_ne!(
            base,
            compute_binding_digest("0.6", "sha256:x", "sha256:b", "sha256:c").unwrap()
        );
        assert_ne!(
            base,
            compute_binding_digest("0.6", "sha256:a", "sha256:x", "sha256:c").unwrap()
        );
        assert_ne!(
            base,
            compute_binding_digest("0.6", "sha256:a", "sha256:b", "sha256:x").unwrap()
        );
    }

    #[test]
    fn router_section_roundtrips() {
        let reference = RouterSection::Reference {
            reference: RouterRef { run_id: "r1".into(), digest: "sha256:abc".into() },
        };
        let v = reference.to_value().unwrap();
        assert_eq!(v["mode"], "reference");
        assert_eq!(RouterSection::from_value(&v).unwrap(), reference);

        let embedded = RouterSection::Embedded { bundle: json!({"run_id": "r1"}) };
        let v = embedded.to_value().unwrap();
        assert_eq!(v["mode"], "embedded");
        assert_eq!(RouterSection::from_value(&v).unwrap(), embedded);
    }
}
