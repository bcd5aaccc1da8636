// SPDX-License-Identifier: MIT OR Apache-2.0

//! Audit package export.
//!
//! The binding digest is identical for the same store state and the same
//! router inputs; `meta.exported_at` and provenance stay outside it.

use chrono::Utc;
use serde_json::{Value, json};
use tracing::debug;

use vouch_core::{DIGEST_PREFIX, sha256_hex};
use vouch_store::DecisionStore;

use vouch_bundle::{BundleProvenance, ProvenanceRecord, export_decision};

use crate::package::{
    AuditBinding, AuditIntegrity, AuditPackage, PACKAGE_VERSION, RouterRef, RouterSection,
    compute_binding_digest,
};
use crate::AuditError;

/// Method id recorded in audit export provenance.
pub const AUDIT_EXPORT_METHOD_ID: &str = "vouch.audit_export_v0_6";

/// Options for [`export_audit_package`].
#[derive(Debug, Clone)]
pub struct AuditExportOptions {
    /// Embed the full router bundle instead of referencing it.
    pub embed_router_bundle: bool,
    /// The router bundle dict (required for embedded mode).
    pub router_bundle: Option<Value>,
    /// Router digest override for reference mode. When absent, the
    /// control bundle's `router_result_digest` is used.
    pub router_bundle_digest: Option<String>,
    /// In embedded mode, require the router bundle's canonical digest to
    /// match the control bundle's `router_result_digest`. Disable when
    /// the router bundle wraps the raw result with extra metadata.
    pub verify_router_bundle_digest: bool,
}

impl Default for AuditExportOptions {
    fn default() -> Self {
        Self {
            embed_router_bundle: false,
            router_bundle: None,
            router_bundle_digest: None,
            verify_router_bundle_digest: true,
        }
    }
}

/// A successful audit export: the package plus its prefixed binding
/// digest.
#[derive(Debug, Clone)]
pub struct AuditExport {
    /// The assembled package.
    pub package: AuditPackage,
    /// Prefixed binding digest (same value as
    /// `package.integrity.binding_digest`).
    pub digest: String,
}

/// Export an audit package combining control + router.
///
/// # Errors
///
/// [`AuditError::NoRouterLink`] when the decision never executed;
/// [`AuditError::RouterDigestMismatch`] when an embedded router bundle
/// contradicts the control link; bundle-layer errors pass through.
pub fn export_audit_package(
    store: &DecisionStore,
    decision_id: &str,
    options: &AuditExportOptions,
) -> Result<AuditExport, AuditError> {
    let control = export_decision(store, decision_id)?;
    let control_bundle = control.bundle;

    let Some(run_id) = control_bundle.router_link.run_id.clone() else {
        return Err(AuditError::NoRouterLink(format!(
            "Decision {decision_id} has no router execution link; audit packages require an \
             executed decision"
        )));
    };
    let Some(control_link_digest) = control_bundle
        .router_link
        .control_router_link_digest
        .clone()
    else {
        return Err(AuditError::NoRouterLink(format!(
            "Decision {decision_id} has no control-router link digest"
        )));
    };

    let control_digest = control_bundle.integrity.canonical_digest.clone();

    let (router_section, router_digest) = if options.embed_router_bundle {
        let Some(router_bundle) = options.router_bundle.clone() else {
            return Err(AuditError::InvalidRouterBundle(
                "embedded mode requires a router bundle".into(),
            ));
        };
        let router_digest = router_bundle
            .get("integrity")
            .and_then(|i| i.get("canonical_digest"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AuditError::InvalidRouterBundle(
                    "router bundle has no integrity.canonical_digest".into(),
                )
            })?;

        if options.verify_router_bundle_digest
            && let Some(control_router_result) = &control_bundle.router_link.router_result_digest
            && router_digest != *control_router_result
        {
            return Err(AuditError::RouterDigestMismatch {
                router_digest,
                control_digest: control_router_result.clone(),
            });
        }

        (RouterSection::Embedded { bundle: router_bundle }, router_digest)
    } else {
        let router_digest = options
            .router_bundle_digest
            .clone()
            .or_else(|| control_bundle.router_link.router_result_digest.clone())
            .ok_or_else(|| {
                AuditError::NoRouterLink(
                    "No router digest available for reference mode".into(),
                )
            })?;
        (
            RouterSection::Reference {
                reference: RouterRef { run_id, digest: router_digest.clone() },
            },
            router_digest,
        )
    };

    let binding = AuditBinding {
        control_digest: control_digest.clone(),
        router_digest: router_digest.clone(),
        control_router_link_digest: control_link_digest.clone(),
    };

    let raw_binding_digest = compute_binding_digest(
        PACKAGE_VERSION,
        &control_digest,
        &router_digest,
        &control_link_digest,
    )?;

    let package = AuditPackage {
        package_version: PACKAGE_VERSION.into(),
        control_bundle,
        router: router_section,
        binding,
        integrity: AuditIntegrity {
            alg: "sha256".into(),
            binding_digest: format!("{DIGEST_PREFIX}{raw_binding_digest}"),
        },
        provenance: build_provenance(decision_id, &raw_binding_digest),
        meta: json!({"exported_at": Utc::now().to_rfc3339()}),
    };

    debug!(decision_id = %decision_id, digest = %raw_binding_digest, "audit package exported");
    Ok(AuditExport {
        digest: format!("{DIGEST_PREFIX}{raw_binding_digest}"),
        package,
    })
}

fn build_provenance(decision_id: &str, binding_digest: &str) -> BundleProvenance {
    let prov_seed = format!("{decision_id}:{binding_digest}");
    let prov_id = format!("prov_{}", &sha256_hex(prov_seed.as_bytes())[..12]);

    BundleProvenance {
        records: vec![ProvenanceRecord {
            prov_id,
            method_id: AUDIT_EXPORT_METHOD_ID.into(),
            inputs: vec![format!("decision:{decision_id}")],
            outputs: vec![format!("audit_package:{DIGEST_PREFIX}{binding_digest}")],
        }],
    }
}
