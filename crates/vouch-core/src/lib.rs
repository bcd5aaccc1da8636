// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Canonical JSON encoding and SHA-256 content digests.
pub mod canonical;
/// The decision event vocabulary: actors, modes, typed payloads.
pub mod event;
/// The governance policy model and the execution gate.
pub mod policy;

pub use canonical::{
    CanonicalError, DIGEST_PREFIX, canonical_json, canonical_json_bytes, content_digest,
    is_prefixed_digest, prefixed_content_digest, sha256_hex, strip_digest_prefix, verify_digest,
};
pub use event::{
    Actor, ActorType, ApprovalGrantedPayload, ApprovalRevokedPayload, DecisionCreatedPayload,
    EventPayload, EventType, ExecutionCompletedPayload, ExecutionFailedPayload,
    ExecutionRequestedPayload, ExecutionStartedPayload, Mode, PolicyAttachedPayload,
    TemplateCreatedPayload, event_digest,
};
pub use policy::{Policy, PolicyError, PolicyValidationResult, validate_execution_request};
