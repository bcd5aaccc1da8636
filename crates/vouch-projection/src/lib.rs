// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decision;
mod lifecycle;

pub use decision::{
    Approval, Decision, DecisionState, ExecutionRecord, LoadError, ProjectionError, TemplateRef,
};
pub use lifecycle::{
    BlockingCode, BlockingReason, DEFAULT_TIMELINE_LIMIT, Lifecycle, LifecycleEntry,
    LifecycleProgress, THRESHOLD_MET, TimelineCategory, compute_blocking_reasons,
    compute_lifecycle, compute_lifecycle_at, compute_progress, compute_timeline,
};

#[cfg(test)]
mod tests;
