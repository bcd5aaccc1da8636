// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decision;
mod template;

pub use decision::{DecisionStore, ImportEvent, StoredEvent};
pub use template::{StoredTemplateEvent, Template, TemplateSpec, TemplateStore};

use vouch_core::CanonicalError;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The referenced decision does not exist.
    #[error("decision not found: {0}")]
    DecisionNotFound(String),
    /// A decision with this id already exists.
    #[error("decision already exists: {0}")]
    DecisionExists(String),
    /// The referenced template does not exist.
    #[error("template not found: {0}")]
    TemplateNotFound(String),
    /// A template with this name already exists.
    #[error("template already exists: {0}")]
    TemplateExists(String),
    /// Template field validation failed.
    #[error("invalid template: {0}")]
    InvalidTemplate(String),
    /// A stored row contained data the store cannot interpret.
    #[error("corrupt row for {aggregate}: {detail}")]
    CorruptRow {
        /// Which aggregate the row belongs to.
        aggregate: String,
        /// What failed to parse.
        detail: String,
    },
    /// Canonical encoding failed.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    /// Underlying SQLite failure; the in-flight transaction is rolled back.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DecisionNotFound(_) => "DECISION_NOT_FOUND",
            Self::DecisionExists(_) => "DECISION_EXISTS",
            Self::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            Self::TemplateExists(_) => "TEMPLATE_EXISTS",
            Self::InvalidTemplate(_) => "TEMPLATE_INVALID",
            Self::CorruptRow { .. } => "STORE_CORRUPT_ROW",
            Self::Canonical(_) => "CANONICAL_ERROR",
            Self::Sqlite(_) => "STORE_ERROR",
        }
    }
}
