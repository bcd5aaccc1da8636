// SPDX-License-Identifier: MIT OR Apache-2.0

//! The secrets boundary.
//!
//! The adapter hands an unsigned transaction dict to the signer and
//! gets back an opaque signed blob. Private key material exists only
//! behind this port; the adapter never parses the blob's contents.

use anyhow::Result;
use serde_json::Value;

/// Result of signing a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignResult {
    /// Hex-encoded signed transaction blob, ready for submission.
    pub signed_tx_blob_hex: String,
    /// Transaction hash computed during signing (64 hex chars).
    pub tx_hash: String,
    /// Public identifier of the signing key. Safe for logs and audit
    /// trails; never a secret.
    pub key_id: String,
}

/// The XRPL signer port.
///
/// Implementations fill in the submit-time fields (Sequence, Fee,
/// SigningPubKey) and produce the signed blob.
pub trait XrplSigner: Send + Sync {
    /// The r-address associated with this signer.
    fn account(&self) -> &str;

    /// Public identifier of the signing key (safe for logging).
    fn key_id(&self) -> &str;

    /// Sign an unsigned transaction dict.
    ///
    /// # Errors
    ///
    /// Returns an error when the transaction dict is malformed or the
    /// key is unusable. The adapter maps signer failures to `REJECTED`
    /// receipts.
    fn sign(&self, unsigned_tx: &Value) -> Result<SignResult>;
}
