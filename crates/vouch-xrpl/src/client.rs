// SPDX-License-Identifier: MIT OR Apache-2.0

//! The network boundary.
//!
//! The adapter depends on this port, not on a concrete HTTP stack, so
//! business logic stays testable against fakes. Expected failures
//! ("the ledger said no") live inside the result types; only
//! transport-level failures surface as errors, and the adapter maps
//! those to `BACKEND_UNAVAILABLE` receipts.

use anyhow::Result;
use async_trait::async_trait;

/// Result of submitting a signed transaction blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitResult {
    /// Whether the node provisionally accepted the transaction.
    pub accepted: bool,
    /// Transaction hash, when known.
    pub tx_hash: Option<String>,
    /// Engine result string (e.g. `"tesSUCCESS"`, `"temBAD_FEE"`).
    pub engine_result: Option<String>,
    /// Human-readable detail from the node.
    pub detail: Option<String>,
    /// Node-side error code, when the RPC itself failed.
    pub error_code: Option<String>,
    /// Prefixed digest of the wire exchange, when the transport records
    /// evidence.
    pub exchange_digest: Option<String>,
}

/// Result of querying a transaction's status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxStatusResult {
    /// Whether the node knows the transaction.
    pub found: bool,
    /// Whether the transaction is in a validated ledger.
    pub validated: bool,
    /// Validated ledger index, when validated.
    pub ledger_index: Option<u64>,
    /// Engine result string from transaction metadata.
    pub engine_result: Option<String>,
    /// Ledger close time (ISO form), when validated.
    pub ledger_close_time: Option<String>,
    /// Human-readable detail from the node.
    pub detail: Option<String>,
    /// Node-side error code, when the RPC itself failed.
    pub error_code: Option<String>,
    /// Prefixed digest of the wire exchange, when the transport records
    /// evidence.
    pub exchange_digest: Option<String>,
}

/// The XRPL client port.
#[async_trait]
pub trait XrplClient: Send + Sync {
    /// Submit a signed transaction blob.
    ///
    /// # Errors
    ///
    /// Transport-level failures only (connection refused, timeout, TLS).
    async fn submit(&self, signed_tx_blob_hex: &str) -> Result<SubmitResult>;

    /// Query transaction status by hash.
    ///
    /// # Errors
    ///
    /// Transport-level failures only.
    async fn get_tx(&self, tx_hash: &str) -> Result<TxStatusResult>;
}
