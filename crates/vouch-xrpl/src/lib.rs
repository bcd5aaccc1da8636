// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod client;
mod errors;
mod exchange;
mod jsonrpc;
mod memo;
mod signer;
mod transport;
mod tx;
mod worker;

pub use adapter::{AnchorPlan, SUBMIT_EXCHANGE_KEY, TX_EXCHANGE_KEY, confirm, plan, submit};
pub use client::{SubmitResult, TxStatusResult, XrplClient};
pub use errors::{classify_connection_error, classify_engine_result, classify_timeout};
pub use exchange::{ExchangeStore, ExchangeStoreError};
pub use jsonrpc::JsonRpcClient;
pub use memo::{
    MAX_MEMO_BYTES, MEMO_TYPE, MEMO_VERSION, build_memo_payload, encode_memo_hex, memo_digest,
    memo_type_hex, serialize_memo, validate_memo_size,
};
pub use signer::{SignResult, XrplSigner};
pub use transport::{ExchangeRecord, HttpTransport, JsonRpcTransport, RecordingTransport};
pub use tx::plan_payment_to_self;
pub use worker::{ProcessOptions, ProcessResult, process_one};

use vouch_core::CanonicalError;

/// Backend identifier recorded in all XRPL receipts.
pub const XRPL_BACKEND: &str = "xrpl";

/// Errors from the pure planning layer.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// The canonical memo payload exceeds the on-ledger size cap.
    #[error("memo payload is {size} bytes, exceeds maximum of {max}")]
    MemoTooLarge {
        /// Actual canonical payload size.
        size: usize,
        /// The enforced maximum.
        max: usize,
    },
    /// The payment amount was not `"0"` or `"1"` drops.
    #[error("amount_drops must be \"0\" or \"1\", got {0:?}")]
    Amount(String),
    /// A required recipe field was empty.
    #[error("{0} must be non-empty")]
    EmptyField(&'static str),
    /// Canonical encoding failed.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

#[cfg(test)]
mod tests;
