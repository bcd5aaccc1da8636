// SPDX-License-Identifier: MIT OR Apache-2.0

//! JSON-RPC implementation of the client port.
//!
//! Translates rippled `submit`/`tx` responses into result values over an
//! injectable transport. No retry loops, no secrets, no ledger logic
//! beyond response parsing.
//!
//! Parsing targets rippled JSON-RPC conventions: successful responses
//! are `{"result": {"status": "success", ...}}`, errors are
//! `{"result": {"status": "error", "error": "...", ...}}`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::client::{SubmitResult, TxStatusResult, XrplClient};
use crate::transport::JsonRpcTransport;

/// Error code reported when the node's RPC layer itself failed.
const SERVER_ERROR: &str = "SERVER_ERROR";

/// XRPL JSON-RPC client.
pub struct JsonRpcClient {
    url: String,
    transport: Arc<dyn JsonRpcTransport>,
    request_id: AtomicU64,
}

impl JsonRpcClient {
    /// Build a client against a rippled JSON-RPC endpoint.
    pub fn new(url: impl Into<String>, transport: Arc<dyn JsonRpcTransport>) -> Self {
        Self { url: url.into(), transport, request_id: AtomicU64::new(0) }
    }

    /// The JSON-RPC endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl XrplClient for JsonRpcClient {
    async fn submit(&self, signed_tx_blob_hex: &str) -> Result<SubmitResult> {
        let payload = json!({
            "method": "submit",
            "params": [{"tx_blob": signed_tx_blob_hex}],
            "id": self.next_request_id(),
        });

        let response = self.transport.post_json(&self.url, &payload).await?;
        let exchange_digest = self.transport.last_exchange_digest();
        Ok(parse_submit_response(&response, exchange_digest))
    }

    async fn get_tx(&self, tx_hash: &str) -> Result<TxStatusResult> {
        let payload = json!({
            "method": "tx",
            "params": [{"transaction": tx_hash, "binary": false}],
            "id": self.next_request_id(),
        });

        let response = self.transport.post_json(&self.url, &payload).await?;
        let exchange_digest = self.transport.last_exchange_digest();
        Ok(parse_tx_response(&response, exchange_digest))
    }
}

fn result_section(response: &Value) -> Option<&serde_json::Map<String, Value>> {
    response.get("result").and_then(Value::as_object)
}

fn parse_submit_response(response: &Value, exchange_digest: Option<String>) -> SubmitResult {
    let Some(result) = result_section(response) else {
        return SubmitResult {
            error_code: Some(SERVER_ERROR.into()),
            detail: Some("malformed response: no result section".into()),
            exchange_digest,
            ..SubmitResult::default()
        };
    };

    if result.get("status").and_then(Value::as_str) == Some("error") {
        let detail = result
            .get("error_message")
            .or_else(|| result.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return SubmitResult {
            error_code: Some(SERVER_ERROR.into()),
            detail,
            exchange_digest,
            ..SubmitResult::default()
        };
    }

    let Some(engine_result) = result.get("engine_result").and_then(Value::as_str) else {
        return SubmitResult {
            error_code: Some(SERVER_ERROR.into()),
            detail: Some("response carries no engine_result".into()),
            exchange_digest,
            ..SubmitResult::default()
        };
    };

    // Servers may omit the explicit accepted flag; infer from the engine
    // result (ter* means queued for retry — accepted into the open
    // ledger process).
    let accepted = result.get("accepted").and_then(Value::as_bool).unwrap_or_else(|| {
        engine_result.starts_with("tes") || engine_result.starts_with("ter")
    });

    SubmitResult {
        accepted,
        tx_hash: result
            .get("tx_json")
            .and_then(|t| t.get("hash"))
            .and_then(Value::as_str)
            .map(str::to_string),
        engine_result: Some(engine_result.to_string()),
        detail: result
            .get("engine_result_message")
            .and_then(Value::as_str)
            .map(str::to_string),
        error_code: None,
        exchange_digest,
    }
}

fn parse_tx_response(response: &Value, exchange_digest: Option<String>) -> TxStatusResult {
    let Some(result) = result_section(response) else {
        return TxStatusResult {
            error_code: Some(SERVER_ERROR.into()),
            detail: Some("malformed response: no result section".into()),
            exchange_digest,
            ..TxStatusResult::default()
        };
    };

    if result.get("status").and_then(Value::as_str) == Some("error") {
        let error = result.get("error").and_then(Value::as_str).unwrap_or_default();
        // txnNotFound is a normal "not yet known", not a server fault.
        if error == "txnNotFound" {
            return TxStatusResult { found: false, exchange_digest, ..TxStatusResult::default() };
        }
        return TxStatusResult {
            error_code: Some(SERVER_ERROR.into()),
            detail: result
                .get("error_message")
                .and_then(Value::as_str)
                .map(str::to_string),
            exchange_digest,
            ..TxStatusResult::default()
        };
    }

    let validated = result.get("validated").and_then(Value::as_bool).unwrap_or(false);

    TxStatusResult {
        found: true,
        validated,
        ledger_index: result.get("ledger_index").and_then(Value::as_u64),
        engine_result: result
            .get("meta")
            .and_then(|m| m.get("TransactionResult"))
            .and_then(Value::as_str)
            .map(str::to_string),
        ledger_close_time: result
            .get("close_time_iso")
            .and_then(Value::as_str)
            .map(str::to_string),
        detail: None,
        error_code: None,
        exchange_digest,
    }
}
