// SPDX-License-Identifier: MIT OR Apache-2.0

//! The JSON-RPC transport seam and wire-level evidence capture.
//!
//! The JSON-RPC client depends on [`JsonRpcTransport`], not on a
//! concrete HTTP stack, so the transport can be swapped for a fake in
//! tests or wrapped in a [`RecordingTransport`] that captures each
//! exchange as a content-addressed record.

use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use vouch_core::{DIGEST_PREFIX, content_digest, sha256_hex};

use crate::exchange::ExchangeStore;

/// Wire-level evidence of one request/response pair.
///
/// The content digest covers `{request_digest, response_digest}` only —
/// the timestamp is metadata, so identical exchanges hash identically
/// regardless of when they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRecord {
    /// Prefixed digest of `url + canonical(request payload)`.
    pub request_digest: String,
    /// Prefixed digest of the raw response bytes.
    pub response_digest: String,
    /// When the exchange happened (RFC 3339). Metadata only.
    pub timestamp: String,
}

impl ExchangeRecord {
    /// Content digest of the exchange (prefixed), excluding the
    /// timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn content_digest(&self) -> Result<String, vouch_core::CanonicalError> {
        let digest = content_digest(&serde_json::json!({
            "request_digest": self.request_digest,
            "response_digest": self.response_digest,
        }))?;
        Ok(format!("{DIGEST_PREFIX}{digest}"))
    }
}

/// Async transport for JSON-RPC POST requests.
#[async_trait]
pub trait JsonRpcTransport: Send + Sync {
    /// Send a JSON-RPC request body and return the parsed response.
    ///
    /// # Errors
    ///
    /// Transport-level failures (connection refused, timeout, TLS).
    async fn post_json(&self, url: &str, payload: &Value) -> Result<Value>;

    /// Prefixed content digest of the most recent exchange, when this
    /// transport records evidence. Default: none.
    fn last_exchange_digest(&self) -> Option<String> {
        None
    }
}

/// Default transport over reqwest.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying client cannot be built.
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JsonRpcTransport for HttpTransport {
    async fn post_json(&self, url: &str, payload: &Value) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("post to {url}"))?
            .error_for_status()
            .context("non-success HTTP status")?;
        let body = response.json::<Value>().await.context("parse response body")?;
        Ok(body)
    }
}

/// Transport wrapper that records every exchange into an
/// [`ExchangeStore`] and exposes the latest content digest so receipts
/// can carry it as evidence.
pub struct RecordingTransport<T> {
    inner: T,
    store: ExchangeStore,
    last_digest: Mutex<Option<String>>,
}

impl<T> RecordingTransport<T> {
    /// Wrap `inner`, persisting records (and bodies, when the store is
    /// configured for them) into `store`.
    pub fn new(inner: T, store: ExchangeStore) -> Self {
        Self { inner, store, last_digest: Mutex::new(None) }
    }
}

#[async_trait]
impl<T: JsonRpcTransport> JsonRpcTransport for RecordingTransport<T> {
    async fn post_json(&self, url: &str, payload: &Value) -> Result<Value> {
        let response = self.inner.post_json(url, payload).await?;

        let request_bytes = request_bytes(url, payload)?;
        let response_bytes = vouch_core::canonical_json_bytes(&response)?;
        let record = ExchangeRecord {
            request_digest: format!("{DIGEST_PREFIX}{}", sha256_hex(&request_bytes)),
            response_digest: format!("{DIGEST_PREFIX}{}", sha256_hex(&response_bytes)),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let digest = self
            .store
            .put(&record, Some(&request_bytes), Some(&response_bytes))?;

        *self
            .last_digest
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(digest);

        Ok(response)
    }

    fn last_exchange_digest(&self) -> Option<String> {
        self.last_digest
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

fn request_bytes(url: &str, payload: &Value) -> Result<Vec<u8>, vouch_core::CanonicalError> {
    let mut bytes = url.as_bytes().to_vec();
    bytes.push(b'\n');
    bytes.extend(vouch_core::canonical_json_bytes(payload)?);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_digest_ignores_timestamp() {
        let a = ExchangeRecord {
            request_digest: format!("sha256:{}", "1".repeat(64)),
            response_digest: format!("sha256:{}", "2".repeat(64)),
            timestamp: "2026-01-01T00:00:00+00:00".into(),
        };
        let b = ExchangeRecord { timestamp: "2027-06-06T06:06:06+00:00".into(), ..a.clone() };
        assert_eq!(a.content_digest().unwrap(), b.content_digest().unwrap());
    }

    #[test]
    fn content_digest_tracks_request_and_response() {
        let a = ExchangeRecord {
            request_digest: format!("sha256:{}", "1".repeat(64)),
            response_digest: format!("sha256:{}", "2".repeat(64)),
            timestamp: "t".into(),
        };
        let mut b = a.clone();
        b.response_digest = format!("sha256:{}", "3".repeat(64));
        assert_ne!(a.content_digest().unwrap(), b.content_digest().unwrap());
    }
}
