// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;

use vouch_queue::{
    AttestationIntent, AttestationQueue, IntentFields, ReceiptErrorCode, ReceiptStatus,
};

use crate::*;

const SAMPLE_TX_HASH: &str =
    "ABCDEF0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF0123456789";
const CREATED_AT: &str = "2026-01-28T20:14:03Z";

fn intent() -> AttestationIntent {
    AttestationIntent::new(
        "vouch.audit_package",
        format!("sha256:{}", "a".repeat(64)),
        IntentFields::default(),
    )
    .unwrap()
}

struct FakeSigner {
    fail: bool,
}

impl XrplSigner for FakeSigner {
    fn account(&self) -> &str {
        "rFakeAccount"
    }

    fn key_id(&self) -> &str {
        "ED_FAKE_KEY"
    }

    fn sign(&self, _unsigned_tx: &Value) -> Result<SignResult> {
        if self.fail {
            anyhow::bail!("bad key");
        }
        Ok(SignResult {
            signed_tx_blob_hex: "deadbeef".into(),
            tx_hash: SAMPLE_TX_HASH.into(),
            key_id: self.key_id().into(),
        })
    }
}

struct FakeClient {
    submit_result: Result<SubmitResult, String>,
    tx_result: Result<TxStatusResult, String>,
}

impl FakeClient {
    fn accepting() -> Self {
        Self {
            submit_result: Ok(SubmitResult {
                accepted: true,
                tx_hash: Some(SAMPLE_TX_HASH.into()),
                engine_result: Some("tesSUCCESS".into()),
                ..SubmitResult::default()
            }),
            tx_result: Ok(TxStatusResult {
                found: true,
                validated: true,
                ledger_index: Some(12345),
                engine_result: Some("tesSUCCESS".into()),
                ledger_close_time: Some("2025-01-15T12:01:00Z".into()),
                ..TxStatusResult::default()
            }),
        }
    }

    fn rejecting(engine_result: &str) -> Self {
        Self {
            submit_result: Ok(SubmitResult {
                accepted: false,
                engine_result: Some(engine_result.into()),
                detail: Some("Invalid fee.".into()),
                ..SubmitResult::default()
            }),
            tx_result: Ok(TxStatusResult::default()),
        }
    }

    fn unreachable() -> Self {
        Self {
            submit_result: Err("connection refused".into()),
            tx_result: Err("connection refused".into()),
        }
    }
}

#[async_trait]
impl XrplClient for FakeClient {
    async fn submit(&self, _blob: &str) -> Result<SubmitResult> {
        self.submit_result
            .clone()
            .map_err(|e| anyhow::anyhow!(e))
    }

    async fn get_tx(&self, _tx_hash: &str) -> Result<TxStatusResult> {
        self.tx_result.clone().map_err(|e| anyhow::anyhow!(e))
    }
}

// ── Plan ───────────────────────────────────────────────────────────

#[test]
fn plan_assembles_tx_and_digests() {
    let anchor = plan(&intent(), "rAccount1").unwrap();
    assert_eq!(anchor.account, "rAccount1");
    assert_eq!(anchor.amount_drops, "1");
    assert!(anchor.intent_digest.starts_with("sha256:"));
    assert!(anchor.memo_digest.starts_with("sha256:"));
    assert_eq!(anchor.tx["Account"], "rAccount1");
    assert_eq!(anchor.tx["Memos"][0]["Memo"]["MemoData"], anchor.memo_data_hex);
    assert_eq!(
        hex::decode(&anchor.memo_data_hex).unwrap(),
        serialize_memo(&anchor.memo_payload).unwrap()
    );
}

#[test]
fn plan_is_deterministic() {
    let a = plan(&intent(), "rAccount1").unwrap();
    let b = plan(&intent(), "rAccount1").unwrap();
    assert_eq!(a, b);
}

#[test]
fn oversized_memo_fails_planning() {
    // run_id is unbounded in the intent; inflate it past the memo cap.
    let huge = AttestationIntent::new(
        "vouch.audit_package",
        format!("sha256:{}", "a".repeat(64)),
        IntentFields { run_id: Some("r".repeat(800)), ..IntentFields::default() },
    )
    .unwrap();
    let err = plan(&huge, "rAccount1").unwrap_err();
    assert!(matches!(err, PlanError::MemoTooLarge { .. }));
}

// ── Submit ─────────────────────────────────────────────────────────

#[tokio::test]
async fn accepted_submit_builds_submitted_receipt() {
    let anchor = plan(&intent(), "rAccount1").unwrap();
    let receipt = submit(
        &anchor,
        &FakeClient::accepting(),
        &FakeSigner { fail: false },
        1,
        CREATED_AT,
    )
    .await
    .unwrap();

    assert_eq!(receipt.status, ReceiptStatus::Submitted);
    assert_eq!(receipt.backend, XRPL_BACKEND);
    assert_eq!(receipt.attempt, 1);
    assert_eq!(receipt.proof["tx_hash"], SAMPLE_TX_HASH);
    assert_eq!(receipt.proof["engine_result"], "tesSUCCESS");
    assert_eq!(receipt.proof["key_id"], "ED_FAKE_KEY");
    assert_eq!(receipt.evidence_digests["memo_digest"], anchor.memo_digest);
    assert!(receipt.error.is_none());
}

#[tokio::test]
async fn rejected_submit_is_failed_with_classified_code() {
    let anchor = plan(&intent(), "rAccount1").unwrap();
    let receipt = submit(
        &anchor,
        &FakeClient::rejecting("temBAD_FEE"),
        &FakeSigner { fail: false },
        1,
        CREATED_AT,
    )
    .await
    .unwrap();

    assert_eq!(receipt.status, ReceiptStatus::Failed);
    let error = receipt.error.unwrap();
    assert_eq!(error.code, ReceiptErrorCode::Rejected);
    let detail = error.detail.unwrap();
    assert!(detail.contains("temBAD_FEE"));
    assert!(detail.contains("Invalid fee."));
    assert!(receipt.proof.is_empty());
    assert_eq!(receipt.evidence_digests["memo_digest"], anchor.memo_digest);
}

#[tokio::test]
async fn unknown_engine_result_maps_to_unknown() {
    let anchor = plan(&intent(), "rAccount1").unwrap();
    let receipt = submit(
        &anchor,
        &FakeClient::rejecting("xyzUNKNOWN"),
        &FakeSigner { fail: false },
        1,
        CREATED_AT,
    )
    .await
    .unwrap();
    assert_eq!(receipt.error.unwrap().code, ReceiptErrorCode::Unknown);
}

#[tokio::test]
async fn transport_failure_is_backend_unavailable() {
    let anchor = plan(&intent(), "rAccount1").unwrap();
    let receipt = submit(
        &anchor,
        &FakeClient::unreachable(),
        &FakeSigner { fail: false },
        1,
        CREATED_AT,
    )
    .await
    .unwrap();

    assert_eq!(receipt.status, ReceiptStatus::Failed);
    let error = receipt.error.unwrap();
    assert_eq!(error.code, ReceiptErrorCode::BackendUnavailable);
    assert!(error.detail.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn signer_failure_is_rejected() {
    let anchor = plan(&intent(), "rAccount1").unwrap();
    let receipt = submit(
        &anchor,
        &FakeClient::accepting(),
        &FakeSigner { fail: true },
        1,
        CREATED_AT,
    )
    .await
    .unwrap();

    assert_eq!(receipt.status, ReceiptStatus::Failed);
    let error = receipt.error.unwrap();
    assert_eq!(error.code, ReceiptErrorCode::Rejected);
    assert!(error.detail.unwrap().contains("bad key"));
}

#[tokio::test]
async fn exchange_digest_lands_in_evidence() {
    let anchor = plan(&intent(), "rAccount1").unwrap();
    let exchange = format!("sha256:{}", "7".repeat(64));
    let client = FakeClient {
        submit_result: Ok(SubmitResult {
            accepted: true,
            tx_hash: Some(SAMPLE_TX_HASH.into()),
            engine_result: Some("tesSUCCESS".into()),
            exchange_digest: Some(exchange.clone()),
            ..SubmitResult::default()
        }),
        tx_result: Ok(TxStatusResult::default()),
    };
    let receipt = submit(&anchor, &client, &FakeSigner { fail: false }, 1, CREATED_AT)
        .await
        .unwrap();
    assert_eq!(receipt.evidence_digests[SUBMIT_EXCHANGE_KEY], exchange);
}

// ── Confirm ────────────────────────────────────────────────────────

#[tokio::test]
async fn validated_tx_confirms_with_full_proof() {
    let anchor = plan(&intent(), "rAccount1").unwrap();
    let receipt = confirm(
        &anchor.intent_digest,
        SAMPLE_TX_HASH,
        &FakeClient::accepting(),
        1,
        &anchor.memo_digest,
        CREATED_AT,
    )
    .await
    .unwrap();

    assert_eq!(receipt.status, ReceiptStatus::Confirmed);
    assert_eq!(receipt.proof["tx_hash"], SAMPLE_TX_HASH);
    assert_eq!(receipt.proof["ledger_index"], 12345);
    assert_eq!(receipt.proof["engine_result"], "tesSUCCESS");
    assert_eq!(receipt.proof["ledger_close_time"], "2025-01-15T12:01:00Z");
    assert_eq!(receipt.evidence_digests["memo_digest"], anchor.memo_digest);
}

#[tokio::test]
async fn pending_tx_defers() {
    let anchor = plan(&intent(), "rAccount1").unwrap();
    let client = FakeClient {
        submit_result: Ok(SubmitResult::default()),
        tx_result: Ok(TxStatusResult {
            found: true,
            validated: false,
            ..TxStatusResult::default()
        }),
    };
    let receipt = confirm(
        &anchor.intent_digest,
        SAMPLE_TX_HASH,
        &client,
        1,
        &anchor.memo_digest,
        CREATED_AT,
    )
    .await
    .unwrap();
    assert_eq!(receipt.status, ReceiptStatus::Deferred);
    assert!(receipt.error.is_none());
}

#[tokio::test]
async fn unknown_tx_defers_not_fails() {
    let anchor = plan(&intent(), "rAccount1").unwrap();
    let client = FakeClient {
        submit_result: Ok(SubmitResult::default()),
        tx_result: Ok(TxStatusResult { found: false, ..TxStatusResult::default() }),
    };
    let receipt = confirm(
        &anchor.intent_digest,
        SAMPLE_TX_HASH,
        &client,
        1,
        &anchor.memo_digest,
        CREATED_AT,
    )
    .await
    .unwrap();
    assert_eq!(receipt.status, ReceiptStatus::Deferred);
}

#[tokio::test]
async fn confirm_transport_failure_is_backend_unavailable() {
    let anchor = plan(&intent(), "rAccount1").unwrap();
    let receipt = confirm(
        &anchor.intent_digest,
        SAMPLE_TX_HASH,
        &FakeClient::unreachable(),
        2,
        &anchor.memo_digest,
        CREATED_AT,
    )
    .await
    .unwrap();
    assert_eq!(receipt.status, ReceiptStatus::Failed);
    assert_eq!(receipt.error.unwrap().code, ReceiptErrorCode::BackendUnavailable);
}

// ── Worker ─────────────────────────────────────────────────────────

fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 28, 20, 14, 3).unwrap()
}

#[tokio::test]
async fn full_cycle_produces_two_receipts_and_confirms() {
    let queue = AttestationQueue::in_memory().unwrap();
    queue.enqueue(&intent(), None).unwrap();

    let result = process_one(
        &queue,
        &FakeClient::accepting(),
        &FakeSigner { fail: false },
        &ProcessOptions::default(),
        fixed_now,
    )
    .await
    .unwrap();

    assert!(result.processed);
    assert_eq!(result.receipts.len(), 2);
    assert_eq!(result.receipts[0].status, ReceiptStatus::Submitted);
    assert_eq!(result.receipts[1].status, ReceiptStatus::Confirmed);

    let status = queue
        .get_status(&intent().prefixed_digest().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(status.status, "CONFIRMED");
    assert_eq!(status.last_attempt, 1);
    assert!(queue.next_pending(10).unwrap().is_empty());
}

#[tokio::test]
async fn rejected_submit_stops_cycle_after_one_receipt() {
    let queue = AttestationQueue::in_memory().unwrap();
    queue.enqueue(&intent(), None).unwrap();

    let result = process_one(
        &queue,
        &FakeClient::rejecting("temBAD_FEE"),
        &FakeSigner { fail: false },
        &ProcessOptions::default(),
        fixed_now,
    )
    .await
    .unwrap();

    assert!(result.processed);
    assert_eq!(result.receipts.len(), 1);
    assert_eq!(result.receipts[0].status, ReceiptStatus::Failed);

    let status = queue
        .get_status(&intent().prefixed_digest().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(status.status, "FAILED");
    assert_eq!(status.last_error_code.as_deref(), Some("REJECTED"));
    assert!(queue.next_pending(10).unwrap().is_empty());
}

#[tokio::test]
async fn empty_queue_processes_nothing() {
    let queue = AttestationQueue::in_memory().unwrap();
    let result = process_one(
        &queue,
        &FakeClient::accepting(),
        &FakeSigner { fail: false },
        &ProcessOptions::default(),
        fixed_now,
    )
    .await
    .unwrap();
    assert!(!result.processed);
    assert!(result.receipts.is_empty());
}

#[tokio::test]
async fn deferred_confirm_keeps_intent_eligible() {
    let queue = AttestationQueue::in_memory().unwrap();
    queue.enqueue(&intent(), None).unwrap();

    let client = FakeClient {
        submit_result: Ok(SubmitResult {
            accepted: true,
            tx_hash: Some(SAMPLE_TX_HASH.into()),
            engine_result: Some("tesSUCCESS".into()),
            ..SubmitResult::default()
        }),
        tx_result: Ok(TxStatusResult { found: false, ..TxStatusResult::default() }),
    };

    let result = process_one(
        &queue,
        &client,
        &FakeSigner { fail: false },
        &ProcessOptions::default(),
        fixed_now,
    )
    .await
    .unwrap();

    assert_eq!(result.receipts.len(), 2);
    assert_eq!(result.receipts[1].status, ReceiptStatus::Deferred);

    // Still eligible, with the attempt counter advanced.
    let pending = queue.next_pending(10).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].next_attempt, 2);
}

#[tokio::test]
async fn intent_filter_selects_specific_intent() {
    let queue = AttestationQueue::in_memory().unwrap();
    queue.enqueue(&intent(), None).unwrap();

    let other = AttestationIntent::new(
        "vouch.audit_package",
        format!("sha256:{}", "b".repeat(64)),
        IntentFields::default(),
    )
    .unwrap();
    queue.enqueue(&other, None).unwrap();

    let wanted = other.prefixed_digest().unwrap();
    let result = process_one(
        &queue,
        &FakeClient::accepting(),
        &FakeSigner { fail: false },
        &ProcessOptions { intent_digest: Some(wanted.clone()), ..ProcessOptions::default() },
        fixed_now,
    )
    .await
    .unwrap();

    assert_eq!(result.intent_digest.as_deref(), Some(wanted.as_str()));
}

#[tokio::test]
async fn recorded_receipts_replay_in_order() {
    let queue = AttestationQueue::in_memory().unwrap();
    queue.enqueue(&intent(), None).unwrap();

    process_one(
        &queue,
        &FakeClient::accepting(),
        &FakeSigner { fail: false },
        &ProcessOptions::default(),
        fixed_now,
    )
    .await
    .unwrap();

    let receipts = queue.replay(&intent().prefixed_digest().unwrap()).unwrap();
    assert_eq!(receipts.len(), 2);
    assert_eq!(receipts[0].status, ReceiptStatus::Submitted);
    assert_eq!(receipts[1].status, ReceiptStatus::Confirmed);
    assert_eq!(receipts[0].attempt, 1);
    assert_eq!(receipts[1].attempt, 1);
}
