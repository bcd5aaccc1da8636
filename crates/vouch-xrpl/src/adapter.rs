// SPDX-License-Identifier: MIT OR Apache-2.0

//! The anchor adapter: pure planning composed with the impure network
//! boundary.
//!
//! `plan` builds an unsigned transaction from an intent — no I/O, no
//! secrets. `submit` and `confirm` talk to the ledger and turn every
//! outcome, including failures, into an auditable receipt. The caller
//! supplies `attempt` and `created_at`; the queue owns attempt
//! sequencing.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use tracing::debug;

use vouch_queue::{
    AttestationIntent, AttestationReceipt, ReceiptBuildError, ReceiptError, ReceiptStatus,
};

use crate::client::XrplClient;
use crate::errors::{classify_connection_error, classify_engine_result};
use crate::memo::{build_memo_payload, encode_memo_hex, memo_digest, serialize_memo, validate_memo_size};
use crate::signer::XrplSigner;
use crate::tx::plan_payment_to_self;
use crate::{PlanError, XRPL_BACKEND};

/// Evidence key for the submit-side wire exchange.
pub const SUBMIT_EXCHANGE_KEY: &str = "xrpl.submit.exchange";

/// Evidence key for the confirm-side wire exchange.
pub const TX_EXCHANGE_KEY: &str = "xrpl.tx.exchange";

/// A fully planned anchor: everything needed to sign and submit, and
/// nothing that requires network state.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorPlan {
    /// Prefixed digest of the planned intent.
    pub intent_digest: String,
    /// The memo payload (short keys → string values).
    pub memo_payload: BTreeMap<String, String>,
    /// Hex-encoded memo bytes for the `MemoData` field.
    pub memo_data_hex: String,
    /// Prefixed digest of the memo's canonical bytes.
    pub memo_digest: String,
    /// The r-address anchoring the witness.
    pub account: String,
    /// Payment amount in drops (`"0"` or `"1"`).
    pub amount_drops: String,
    /// The unsigned transaction dict.
    pub tx: Value,
}

/// Plan an anchor transaction for an intent. Pure — no I/O.
///
/// # Errors
///
/// [`PlanError::MemoTooLarge`] when the canonical memo exceeds the size
/// cap; [`PlanError`] variants for malformed recipe inputs.
pub fn plan(intent: &AttestationIntent, account: &str) -> Result<AnchorPlan, PlanError> {
    let memo_payload = build_memo_payload(intent)?;
    let memo_bytes = serialize_memo(&memo_payload)?;
    validate_memo_size(&memo_bytes)?;

    let memo_data_hex = encode_memo_hex(&memo_bytes);
    let memo_digest = memo_digest(&memo_bytes);
    let amount_drops = "1".to_string();
    let tx = plan_payment_to_self(account, &memo_data_hex, &amount_drops)?;

    Ok(AnchorPlan {
        intent_digest: intent.prefixed_digest()?,
        memo_payload,
        memo_data_hex,
        memo_digest,
        account: account.to_string(),
        amount_drops,
        tx,
    })
}

fn base_evidence(plan: &AnchorPlan) -> BTreeMap<String, String> {
    BTreeMap::from([("memo_digest".to_string(), plan.memo_digest.clone())])
}

/// Sign and submit a planned anchor, producing a receipt either way.
///
/// Signer failures become `FAILED`/`REJECTED`; transport failures become
/// `FAILED`/`BACKEND_UNAVAILABLE`; ledger rejections are classified from
/// the engine result. Acceptance produces `SUBMITTED` with the proof
/// needed for confirmation.
///
/// # Errors
///
/// Only receipt-construction failures (e.g. a malformed `created_at`)
/// surface as errors; network and signer outcomes are captured in the
/// receipt itself.
pub async fn submit(
    plan: &AnchorPlan,
    client: &dyn XrplClient,
    signer: &dyn XrplSigner,
    attempt: u32,
    created_at: &str,
) -> Result<AttestationReceipt, ReceiptBuildError> {
    let evidence = base_evidence(plan);

    let signed = match signer.sign(&plan.tx) {
        Ok(signed) => signed,
        Err(err) => {
            return AttestationReceipt::new(
                plan.intent_digest.clone(),
                XRPL_BACKEND,
                attempt,
                ReceiptStatus::Failed,
                created_at,
                evidence,
                BTreeMap::new(),
                Some(ReceiptError::with_detail(
                    vouch_queue::ReceiptErrorCode::Rejected,
                    err.to_string(),
                )),
            );
        }
    };

    let result = match client.submit(&signed.signed_tx_blob_hex).await {
        Ok(result) => result,
        Err(err) => {
            return AttestationReceipt::new(
                plan.intent_digest.clone(),
                XRPL_BACKEND,
                attempt,
                ReceiptStatus::Failed,
                created_at,
                evidence,
                BTreeMap::new(),
                Some(ReceiptError::with_detail(
                    classify_connection_error(),
                    err.to_string(),
                )),
            );
        }
    };

    let mut evidence = evidence;
    if let Some(digest) = &result.exchange_digest {
        evidence.insert(SUBMIT_EXCHANGE_KEY.to_string(), digest.clone());
    }

    if result.accepted {
        let tx_hash = result.tx_hash.unwrap_or(signed.tx_hash);
        let mut proof: BTreeMap<String, Value> =
            BTreeMap::from([("tx_hash".to_string(), json!(tx_hash))]);
        if let Some(engine_result) = &result.engine_result {
            proof.insert("engine_result".to_string(), json!(engine_result));
        }
        proof.insert("key_id".to_string(), json!(signed.key_id));

        debug!(intent_digest = %plan.intent_digest, attempt, "anchor submitted");
        return AttestationReceipt::new(
            plan.intent_digest.clone(),
            XRPL_BACKEND,
            attempt,
            ReceiptStatus::Submitted,
            created_at,
            evidence,
            proof,
            None,
        );
    }

    let code = classify_engine_result(result.engine_result.as_deref());
    let detail = match &result.engine_result {
        Some(engine_result) => Some(match &result.detail {
            Some(detail) => format!("{engine_result}: {detail}"),
            None => engine_result.clone(),
        }),
        None => result.detail.clone(),
    };

    AttestationReceipt::new(
        plan.intent_digest.clone(),
        XRPL_BACKEND,
        attempt,
        ReceiptStatus::Failed,
        created_at,
        evidence,
        BTreeMap::new(),
        Some(ReceiptError { code, detail }),
    )
}

/// Check a submitted anchor's validation status (single poll), producing
/// a receipt either way.
///
/// Validated ⇒ `CONFIRMED`; known-but-pending and not-yet-known ⇒
/// `DEFERRED` (not an error — the ledger just hasn't settled); transport
/// failures ⇒ `FAILED`/`BACKEND_UNAVAILABLE`.
///
/// # Errors
///
/// Only receipt-construction failures surface as errors.
pub async fn confirm(
    intent_digest: &str,
    tx_hash: &str,
    client: &dyn XrplClient,
    attempt: u32,
    memo_digest_value: &str,
    created_at: &str,
) -> Result<AttestationReceipt, ReceiptBuildError> {
    let mut evidence =
        BTreeMap::from([("memo_digest".to_string(), memo_digest_value.to_string())]);

    let result = match client.get_tx(tx_hash).await {
        Ok(result) => result,
        Err(err) => {
            return AttestationReceipt::new(
                intent_digest,
                XRPL_BACKEND,
                attempt,
                ReceiptStatus::Failed,
                created_at,
                evidence,
                BTreeMap::new(),
                Some(ReceiptError::with_detail(
                    classify_connection_error(),
                    err.to_string(),
                )),
            );
        }
    };

    if let Some(digest) = &result.exchange_digest {
        evidence.insert(TX_EXCHANGE_KEY.to_string(), digest.clone());
    }

    if result.validated {
        let mut proof: BTreeMap<String, Value> =
            BTreeMap::from([("tx_hash".to_string(), json!(tx_hash))]);
        if let Some(ledger_index) = result.ledger_index {
            proof.insert("ledger_index".to_string(), json!(ledger_index));
        }
        if let Some(engine_result) = &result.engine_result {
            proof.insert("engine_result".to_string(), json!(engine_result));
        }
        if let Some(close_time) = &result.ledger_close_time {
            proof.insert("ledger_close_time".to_string(), json!(close_time));
        }

        debug!(intent_digest = %intent_digest, attempt, "anchor confirmed");
        return AttestationReceipt::new(
            intent_digest,
            XRPL_BACKEND,
            attempt,
            ReceiptStatus::Confirmed,
            created_at,
            evidence,
            proof,
            None,
        );
    }

    // Found-but-pending and not-yet-propagated both defer: the next
    // cycle re-polls the same tx_hash.
    AttestationReceipt::new(
        intent_digest,
        XRPL_BACKEND,
        attempt,
        ReceiptStatus::Deferred,
        created_at,
        evidence,
        BTreeMap::new(),
        None,
    )
}
