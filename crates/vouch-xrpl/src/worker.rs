// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-shot worker: one queue cycle, at most two receipts.
//!
//! No loops, no scheduling, no backoff, no threads. The caller owns the
//! loop; the worker owns one cycle: pull, plan, submit, record, confirm,
//! record.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;

use vouch_queue::{AttestationQueue, AttestationReceipt, ReceiptStatus};

use crate::adapter::{confirm, plan, submit};
use crate::client::XrplClient;
use crate::signer::XrplSigner;

/// Options for [`process_one`].
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Anchor account override. Defaults to the signer's account.
    pub account: Option<String>,
    /// Process only this specific intent (must be eligible).
    pub intent_digest: Option<String>,
}

/// Result of processing one intent.
#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    /// `false` when the queue had nothing eligible.
    pub processed: bool,
    /// Queue id of the processed intent.
    pub queue_id: Option<String>,
    /// Prefixed intent digest of the processed intent.
    pub intent_digest: Option<String>,
    /// All receipts produced this cycle (0–2).
    pub receipts: Vec<AttestationReceipt>,
}

/// Process one pending intent through the XRPL backend.
///
/// Pulls the next eligible intent (or a specific one), plans, submits,
/// records, confirms once, records. `now` is injectable for
/// deterministic tests; pass `chrono::Utc::now` in production.
///
/// # Errors
///
/// Queue, planning, and receipt-construction failures. Network outcomes
/// never error — they are recorded as receipts.
pub async fn process_one(
    queue: &AttestationQueue,
    client: &dyn XrplClient,
    signer: &dyn XrplSigner,
    options: &ProcessOptions,
    now: impl Fn() -> DateTime<Utc>,
) -> Result<ProcessResult> {
    let mut pending = queue.next_pending(10).context("fetch pending intents")?;
    if let Some(wanted) = &options.intent_digest {
        pending.retain(|q| &q.intent_digest == wanted);
    }
    let Some(queued) = pending.into_iter().next() else {
        return Ok(ProcessResult::default());
    };

    let attempt = queued.next_attempt;
    let account = options
        .account
        .clone()
        .unwrap_or_else(|| signer.account().to_string());
    let anchor = plan(&queued.intent, &account).context("plan anchor")?;

    let mut receipts = Vec::new();

    let submit_time = now().to_rfc3339_opts(SecondsFormat::Secs, false);
    let submit_receipt = submit(&anchor, client, signer, attempt, &submit_time)
        .await
        .context("build submit receipt")?;
    queue.record_receipt(&submit_receipt).context("record submit receipt")?;
    receipts.push(submit_receipt.clone());

    if submit_receipt.status != ReceiptStatus::Submitted {
        debug!(queue_id = %queued.queue_id, attempt, "cycle stopped after submit");
        return Ok(ProcessResult {
            processed: true,
            queue_id: Some(queued.queue_id),
            intent_digest: Some(queued.intent_digest),
            receipts,
        });
    }

    // Accepted submits always carry a tx_hash; a missing one means the
    // proof is unusable for confirmation, so stop the cycle here.
    let Some(tx_hash) = submit_receipt.proof.get("tx_hash").and_then(Value::as_str) else {
        return Ok(ProcessResult {
            processed: true,
            queue_id: Some(queued.queue_id),
            intent_digest: Some(queued.intent_digest),
            receipts,
        });
    };

    let confirm_time = now().to_rfc3339_opts(SecondsFormat::Secs, false);
    let confirm_receipt = confirm(
        &queued.intent_digest,
        tx_hash,
        client,
        attempt,
        &anchor.memo_digest,
        &confirm_time,
    )
    .await
    .context("build confirm receipt")?;
    queue.record_receipt(&confirm_receipt).context("record confirm receipt")?;
    receipts.push(confirm_receipt);

    Ok(ProcessResult {
        processed: true,
        queue_id: Some(queued.queue_id),
        intent_digest: Some(queued.intent_digest),
        receipts,
    })
}
