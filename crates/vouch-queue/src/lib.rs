// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod intent;
mod queue;
mod receipt;
mod storage;

pub use intent::{
    AttestationIntent, INTENT_VERSION, IntentError, IntentFields, LABEL_VALUE_MAX,
    LABELS_MAX_COUNT,
};
pub use queue::{AttestationQueue, QueueError, QueuedIntent, StatusSummary};
pub use receipt::{
    AttestationReceipt, RECEIPT_VERSION, ReceiptBuildError, ReceiptError, ReceiptErrorCode,
    ReceiptStatus,
};
