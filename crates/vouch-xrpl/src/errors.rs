// SPDX-License-Identifier: MIT OR Apache-2.0

//! XRPL engine-result classification.
//!
//! Kept coarse and conservative: prefixes map to a small set of receipt
//! error categories, and anything unrecognized is UNKNOWN rather than a
//! guess.
//!
//! Engine result prefixes:
//! - `tes`: success (`tesSUCCESS`)
//! - `tec`: claimed cost — included in a ledger but "failed"
//! - `tef`: local failure — not forwarded
//! - `tem`: malformed — not forwarded
//! - `ter`: retry — maybe later

use vouch_queue::ReceiptErrorCode;

/// Map an XRPL engine result to a receipt error code.
///
/// `tesSUCCESS` should never be classified as an error — callers check
/// for success first. If it arrives anyway, it maps to UNKNOWN instead
/// of panicking. `None` means the engine never answered.
#[must_use]
pub fn classify_engine_result(engine_result: Option<&str>) -> ReceiptErrorCode {
    let Some(engine_result) = engine_result else {
        return ReceiptErrorCode::Unknown;
    };

    if engine_result == "tesSUCCESS" {
        return ReceiptErrorCode::Unknown;
    }

    if ["tem", "tef", "tec", "ter"]
        .iter()
        .any(|prefix| engine_result.starts_with(prefix))
    {
        return ReceiptErrorCode::Rejected;
    }

    ReceiptErrorCode::Unknown
}

/// Classify a connection-level failure: the node never responded.
#[must_use]
pub fn classify_connection_error() -> ReceiptErrorCode {
    ReceiptErrorCode::BackendUnavailable
}

/// Classify a confirmation timeout.
#[must_use]
pub fn classify_timeout() -> ReceiptErrorCode {
    ReceiptErrorCode::Timeout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_prefixes_map_to_rejected() {
        for result in ["temBAD_FEE", "tefPAST_SEQ", "tecPATH_DRY", "terQUEUED"] {
            assert_eq!(
                classify_engine_result(Some(result)),
                ReceiptErrorCode::Rejected,
                "{result}"
            );
        }
    }

    #[test]
    fn success_and_unknown_map_to_unknown() {
        assert_eq!(
            classify_engine_result(Some("tesSUCCESS")),
            ReceiptErrorCode::Unknown
        );
        assert_eq!(
            classify_engine_result(Some("xyzUNKNOWN")),
            ReceiptErrorCode::Unknown
        );
        assert_eq!(classify_engine_result(None), ReceiptErrorCode::Unknown);
    }

    #[test]
    fn transport_and_timeout_classes() {
        assert_eq!(classify_connection_error(), ReceiptErrorCode::BackendUnavailable);
        assert_eq!(classify_timeout(), ReceiptErrorCode::Timeout);
    }
}
