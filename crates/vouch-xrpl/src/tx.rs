// SPDX-License-Identifier: MIT OR Apache-2.0

//! The unsigned transaction recipe.
//!
//! A deterministic Payment-to-self carrying the memo. Sequence, Fee,
//! and SigningPubKey are submit-time concerns and never appear here.

use serde_json::{Value, json};

use crate::memo::memo_type_hex;
use crate::PlanError;

/// Build an unsigned Payment-to-self transaction dict.
///
/// The recipe requires no network state and contains no secrets. The
/// signer completes it with Sequence, Fee, and SigningPubKey at submit
/// time.
///
/// # Errors
///
/// [`PlanError::Amount`] unless `amount_drops` is `"0"` or `"1"`;
/// [`PlanError::EmptyField`] for an empty account or memo.
pub fn plan_payment_to_self(
    account: &str,
    memo_data_hex: &str,
    amount_drops: &str,
) -> Result<Value, PlanError> {
    if !matches!(amount_drops, "0" | "1") {
        return Err(PlanError::Amount(amount_drops.to_string()));
    }
    if account.is_empty() {
        return Err(PlanError::EmptyField("account"));
    }
    if memo_data_hex.is_empty() {
        return Err(PlanError::EmptyField("memo_data_hex"));
    }

    Ok(json!({
        "TransactionType": "Payment",
        "Account": account,
        "Destination": account,
        "Amount": amount_drops,
        "Memos": [
            {
                "Memo": {
                    "MemoType": memo_type_hex(),
                    "MemoData": memo_data_hex,
                }
            }
        ],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipe_is_a_self_payment() {
        let tx = plan_payment_to_self("rAccount1", "deadbeef", "1").unwrap();
        assert_eq!(tx["TransactionType"], "Payment");
        assert_eq!(tx["Account"], tx["Destination"]);
        assert_eq!(tx["Amount"], "1");
        assert_eq!(tx["Memos"].as_array().unwrap().len(), 1);
        assert_eq!(tx["Memos"][0]["Memo"]["MemoData"], "deadbeef");
    }

    #[test]
    fn no_submit_time_fields() {
        let tx = plan_payment_to_self("rAccount1", "deadbeef", "0").unwrap();
        for field in ["Sequence", "Fee", "SigningPubKey", "LastLedgerSequence"] {
            assert!(tx.get(field).is_none(), "{field} must not be planned");
        }
    }

    #[test]
    fn amount_restricted_to_zero_or_one() {
        assert!(plan_payment_to_self("r", "aa", "0").is_ok());
        assert!(plan_payment_to_self("r", "aa", "1").is_ok());
        assert!(matches!(
            plan_payment_to_self("r", "aa", "2"),
            Err(PlanError::Amount(_))
        ));
    }

    #[test]
    fn empty_inputs_rejected() {
        assert!(matches!(
            plan_payment_to_self("", "aa", "1"),
            Err(PlanError::EmptyField("account"))
        ));
        assert!(matches!(
            plan_payment_to_self("r", "", "1"),
            Err(PlanError::EmptyField("memo_data_hex"))
        ));
    }
}
