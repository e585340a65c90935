//! Opening-balance backfill
//!
//! A new ledger account must start from the balance that existed before
//! the earliest imported transaction, so that replaying the imported
//! history forward lands exactly on the balance the bank reports today.

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::NaiveDate;

use crate::types::*;

/// Decimal places of the currency minor unit.
const MINOR_UNIT_SCALE: i64 = 2;

/// Compute the balance that existed strictly before the earliest
/// transaction in the list.
///
/// `transactions` must be ordered oldest-first; anything else is a
/// [`SyncError::Precondition`]. An empty list returns `current_balance`
/// unchanged. The result is rounded to the currency minor unit.
pub fn compute_opening_balance(
    current_balance: &BigDecimal,
    transactions: &[BankTransaction],
) -> SyncResult<BigDecimal> {
    if transactions.is_empty() {
        return Ok(current_balance.clone());
    }
    if let Some(window) = transactions.windows(2).find(|w| w[0].date > w[1].date) {
        return Err(SyncError::Precondition(format!(
            "transactions are not ordered oldest-first ({} appears before {})",
            window[0].date, window[1].date
        )));
    }

    let mut balance = current_balance.clone();
    for tx in transactions.iter().rev() {
        balance -= &tx.amount;
    }
    Ok(balance.with_scale_round(MINOR_UNIT_SCALE, RoundingMode::HalfUp))
}

/// The date to put on the opening balance: the day before the earliest
/// transaction, so the balance sorts ahead of everything replayed onto
/// the account.
pub fn opening_balance_date(transactions: &[BankTransaction]) -> Option<NaiveDate> {
    transactions
        .iter()
        .map(|tx| tx.date)
        .min()
        .and_then(|earliest| earliest.pred_opt())
}
