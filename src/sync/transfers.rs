//! Transfer-pair detection
//!
//! Money moved between two tracked accounts shows up twice in a run: a
//! withdrawal on one account and a deposit on the other. Left alone, the
//! generic rules would book both against free-text counterparties. The
//! detector pairs them up beforehand and annotates each side with the
//! counterpart account's name, which rule conditions and templates see as
//! `linked_account`.

use bigdecimal::BigDecimal;
use log::{debug, warn};

use crate::config::TransferConfig;
use crate::types::*;

/// One account's fetched transactions for the current run.
#[derive(Debug, Clone)]
pub struct AccountBatch {
    pub account: BankAccount,
    pub transactions: Vec<BankTransaction>,
}

/// Position of a transaction within a slice of batches.
type TxRef = (usize, usize);

/// Find withdrawal/deposit pairs across the batches and annotate both
/// sides with `linked_account`.
///
/// The baseline match is exact absolute amount on the same day;
/// `config.date_tolerance_days` widens the window. When several deposits
/// qualify, the closest date wins, then a deposit account whose name
/// occurs in the withdrawal's description; a still-ambiguous choice is
/// logged and the first candidate wins. No transaction is consumed twice.
pub fn detect_transfers(batches: &mut [AccountBatch], config: &TransferConfig) {
    let zero = BigDecimal::from(0);
    let mut paired: Vec<TxRef> = Vec::new();

    for wi in 0..batches.len() {
        for ti in 0..batches[wi].transactions.len() {
            if paired.contains(&(wi, ti)) {
                continue;
            }
            if batches[wi].transactions[ti].amount >= zero {
                continue;
            }
            let Some((di, tj)) = find_matching_deposit(batches, &paired, (wi, ti), config) else {
                continue;
            };

            let withdrawal_account = batches[wi].account.name.clone();
            let deposit_account = batches[di].account.name.clone();
            debug!(
                "transfer pair: '{}' on {} -> '{}' on {}",
                batches[wi].transactions[ti].description,
                withdrawal_account,
                batches[di].transactions[tj].description,
                deposit_account,
            );
            batches[wi].transactions[ti].linked_account = Some(deposit_account);
            batches[di].transactions[tj].linked_account = Some(withdrawal_account);
            paired.push((wi, ti));
            paired.push((di, tj));
        }
    }
}

fn find_matching_deposit(
    batches: &[AccountBatch],
    paired: &[TxRef],
    withdrawal: TxRef,
    config: &TransferConfig,
) -> Option<TxRef> {
    let (wi, ti) = withdrawal;
    let w = &batches[wi].transactions[ti];
    let wanted = w.amount.abs();
    let description = w.description.to_lowercase();

    let mut candidates: Vec<(i64, bool, TxRef)> = Vec::new();
    for (di, batch) in batches.iter().enumerate() {
        if di == wi {
            continue;
        }
        let name_in_description = description.contains(&batch.account.name.to_lowercase());
        for (tj, d) in batch.transactions.iter().enumerate() {
            if paired.contains(&(di, tj)) {
                continue;
            }
            if d.amount <= BigDecimal::from(0) || d.amount != wanted {
                continue;
            }
            let distance = (d.date - w.date).num_days().abs();
            if distance > config.date_tolerance_days {
                continue;
            }
            candidates.push((distance, name_in_description, (di, tj)));
        }
    }
    if candidates.is_empty() {
        return None;
    }

    // Closest date first; among those, prefer a counterpart account the
    // withdrawal's description actually names.
    let best = candidates
        .iter()
        .map(|(distance, named, _)| (*distance, !*named))
        .min()?;
    let mut matching = candidates
        .iter()
        .filter(|(distance, named, _)| (*distance, !*named) == best);
    let chosen = matching.next()?;
    let remaining = matching.count();
    if remaining > 0 {
        warn!(
            "{} deposits match '{}' ({} on {}), picking the first",
            remaining + 1,
            w.description,
            w.amount,
            w.date
        );
    }
    Some(chosen.2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn tx(day: u32, amount: &str, description: &str) -> BankTransaction {
        BankTransaction::new(
            date(day),
            amount.parse::<BigDecimal>().unwrap(),
            description,
            "VIREMENT",
        )
    }

    fn batch(name: &str, transactions: Vec<BankTransaction>) -> AccountBatch {
        AccountBatch {
            account: BankAccount::new(name, "000", "EUR"),
            transactions,
        }
    }

    #[test]
    fn pairs_matching_withdrawal_and_deposit() {
        let mut batches = vec![
            batch("Compte", vec![tx(10, "-500.00", "VIREMENT LIVRET A")]),
            batch("Livret A", vec![tx(10, "500.00", "VIREMENT RECU")]),
        ];
        detect_transfers(&mut batches, &TransferConfig::default());

        assert_eq!(
            batches[0].transactions[0].linked_account.as_deref(),
            Some("Livret A")
        );
        assert_eq!(
            batches[1].transactions[0].linked_account.as_deref(),
            Some("Compte")
        );
    }

    #[test]
    fn different_amounts_or_days_do_not_pair() {
        let mut batches = vec![
            batch("Compte", vec![tx(10, "-500.00", "VIREMENT")]),
            batch(
                "Livret A",
                vec![tx(10, "500.01", "VIREMENT"), tx(12, "500.00", "VIREMENT")],
            ),
        ];
        detect_transfers(&mut batches, &TransferConfig::default());
        assert!(batches[0].transactions[0].linked_account.is_none());
        assert!(batches[1].transactions.iter().all(|t| t.linked_account.is_none()));
    }

    #[test]
    fn date_tolerance_widens_the_window() {
        let mut batches = vec![
            batch("Compte", vec![tx(10, "-500.00", "VIREMENT")]),
            batch("Livret A", vec![tx(12, "500.00", "VIREMENT")]),
        ];
        let config = TransferConfig {
            date_tolerance_days: 2,
        };
        detect_transfers(&mut batches, &config);
        assert_eq!(
            batches[0].transactions[0].linked_account.as_deref(),
            Some("Livret A")
        );
    }

    #[test]
    fn each_deposit_consumed_at_most_once() {
        // Two identical withdrawals, one matching deposit: only one pair.
        let mut batches = vec![
            batch(
                "Compte",
                vec![tx(10, "-100.00", "VIREMENT 1"), tx(10, "-100.00", "VIREMENT 2")],
            ),
            batch("Livret A", vec![tx(10, "100.00", "VIREMENT RECU")]),
        ];
        detect_transfers(&mut batches, &TransferConfig::default());

        let linked: Vec<bool> = batches[0]
            .transactions
            .iter()
            .map(|t| t.linked_account.is_some())
            .collect();
        assert_eq!(linked, vec![true, false]);
        assert!(batches[1].transactions[0].linked_account.is_some());
    }

    #[test]
    fn named_account_preferred_among_equal_candidates() {
        let mut batches = vec![
            batch("Compte", vec![tx(10, "-100.00", "VIREMENT VERS LIVRET A")]),
            batch("Autre Compte", vec![tx(10, "100.00", "VIREMENT")]),
            batch("Livret A", vec![tx(10, "100.00", "VIREMENT")]),
        ];
        detect_transfers(&mut batches, &TransferConfig::default());
        assert_eq!(
            batches[0].transactions[0].linked_account.as_deref(),
            Some("Livret A")
        );
        assert!(batches[1].transactions[0].linked_account.is_none());
    }

    #[test]
    fn two_withdrawals_never_pair() {
        let mut batches = vec![
            batch("Compte", vec![tx(10, "-100.00", "PAIEMENT")]),
            batch("Livret A", vec![tx(10, "-100.00", "PAIEMENT")]),
        ];
        detect_transfers(&mut batches, &TransferConfig::default());
        assert!(batches[0].transactions[0].linked_account.is_none());
        assert!(batches[1].transactions[0].linked_account.is_none());
    }
}
