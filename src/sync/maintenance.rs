//! Ledger maintenance operations
//!
//! Rule files evolve; these operations bring records the ledger already
//! holds in line with the current rule set, without another bank fetch.

use log::{debug, info};
use serde::Serialize;

use crate::rules::{InformationContainer, RuleSet};
use crate::traits::LedgerService;
use crate::types::*;

/// Counts from a [`reclassify`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclassifyReport {
    pub updated: usize,
    pub unchanged: usize,
    /// Transfer records are left alone: their account links come from
    /// pair detection, which a rule re-run cannot re-derive.
    pub skipped_transfers: usize,
}

/// Re-run the rule set over every transaction on the ledger and update
/// the ones whose classification changed.
///
/// The rule view is rebuilt the way it looked at import time: the
/// signed amount (withdrawals negative) and the stored description and
/// notes. Rule errors abort the pass; they are configuration errors.
pub async fn reclassify<L: LedgerService>(
    ledger: &mut L,
    rules: &RuleSet,
) -> SyncResult<ReclassifyReport> {
    let transactions = ledger.list_transactions(&TransactionFilter::default()).await?;
    info!("reclassifying {} transaction(s)", transactions.len());

    let mut report = ReclassifyReport::default();
    for (id, existing) in transactions {
        if existing.kind == TransactionKind::Transfer {
            report.skipped_transfers += 1;
            continue;
        }
        let mut information = InformationContainer::for_ledger_transaction(&existing);
        rules.apply(&mut information)?;
        let updated = information.into_reclassified(&existing);
        if updated.classification_eq(&existing) {
            debug!("no change in '{}'", existing.description);
            report.unchanged += 1;
        } else {
            info!("updating '{}'", updated.description);
            ledger.update_transaction(&id, &updated).await?;
            report.updated += 1;
        }
    }
    Ok(report)
}
