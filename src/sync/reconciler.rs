//! Account reconciliation
//!
//! The reconciler orchestrates one run: it pulls raw data from the bank
//! source, runs transfer detection across every account's batch at once,
//! classifies each transaction through the rule set, and writes the
//! results to the ledger. A collaborator failure only fails the account
//! it happened on; a rule error aborts the run, because a misconfigured
//! rule set would misclassify money movements on every account.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use log::{info, warn};
use serde::Serialize;

use crate::config::SyncConfig;
use crate::rules::RuleSet;
use crate::sync::balance::{compute_opening_balance, opening_balance_date};
use crate::sync::transfers::{detect_transfers, AccountBatch};
use crate::traits::{BankSource, LedgerService};
use crate::types::*;

/// How one account is brought up to date.
#[derive(Debug, Clone)]
enum AccountPlan {
    /// The ledger does not know the account yet: import the full
    /// history and create it with a backfilled opening balance.
    Initialize { current_balance: BigDecimal },
    /// The account exists: append transactions dated strictly after the
    /// most recent one the ledger holds.
    Append {
        account: LedgerAccount,
        since: Option<NaiveDate>,
    },
}

/// Outcome of one account's sync.
#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub account: String,
    /// Transactions created on the ledger, including any created before
    /// a failure. Never hidden: a failed account with `created > 0` was
    /// written partially.
    pub created: usize,
    pub error: Option<String>,
}

impl AccountReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub accounts: Vec<AccountReport>,
}

impl RunReport {
    pub fn transactions_created(&self) -> usize {
        self.accounts.iter().map(|a| a.created).sum()
    }

    pub fn failed_accounts(&self) -> Vec<&AccountReport> {
        self.accounts.iter().filter(|a| !a.succeeded()).collect()
    }

    pub fn fully_synced(&self) -> bool {
        self.accounts.iter().all(|a| a.succeeded())
    }
}

/// Orchestrates synchronization between a bank source and a ledger.
pub struct Reconciler<B: BankSource, L: LedgerService> {
    bank: B,
    ledger: L,
    rules: RuleSet,
    config: SyncConfig,
}

impl<B: BankSource, L: LedgerService> Reconciler<B, L> {
    pub fn new(bank: B, ledger: L, rules: RuleSet, config: SyncConfig) -> Self {
        Self {
            bank,
            ledger,
            rules,
            config,
        }
    }

    /// Reconcile every account the bank source reports, in the order it
    /// reports them.
    pub async fn sync_all(&mut self) -> SyncResult<RunReport> {
        let accounts = self.bank.list_accounts().await?;
        info!("reconciling {} account(s)", accounts.len());

        let mut report = RunReport::default();
        let mut batches: Vec<AccountBatch> = Vec::new();
        let mut plans: Vec<AccountPlan> = Vec::new();
        for account in accounts {
            match self.prepare(&account).await {
                Ok((batch, plan)) => {
                    batches.push(batch);
                    plans.push(plan);
                }
                Err(e) if !e.is_fatal() => {
                    warn!("skipping account '{}': {}", account.name, e);
                    report.accounts.push(AccountReport {
                        account: account.name,
                        created: 0,
                        error: Some(e.to_string()),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        // Pairing needs every account's batch in hand, so detection runs
        // exactly once, before any account is classified or written.
        detect_transfers(&mut batches, &self.config.transfer);

        for (batch, plan) in batches.into_iter().zip(plans) {
            let name = batch.account.name.clone();
            let (created, failure) = self.sync_batch(batch, plan).await;
            match failure {
                None => report.accounts.push(AccountReport {
                    account: name,
                    created,
                    error: None,
                }),
                Some(e) if e.is_fatal() => return Err(e),
                Some(e) => {
                    warn!("account '{}' failed after {} insertion(s): {}", name, created, e);
                    report.accounts.push(AccountReport {
                        account: name,
                        created,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Decide the plan for one account and fetch its batch.
    async fn prepare(&mut self, account: &BankAccount) -> SyncResult<(AccountBatch, AccountPlan)> {
        let plan = match self.ledger.find_account(&account.name).await? {
            Some(existing) => {
                let since = self
                    .ledger
                    .most_recent_transaction(&existing)
                    .await?
                    .map(|tx| tx.date);
                match since {
                    Some(date) => info!("account '{}' last updated {}", account.name, date),
                    None => info!("account '{}' exists but holds no transactions", account.name),
                }
                AccountPlan::Append {
                    account: existing,
                    since,
                }
            }
            None => AccountPlan::Initialize {
                current_balance: self.bank.current_balance(account).await?,
            },
        };

        let since = match &plan {
            AccountPlan::Append { since: Some(date), .. } => Some(*date),
            // "Everything" is a bounded window wide enough to predate
            // any account.
            _ => Some(self.lookback_start()),
        };
        let mut transactions = self.bank.list_transactions(account, since).await?;
        // Oldest-first everywhere downstream; stable, so intraday order
        // from the source survives.
        transactions.sort_by_key(|tx| tx.date);
        info!(
            "fetched {} transaction(s) for '{}'",
            transactions.len(),
            account.name
        );
        Ok((
            AccountBatch {
                account: account.clone(),
                transactions,
            },
            plan,
        ))
    }

    fn lookback_start(&self) -> NaiveDate {
        chrono::Utc::now().date_naive() - chrono::Duration::days(365 * self.config.lookback_years)
    }

    /// Classify and write one account's batch. Returns the number of
    /// transactions created and the failure that stopped the account, if
    /// any.
    async fn sync_batch(
        &mut self,
        batch: AccountBatch,
        plan: AccountPlan,
    ) -> (usize, Option<SyncError>) {
        // Classify everything before writing anything: a rule error must
        // not leave a half-written account behind.
        let mut classified: Vec<LedgerTransaction> = Vec::with_capacity(batch.transactions.len());
        for tx in &batch.transactions {
            let information = match self.rules.classify_transaction(&batch.account.name, tx) {
                Ok(information) => information,
                Err(e) => return (0, Some(e)),
            };
            let mut record = information.into_ledger_transaction(tx);
            if let Some(counterpart) = &tx.linked_account {
                link_transfer(
                    &mut record,
                    &batch.account.name,
                    counterpart,
                    tx.amount >= BigDecimal::from(0),
                );
            }
            classified.push(record);
        }

        let (ledger_account, since) = match plan {
            AccountPlan::Append { account, since } => (account, since),
            AccountPlan::Initialize { current_balance } => {
                let opening_balance =
                    match compute_opening_balance(&current_balance, &batch.transactions) {
                        Ok(balance) => balance,
                        Err(e) => return (0, Some(e)),
                    };
                let opening_balance_date = opening_balance_date(&batch.transactions)
                    .unwrap_or_else(|| chrono::Utc::now().date_naive());
                info!(
                    "creating account '{}' with opening balance {} dated {}",
                    batch.account.name, opening_balance, opening_balance_date
                );
                let new_account = NewLedgerAccount {
                    name: batch.account.name.clone(),
                    currency: batch.account.currency.clone(),
                    opening_balance,
                    opening_balance_date,
                };
                match self.ledger.create_account(&new_account).await {
                    Ok(account) => (account, None),
                    Err(e) => return (0, Some(e)),
                }
            }
        };

        let mut created = 0usize;
        for record in classified {
            // The fetch is already bounded, but the write keeps the same
            // strictly-after boundary so a source returning inclusive
            // ranges cannot duplicate the boundary transaction.
            if let Some(since) = since {
                if record.date <= since {
                    continue;
                }
            }
            info!(
                "inserting '{}' of {} on {}",
                record.description, record.amount, record.date
            );
            match self.ledger.create_transaction(&ledger_account, &record).await {
                Ok(_) => created += 1,
                Err(e) => return (created, Some(e)),
            }
        }
        (created, None)
    }
}

/// A detected pair is always booked as a transfer between the two
/// tracked accounts, whatever the generic rules put in the fields.
fn link_transfer(
    record: &mut LedgerTransaction,
    own_account: &str,
    counterpart: &str,
    incoming: bool,
) {
    if incoming {
        record.source = Some(counterpart.to_string());
        record.destination = Some(own_account.to_string());
    } else {
        record.source = Some(own_account.to_string());
        record.destination = Some(counterpart.to_string());
    }
    record.kind = TransactionKind::Transfer;
}
