//! In-memory collaborator implementations for testing and demos

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Clone)]
struct StoredAccount {
    account: LedgerAccount,
    opening_balance: BigDecimal,
    #[allow(dead_code)]
    opening_balance_date: NaiveDate,
}

#[derive(Debug, Default)]
struct LedgerInner {
    accounts: Vec<StoredAccount>,
    /// Account id -> records, in insertion order.
    transactions: HashMap<String, Vec<(TransactionId, LedgerTransaction)>>,
}

/// In-memory [`LedgerService`] implementation.
///
/// Clones share the same underlying store, so a test can keep a handle
/// while the reconciler owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<RwLock<LedgerInner>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions stored for an account name.
    pub fn transaction_count(&self, account_name: &str) -> usize {
        let inner = self.inner.read().unwrap();
        inner
            .accounts
            .iter()
            .find(|stored| stored.account.name == account_name)
            .and_then(|stored| inner.transactions.get(&stored.account.id))
            .map(|records| records.len())
            .unwrap_or(0)
    }

    /// Replay an account's records forward from its opening balance.
    /// Transfers count against the account named as their source.
    pub fn account_balance(&self, account_name: &str) -> Option<BigDecimal> {
        let inner = self.inner.read().unwrap();
        let stored = inner
            .accounts
            .iter()
            .find(|stored| stored.account.name == account_name)?;
        let mut balance = stored.opening_balance.clone();
        if let Some(records) = inner.transactions.get(&stored.account.id) {
            for (_, tx) in records {
                let outgoing = match tx.kind {
                    TransactionKind::Withdrawal => true,
                    TransactionKind::Deposit => false,
                    TransactionKind::Transfer => tx.source.as_deref() == Some(account_name),
                };
                if outgoing {
                    balance -= &tx.amount;
                } else {
                    balance += &tx.amount;
                }
            }
        }
        Some(balance)
    }

    /// All records stored for an account name, in insertion order.
    pub fn transactions_for(&self, account_name: &str) -> Vec<LedgerTransaction> {
        let inner = self.inner.read().unwrap();
        inner
            .accounts
            .iter()
            .find(|stored| stored.account.name == account_name)
            .and_then(|stored| inner.transactions.get(&stored.account.id))
            .map(|records| records.iter().map(|(_, tx)| tx.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LedgerService for MemoryLedger {
    async fn find_account(&self, name: &str) -> SyncResult<Option<LedgerAccount>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .accounts
            .iter()
            .find(|stored| stored.account.name == name)
            .map(|stored| stored.account.clone()))
    }

    async fn create_account(&mut self, account: &NewLedgerAccount) -> SyncResult<LedgerAccount> {
        let mut inner = self.inner.write().unwrap();
        if inner.accounts.iter().any(|s| s.account.name == account.name) {
            return Err(SyncError::Ledger(format!(
                "account '{}' already exists",
                account.name
            )));
        }
        let created = LedgerAccount {
            id: Uuid::new_v4().to_string(),
            name: account.name.clone(),
            currency: account.currency.clone(),
        };
        inner.transactions.insert(created.id.clone(), Vec::new());
        inner.accounts.push(StoredAccount {
            account: created.clone(),
            opening_balance: account.opening_balance.clone(),
            opening_balance_date: account.opening_balance_date,
        });
        Ok(created)
    }

    async fn most_recent_transaction(
        &self,
        account: &LedgerAccount,
    ) -> SyncResult<Option<LedgerTransaction>> {
        let inner = self.inner.read().unwrap();
        let records = inner
            .transactions
            .get(&account.id)
            .ok_or_else(|| SyncError::Ledger(format!("unknown account '{}'", account.name)))?;
        // max_by_key keeps the last maximum, i.e. the latest insertion
        // among records sharing the most recent date.
        Ok(records
            .iter()
            .max_by_key(|(_, tx)| tx.date)
            .map(|(_, tx)| tx.clone()))
    }

    async fn create_transaction(
        &mut self,
        account: &LedgerAccount,
        transaction: &LedgerTransaction,
    ) -> SyncResult<TransactionId> {
        let mut inner = self.inner.write().unwrap();
        let records = inner
            .transactions
            .get_mut(&account.id)
            .ok_or_else(|| SyncError::Ledger(format!("unknown account '{}'", account.name)))?;
        let id = TransactionId(Uuid::new_v4().to_string());
        records.push((id.clone(), transaction.clone()));
        Ok(id)
    }

    async fn update_transaction(
        &mut self,
        id: &TransactionId,
        transaction: &LedgerTransaction,
    ) -> SyncResult<()> {
        let mut inner = self.inner.write().unwrap();
        for records in inner.transactions.values_mut() {
            if let Some(slot) = records.iter_mut().find(|(stored_id, _)| stored_id == id) {
                slot.1 = transaction.clone();
                return Ok(());
            }
        }
        Err(SyncError::Ledger(format!("transaction '{}' not found", id)))
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> SyncResult<Vec<(TransactionId, LedgerTransaction)>> {
        let inner = self.inner.read().unwrap();
        let mut result = Vec::new();
        // Account creation order, then insertion order: deterministic.
        for stored in &inner.accounts {
            if let Some(records) = inner.transactions.get(&stored.account.id) {
                for (id, tx) in records {
                    if filter.matches(tx) {
                        result.push((id.clone(), tx.clone()));
                    }
                }
            }
        }
        Ok(result)
    }
}

#[derive(Debug, Default)]
struct BankInner {
    accounts: Vec<BankAccount>,
    /// Account name -> transactions, in the order the "institution"
    /// reports them.
    transactions: HashMap<String, Vec<BankTransaction>>,
    balances: HashMap<String, BigDecimal>,
    failing: HashSet<String>,
}

/// Scripted [`BankSource`] implementation.
///
/// Tests add accounts, transactions and balances up front (or between
/// runs, through a cloned handle) and the source serves them back.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBankSource {
    inner: Arc<RwLock<BankInner>>,
}

impl ScriptedBankSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, account: BankAccount, balance: BigDecimal) {
        let mut inner = self.inner.write().unwrap();
        inner.balances.insert(account.name.clone(), balance);
        inner.transactions.entry(account.name.clone()).or_default();
        inner.accounts.push(account);
    }

    pub fn add_transaction(&self, account_name: &str, transaction: BankTransaction) {
        self.inner
            .write()
            .unwrap()
            .transactions
            .entry(account_name.to_string())
            .or_default()
            .push(transaction);
    }

    pub fn set_balance(&self, account_name: &str, balance: BigDecimal) {
        self.inner
            .write()
            .unwrap()
            .balances
            .insert(account_name.to_string(), balance);
    }

    /// Make transaction fetches for one account fail, to exercise
    /// per-account failure isolation.
    pub fn fail_fetch_for(&self, account_name: &str) {
        self.inner
            .write()
            .unwrap()
            .failing
            .insert(account_name.to_string());
    }
}

#[async_trait]
impl BankSource for ScriptedBankSource {
    async fn list_accounts(&self) -> SyncResult<Vec<BankAccount>> {
        Ok(self.inner.read().unwrap().accounts.clone())
    }

    async fn list_transactions(
        &self,
        account: &BankAccount,
        since: Option<NaiveDate>,
    ) -> SyncResult<Vec<BankTransaction>> {
        let inner = self.inner.read().unwrap();
        if inner.failing.contains(&account.name) {
            return Err(SyncError::BankSource(format!(
                "scripted fetch failure for '{}'",
                account.name
            )));
        }
        let transactions = inner
            .transactions
            .get(&account.name)
            .ok_or_else(|| SyncError::BankSource(format!("unknown account '{}'", account.name)))?;
        Ok(transactions
            .iter()
            .filter(|tx| since.is_none_or(|bound| tx.date > bound))
            .cloned()
            .collect())
    }

    async fn current_balance(&self, account: &BankAccount) -> SyncResult<BigDecimal> {
        self.inner
            .read()
            .unwrap()
            .balances
            .get(&account.name)
            .cloned()
            .ok_or_else(|| SyncError::BankSource(format!("unknown account '{}'", account.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, day).unwrap()
    }

    #[tokio::test]
    async fn ledger_assigns_ids_and_finds_most_recent() {
        let mut ledger = MemoryLedger::new();
        let account = ledger
            .create_account(&NewLedgerAccount {
                name: "Compte".to_string(),
                currency: "EUR".to_string(),
                opening_balance: BigDecimal::from(100),
                opening_balance_date: date(1),
            })
            .await
            .unwrap();

        assert!(ledger
            .most_recent_transaction(&account)
            .await
            .unwrap()
            .is_none());

        let tx = LedgerTransaction {
            kind: TransactionKind::Deposit,
            date: date(5),
            amount: BigDecimal::from(10),
            description: "first".to_string(),
            source: None,
            destination: None,
            category: None,
            tags: vec![],
            notes: None,
        };
        let first_id = ledger.create_transaction(&account, &tx).await.unwrap();
        let mut later = tx.clone();
        later.date = date(9);
        later.description = "second".to_string();
        let second_id = ledger.create_transaction(&account, &later).await.unwrap();
        assert_ne!(first_id, second_id);

        let recent = ledger
            .most_recent_transaction(&account)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recent.description, "second");
        assert_eq!(ledger.transaction_count("Compte"), 2);
    }

    #[tokio::test]
    async fn scripted_source_filters_strictly_after_since() {
        let bank = ScriptedBankSource::new();
        let account = BankAccount::new("Compte", "001", "EUR");
        bank.add_account(account.clone(), BigDecimal::from(0));
        for day in [3, 5, 8] {
            bank.add_transaction(
                "Compte",
                BankTransaction::new(date(day), BigDecimal::from(1), "tx", "OP"),
            );
        }

        let all = bank.list_transactions(&account, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let after = bank
            .list_transactions(&account, Some(date(5)))
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].date, date(8));
    }

    #[tokio::test]
    async fn account_balance_replays_transfers_by_direction() {
        let mut ledger = MemoryLedger::new();
        let account = ledger
            .create_account(&NewLedgerAccount {
                name: "Compte".to_string(),
                currency: "EUR".to_string(),
                opening_balance: BigDecimal::from(100),
                opening_balance_date: date(1),
            })
            .await
            .unwrap();

        let outgoing = LedgerTransaction {
            kind: TransactionKind::Transfer,
            date: date(2),
            amount: BigDecimal::from(30),
            description: "to savings".to_string(),
            source: Some("Compte".to_string()),
            destination: Some("Livret A".to_string()),
            category: None,
            tags: vec![],
            notes: None,
        };
        ledger.create_transaction(&account, &outgoing).await.unwrap();

        assert_eq!(
            ledger.account_balance("Compte"),
            Some(BigDecimal::from(70))
        );
    }
}
