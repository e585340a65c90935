//! Traits for the two external collaborators
//!
//! The engine never talks to a real bank or bookkeeping service directly;
//! it consumes these two seams. Implementations own authentication,
//! retries and wire formats.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::types::*;

/// The institution the raw data comes from.
#[async_trait]
pub trait BankSource: Send + Sync {
    /// All accounts visible to the authenticated user, in the order the
    /// institution reports them. That order is also the reconciliation
    /// order.
    async fn list_accounts(&self) -> SyncResult<Vec<BankAccount>>;

    /// Transactions for one account, strictly after `since` when given,
    /// full available history otherwise. The returned list must be
    /// consistently ordered by date; the caller does not assume a
    /// direction.
    async fn list_transactions(
        &self,
        account: &BankAccount,
        since: Option<NaiveDate>,
    ) -> SyncResult<Vec<BankTransaction>>;

    /// The account balance as of now.
    async fn current_balance(&self, account: &BankAccount) -> SyncResult<BigDecimal>;
}

/// The bookkeeping service holding the durable records.
#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Look an account up by its display name.
    async fn find_account(&self, name: &str) -> SyncResult<Option<LedgerAccount>>;

    /// Create an account with its opening balance.
    async fn create_account(&mut self, account: &NewLedgerAccount) -> SyncResult<LedgerAccount>;

    /// The most recently dated transaction on an account, used as the
    /// lower bound for incremental fetches.
    async fn most_recent_transaction(
        &self,
        account: &LedgerAccount,
    ) -> SyncResult<Option<LedgerTransaction>>;

    /// Create a transaction; the ledger assigns the identifier.
    async fn create_transaction(
        &mut self,
        account: &LedgerAccount,
        transaction: &LedgerTransaction,
    ) -> SyncResult<TransactionId>;

    /// Replace an existing transaction's content.
    async fn update_transaction(
        &mut self,
        id: &TransactionId,
        transaction: &LedgerTransaction,
    ) -> SyncResult<()>;

    /// All transactions matching the filter, across accounts. Not used by
    /// the reconciliation path itself, only by the maintenance
    /// operations.
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> SyncResult<Vec<(TransactionId, LedgerTransaction)>>;
}
