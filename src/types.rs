//! Core types and data structures for the synchronization engine

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Direction of a ledger transaction.
///
/// The ledger stores amounts as positive magnitudes; the kind carries the
/// direction. A `Transfer` links two tracked asset accounts instead of an
/// asset account and a free-text counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Withdrawal,
    Deposit,
    Transfer,
}

impl TransactionKind {
    /// The kind implied by a signed bank amount when no rule decided one.
    pub fn from_signed_amount(amount: &BigDecimal) -> Self {
        if *amount < BigDecimal::from(0) {
            TransactionKind::Withdrawal
        } else {
            TransactionKind::Deposit
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Deposit => "deposit",
            TransactionKind::Transfer => "transfer",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "deposit" => Ok(TransactionKind::Deposit),
            "transfer" => Ok(TransactionKind::Transfer),
            other => Err(format!("unknown transaction type '{}'", other)),
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An account as reported by the bank source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    /// Display name, also used as the ledger account name.
    pub name: String,
    /// Account number at the institution.
    pub number: String,
    /// ISO currency code.
    pub currency: String,
}

impl BankAccount {
    pub fn new(
        name: impl Into<String>,
        number: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            number: number.into(),
            currency: currency.into(),
        }
    }
}

/// A raw transaction record fetched from the bank source.
///
/// `amount` is signed: positive means money entering the account. The
/// `linked_account` annotation is empty until the transfer detector pairs
/// the transaction with its counterpart on another tracked account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub date: NaiveDate,
    pub amount: BigDecimal,
    pub description: String,
    /// Free-text operation category from the source (e.g. card payment,
    /// direct debit), available to rule conditions.
    pub operation_type: String,
    pub notes: String,
    /// Counterpart account name, set only on detected transfer pairs.
    pub linked_account: Option<String>,
}

impl BankTransaction {
    pub fn new(
        date: NaiveDate,
        amount: BigDecimal,
        description: impl Into<String>,
        operation_type: impl Into<String>,
    ) -> Self {
        Self {
            date,
            amount,
            description: description.into(),
            operation_type: operation_type.into(),
            notes: String::new(),
            linked_account: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

/// An account that exists on the ledger service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAccount {
    /// Opaque identifier assigned by the ledger.
    pub id: String,
    pub name: String,
    pub currency: String,
}

/// The record sent to the ledger when creating an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerAccount {
    pub name: String,
    pub currency: String,
    /// Balance immediately before the earliest imported transaction.
    pub opening_balance: BigDecimal,
    /// Dated the day before the earliest transaction, so the opening
    /// balance sorts ahead of everything replayed onto the account.
    pub opening_balance_date: NaiveDate,
}

/// Opaque identifier the ledger assigns to a created transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub String);

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A classified transaction ready to be written to the ledger.
///
/// `amount` is a positive magnitude; the direction lives in `kind`.
/// `Some("")` and `None` are distinct for the optional string fields: a
/// rule can explicitly unset a field to the empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub kind: TransactionKind,
    pub date: NaiveDate,
    pub amount: BigDecimal,
    pub description: String,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

impl LedgerTransaction {
    /// The bank-side signed amount: negative for withdrawals.
    pub fn signed_amount(&self) -> BigDecimal {
        match self.kind {
            TransactionKind::Withdrawal => -&self.amount,
            _ => self.amount.clone(),
        }
    }

    /// Whether two records carry the same classification. Used to decide
    /// if a re-run of the rules actually changed anything.
    pub fn classification_eq(&self, other: &LedgerTransaction) -> bool {
        self.kind == other.kind
            && self.description == other.description
            && self.source == other.source
            && self.destination == other.destination
            && self.category == other.category
            && self.tags == other.tags
            && self.notes == other.notes
    }
}

/// Filter accepted by [`crate::traits::LedgerService::list_transactions`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// Only transactions without any tag.
    pub untagged_only: bool,
    /// Only transactions without a category.
    pub uncategorized_only: bool,
}

impl TransactionFilter {
    pub fn matches(&self, transaction: &LedgerTransaction) -> bool {
        if self.untagged_only && !transaction.tags.is_empty() {
            return false;
        }
        if self.uncategorized_only && transaction.category.is_some() {
            return false;
        }
        true
    }
}

/// Errors that can occur while synchronizing.
///
/// Rule errors are configuration errors and abort the whole run;
/// collaborator errors are caught at the reconciler boundary and reported
/// per account.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("rule '{rule}': {message}")]
    RuleParse { rule: String, message: String },
    #[error("rule '{rule}': {message}")]
    RuleEvaluation { rule: String, message: String },
    #[error("cannot read rules at '{path}': {source}")]
    RuleFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("bank source error: {0}")]
    BankSource(String),
    #[error("ledger error: {0}")]
    Ledger(String),
}

impl SyncError {
    /// A fatal error aborts the run instead of failing a single account.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::RuleParse { .. }
                | SyncError::RuleEvaluation { .. }
                | SyncError::RuleFile { .. }
        )
    }
}

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;
