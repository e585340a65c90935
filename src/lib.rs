//! # Banksync Core
//!
//! The core engine of a bank-to-ledger import tool: it reconciles raw
//! bank transactions into an external bookkeeping ledger, classifying
//! each one through a declarative, priority-ordered rule set.
//!
//! ## Features
//!
//! - **Rule engine**: INI-style rule files with a typed condition
//!   language, `{field}` templates, last-writer-wins field merging and
//!   accumulating tags
//! - **Transfer detection**: withdrawal/deposit pairs across tracked
//!   accounts collapse into linked transfers instead of two free-text
//!   counterparties
//! - **Opening-balance backfill**: new ledger accounts start from the
//!   balance that preceded their imported history, decimal-exact
//! - **Incremental reconciliation**: re-runs only append what the ledger
//!   has not seen, account failures never abort the whole run
//! - **Collaborator abstraction**: the bank source and the ledger are
//!   trait seams; in-memory implementations ship for tests and demos
//!
//! ## Quick Start
//!
//! ```rust
//! use banksync_core::{Reconciler, RuleSet, SyncConfig};
//! use banksync_core::utils::{MemoryLedger, ScriptedBankSource};
//!
//! # fn main() -> Result<(), banksync_core::SyncError> {
//! let rules = RuleSet::parse(
//!     "[Outgoing money]\n\
//!      priority: 100\n\
//!      condition: amount < 0\n\
//!      type: withdrawal\n\
//!      source: {account}\n\
//!      destination: {linked_account}\n",
//! )?;
//! let bank = ScriptedBankSource::new();
//! let ledger = MemoryLedger::new();
//! let mut reconciler = Reconciler::new(bank, ledger, rules, SyncConfig::default());
//! // reconciler.sync_all().await? drives a full run.
//! # let _ = &mut reconciler;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod rules;
pub mod sync;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use rules::{InformationContainer, Rule, RuleSet};
pub use sync::*;
pub use traits::*;
pub use types::*;
