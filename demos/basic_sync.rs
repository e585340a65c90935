//! Basic synchronization example
//!
//! Runs a full reconciliation of a scripted bank against an in-memory
//! ledger: initial import with opening-balance backfill, transfer
//! detection across two accounts, and an incremental re-run.

use banksync_core::utils::{MemoryLedger, ScriptedBankSource};
use banksync_core::{BankAccount, BankTransaction, Reconciler, RuleSet, SyncConfig};
use bigdecimal::BigDecimal;
use chrono::NaiveDate;

const RULES: &str = "
    [Outgoing money]
    priority: 100
    condition: amount < 0
    type: withdrawal
    source: {account}
    destination: {linked_account}

    [Incoming money]
    priority: 100
    condition: amount >= 0
    type: deposit
    source: {linked_account}
    destination: {account}

    [Groceries]
    priority: 1000
    condition: description =~ \"CARREFOUR\" and amount < 0
    category: Courses
    tags: courses

    [Cash machine]
    priority: 1000
    condition: operation_type =~ \"RETRAIT AU DISTRIBUTEUR.*\"
    destination: Cash wallet
    category: Especes
    tags: cash
";

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

fn amount(s: &str) -> BigDecimal {
    s.parse().unwrap()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    println!("Banksync Core - Basic Sync Example\n");

    // 1. A scripted bank with two accounts and an internal transfer
    println!("Seeding the scripted bank source...");
    let bank = ScriptedBankSource::new();
    bank.add_account(
        BankAccount::new("Compte de Dépôt", "0001", "EUR"),
        amount("1560.50"),
    );
    bank.add_account(BankAccount::new("Livret A", "0002", "EUR"), amount("1500.00"));
    for (day, value, description, operation_type) in [
        (4, "2000.00", "VIR SALAIRE ACME", "VIREMENT EN VOTRE FAVEUR"),
        (9, "-54.10", "CARREFOUR MARKET PARIS", "PAIEMENT PAR CARTE"),
        (11, "-60.00", "RETRAIT DAB", "RETRAIT AU DISTRIBUTEUR"),
        (15, "-500.00", "VIREMENT LIVRET A", "VIREMENT EMIS"),
    ] {
        bank.add_transaction(
            "Compte de Dépôt",
            BankTransaction::new(date(day), amount(value), description, operation_type),
        );
    }
    bank.add_transaction(
        "Livret A",
        BankTransaction::new(
            date(15),
            amount("500.00"),
            "VIREMENT RECU",
            "VIREMENT EN VOTRE FAVEUR",
        ),
    );

    // 2. First run: both accounts are new on the ledger
    println!("Running the initial import...\n");
    let ledger = MemoryLedger::new();
    let rules = RuleSet::parse(RULES)?;
    let mut reconciler = Reconciler::new(bank.clone(), ledger.clone(), rules, SyncConfig::default());

    let report = reconciler.sync_all().await?;
    for account in &report.accounts {
        match &account.error {
            None => println!(
                "  {} synced, {} transaction(s) created",
                account.account, account.created
            ),
            Some(reason) => println!("  {} FAILED: {}", account.account, reason),
        }
    }
    println!();

    for name in ["Compte de Dépôt", "Livret A"] {
        println!(
            "  {} balance replayed from opening: {}",
            name,
            ledger.account_balance(name).unwrap()
        );
    }
    println!();

    // The transfer pair was collapsed into linked records.
    let outgoing = &ledger.transactions_for("Compte de Dépôt")[3];
    println!(
        "  Transfer booked as: {} -> {} ({})",
        outgoing.source.as_deref().unwrap_or("?"),
        outgoing.destination.as_deref().unwrap_or("?"),
        outgoing.amount
    );
    println!();

    // 3. New activity, incremental re-run
    println!("Adding new bank activity and re-running...");
    bank.add_transaction(
        "Compte de Dépôt",
        BankTransaction::new(
            date(22),
            amount("-12.00"),
            "SELECTA FR SNCF 123",
            "PAIEMENT PAR CARTE",
        ),
    );
    bank.set_balance("Compte de Dépôt", amount("1548.50"));

    let report = reconciler.sync_all().await?;
    println!(
        "  second run created {} transaction(s) (only the new one)",
        report.transactions_created()
    );

    Ok(())
}
