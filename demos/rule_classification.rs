//! Rule classification example
//!
//! Classifies a handful of raw transactions through a rule file and dumps
//! the resulting ledger records as JSON, without touching any service.

use banksync_core::{BankTransaction, RuleSet};
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

    [SNCF]
    priority: 1000
    condition: description =~ \"SNCF\" and amount < 0
    category: Voyages
    tags: train

    [SNCF Selecta]
    priority: 1001
    condition: description =~ \"SELECTA\" and amount < 0
    category: Nourriture
    tags: café

    [Cash machine]
    priority: 1000
    condition: operation_type =~ \"RETRAIT AU DISTRIBUTEUR.*\"
    destination:
    category: Especes
";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    println!("Banksync Core - Rule Classification Example\n");

    let rules = RuleSet::parse(RULES)?;
    println!("Loaded {} rules\n", rules.len());

    let samples = [
        ("-2.30", "SELECTA FR SNCF 123", "PAIEMENT PAR CARTE"),
        ("-47.00", "SNCF INTERNET", "PAIEMENT PAR CARTE"),
        ("-60.00", "RETRAIT DAB PARIS", "RETRAIT AU DISTRIBUTEUR PARIS"),
        ("1700.00", "VIR SALAIRE ACME", "VIREMENT EN VOTRE FAVEUR"),
    ];

    for (amount, description, operation_type) in samples {
        let tx = BankTransaction::new(
            NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(),
            amount.parse::<BigDecimal>()?,
            description,
            operation_type,
        );
        let information = rules.classify_transaction("Compte de Dépôt", &tx)?;
        let record = information.into_ledger_transaction(&tx);
        println!("{}", serde_json::to_string_pretty(&record)?);
        println!();
    }

    Ok(())
}
