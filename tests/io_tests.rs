use std::sync::Arc;

use referral_payouts::ledger::{CommissionInput, Ledger};
use referral_payouts::parsing::{self, ImportRecord};
use referral_payouts::{output, store::MemoryStore};
use rust_decimal::dec;

const INPUT: &[u8] = include_bytes!("io_tests/import_input.csv");
const OUTPUT: &str = include_str!("io_tests/wallets_output.csv");

fn read_input() -> Vec<ImportRecord> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(INPUT);
    parsing::deserialize_csv(&mut rdr).collect()
}

/// Rows that fail to parse or lack a required column are skipped.
#[test]
fn test_input() {
    let records = read_input();

    let mut espresso = CommissionInput::new(1.into(), dec!(12.5)).for_business(10.into());
    espresso.service_name = "Espresso".into();
    let expected = vec![
        ImportRecord::Payee {
            user: 1.into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
        },
        ImportRecord::Payee {
            user: 2.into(),
            first_name: "Alan".into(),
            last_name: "Turing".into(),
            email: "alan@example.com".into(),
        },
        ImportRecord::Account {
            user: 1.into(),
            account_id: "acct_ada".into(),
        },
        ImportRecord::Business {
            id: 10.into(),
            referrer: 1.into(),
            name: "Analytical Cafe".into(),
        },
        ImportRecord::Commission(espresso),
        ImportRecord::Commission(CommissionInput::new(2.into(), dec!(3.25))),
        ImportRecord::Commission(CommissionInput::new(3.into(), dec!(5))),
    ];

    assert_eq!(records, expected);
}

/// Replaying the import and printing wallets; the commission for an unknown
/// payee is dropped.
#[tokio::test]
async fn test_output() -> anyhow::Result<()> {
    let ledger = Ledger::new(Arc::new(MemoryStore::new()));
    let users = parsing::replay(&ledger, read_input()).await;

    let mut wallets = Vec::new();
    for id in users {
        if let Some(user) = ledger.store().user(id).await? {
            wallets.push(user);
        }
    }
    let mut output = Vec::new();
    output::print_wallets(&wallets, &mut output)?;
    let output = String::from_utf8(output)?;

    assert_eq!(
        output.lines().collect::<Vec<_>>(),
        OUTPUT.lines().collect::<Vec<_>>()
    );
    Ok(())
}
