//! Serializes payee wallets to CSV.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{User, UserId};

/// Output columns: user, name, wallet_balance, total_earnings, businesses_referred.
#[derive(Debug, Serialize)]
struct OutputCsv {
    user: UserId,
    name: String,
    wallet_balance: Decimal,
    total_earnings: Decimal,
    businesses_referred: u32,
}

pub fn print_wallets<'a>(
    users: impl IntoIterator<Item = &'a User>,
    writer: impl std::io::Write,
) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for user in users {
        let output_csv = OutputCsv {
            user: user.id,
            name: user.display_name(),
            wallet_balance: user.wallet.balance(),
            total_earnings: user.wallet.total_earnings(),
            businesses_referred: user.total_businesses_referred,
        };
        wtr.serialize(output_csv)?;
    }
    wtr.flush()?;
    Ok(())
}
