//! CSV import of payees, payout accounts, referred businesses and commissions.
//!
//! Parsing happens in two stages:
//! 1. Serde deserializes each CSV row into a flat `CsvRecord`.
//! 2. `TryFrom<CsvRecord>` converts it into a typed `ImportRecord`.
//!
//! Malformed rows or rows missing a column their type needs are logged and skipped.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{AccountStatus, BusinessId, UserId};
use crate::ledger::{CommissionInput, Ledger, LedgerError};

#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RecordType {
    Payee,
    Account,
    Business,
    Commission,
}

/// Flat representation of a single CSV row. Which optional columns are
/// required depends on `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CsvRecord {
    r#type: RecordType,
    user: UserId,
    business: Option<BusinessId>,
    amount: Option<Decimal>,
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    account: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportRecord {
    Payee {
        user: UserId,
        first_name: String,
        last_name: String,
        email: String,
    },
    Account {
        user: UserId,
        account_id: String,
    },
    Business {
        id: BusinessId,
        referrer: UserId,
        name: String,
    },
    Commission(CommissionInput),
}

impl ImportRecord {
    pub fn user(&self) -> UserId {
        match self {
            ImportRecord::Payee { user, .. } | ImportRecord::Account { user, .. } => *user,
            ImportRecord::Business { referrer, .. } => *referrer,
            ImportRecord::Commission(input) => input.user_id,
        }
    }
}

/// Returns an iterator that lazily deserializes CSV rows into import records,
/// skipping any rows that fail to parse or convert.
pub fn deserialize_csv<D: std::io::Read>(
    reader: &mut csv::Reader<D>,
) -> impl Iterator<Item = ImportRecord> {
    reader
        .deserialize::<CsvRecord>()
        .filter_map(|result| match result {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Failed to parse import row: {e}");
                None
            }
        })
        .filter_map(|record| match ImportRecord::try_from(record) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Failed to convert import row: {e}");
                None
            }
        })
}

#[derive(Debug, thiserror::Error)]
enum IntoImportRecordError {
    #[error("Missing email for payee")]
    MissingEmailForPayee,
    #[error("Missing account id for account")]
    MissingAccountId,
    #[error("Missing business id for business")]
    MissingBusinessId,
    #[error("Missing amount for commission")]
    MissingAmountForCommission,
}

impl TryFrom<CsvRecord> for ImportRecord {
    type Error = IntoImportRecordError;

    fn try_from(value: CsvRecord) -> Result<Self, Self::Error> {
        match value.r#type {
            RecordType::Payee => Ok(ImportRecord::Payee {
                user: value.user,
                first_name: value.first_name.unwrap_or_default(),
                last_name: value.last_name.unwrap_or_default(),
                email: value
                    .email
                    .ok_or(IntoImportRecordError::MissingEmailForPayee)?,
            }),
            RecordType::Account => Ok(ImportRecord::Account {
                user: value.user,
                account_id: value.account.ok_or(IntoImportRecordError::MissingAccountId)?,
            }),
            RecordType::Business => Ok(ImportRecord::Business {
                id: value
                    .business
                    .ok_or(IntoImportRecordError::MissingBusinessId)?,
                referrer: value.user,
                name: value.name.unwrap_or_default(),
            }),
            RecordType::Commission => {
                let amount = value
                    .amount
                    .ok_or(IntoImportRecordError::MissingAmountForCommission)?;
                let mut input = CommissionInput::new(value.user, amount);
                input.business_entity_id = value.business;
                input.service_name = value.name.unwrap_or_default();
                Ok(ImportRecord::Commission(input))
            }
        }
    }
}

async fn apply(ledger: &Ledger, record: ImportRecord) -> Result<(), LedgerError> {
    match record {
        ImportRecord::Payee {
            user,
            first_name,
            last_name,
            email,
        } => {
            ledger
                .upsert_payee(user, &first_name, &last_name, &email)
                .await?;
        }
        ImportRecord::Account { user, account_id } => {
            ledger
                .link_payout_account(user, &account_id, AccountStatus::Active)
                .await?;
        }
        ImportRecord::Business { id, referrer, name } => {
            ledger.register_business(id, referrer, &name).await?;
        }
        ImportRecord::Commission(input) => {
            ledger.record_commission(input).await?;
        }
    }
    Ok(())
}

/// Applies records in order, logging and skipping the ones the ledger
/// rejects. Returns every user a record referred to.
pub async fn replay(
    ledger: &Ledger,
    records: impl IntoIterator<Item = ImportRecord>,
) -> BTreeSet<UserId> {
    let mut users = BTreeSet::new();
    for record in records {
        users.insert(record.user());
        if let Err(e) = apply(ledger, record).await {
            warn!("Error applying import row: {e}");
        }
    }
    users
}
