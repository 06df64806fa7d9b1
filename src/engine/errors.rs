use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{DomainError, EntryId, EntryKind, PaymentStatus, UserId};
use crate::gateway::GatewayError;
use crate::ledger::LedgerError;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EligibilityError {
    #[error("User {0} has no balance to pay out")]
    NoBalance(UserId),
    #[error("User {0} has no active payout account")]
    NoActiveAccount(UserId),
    #[error("Entry {entry} is already {status}")]
    EntryNotPending { entry: EntryId, status: PaymentStatus },
    #[error("Entry {entry} is a {kind} entry and cannot be settled")]
    NotSettleable { entry: EntryId, kind: EntryKind },
    #[error("Entry {0} has nothing to pay out")]
    ZeroAmount(EntryId),
}

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Not eligible: {0}")]
    Eligibility(#[from] EligibilityError),
    #[error("Transfer failed: {0}")]
    Gateway(#[from] GatewayError),
    /// Money moved at the gateway but the local commit did not land. The
    /// transfer is registered for manual reconciliation.
    #[error(
        "Transfer {transfer_id} of {amount} to user {user_id} succeeded but was not recorded: {source}"
    )]
    Consistency {
        user_id: UserId,
        transfer_id: String,
        amount: Decimal,
        #[source]
        source: StoreError,
    },
    #[error("Wallet of user {user_id} holds {wallet} but pending entries sum to {pending}")]
    LedgerDrift {
        user_id: UserId,
        wallet: Decimal,
        pending: Decimal,
    },
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl From<StoreError> for SettlementError {
    fn from(e: StoreError) -> Self {
        SettlementError::Ledger(e.into())
    }
}

impl From<DomainError> for SettlementError {
    fn from(e: DomainError) -> Self {
        SettlementError::Ledger(e.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Eligibility,
    NotFound,
    Gateway,
    Consistency,
    Internal,
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettlementError::Validation(_) => ErrorKind::Validation,
            SettlementError::Eligibility(_) => ErrorKind::Eligibility,
            SettlementError::Gateway(_) => ErrorKind::Gateway,
            SettlementError::Consistency { .. } => ErrorKind::Consistency,
            SettlementError::LedgerDrift { .. } => ErrorKind::Internal,
            SettlementError::Ledger(e) => match e {
                LedgerError::UserNotFound(_)
                | LedgerError::EntryNotFound(_)
                | LedgerError::PayoutNotFound(_)
                | LedgerError::BusinessNotFound(_) => ErrorKind::NotFound,
                LedgerError::InvalidPage
                | LedgerError::BusinessNotOwned { .. }
                | LedgerError::DomainError(DomainError::NegativeAmount(_)) => {
                    ErrorKind::Validation
                }
                LedgerError::PayoutNotOwned { .. }
                | LedgerError::PayoutFailed(_)
                | LedgerError::PayoutOverallocated { .. }
                | LedgerError::DomainError(DomainError::EntryNotPending { .. }) => {
                    ErrorKind::Eligibility
                }
                LedgerError::DomainError(_) | LedgerError::StoreError(_) => ErrorKind::Internal,
            },
        }
    }
}
