use rust_decimal::Decimal;

use crate::domain::{BusinessId, DomainError, EntryId, PayoutId, UserId};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("User {0} not found")]
    UserNotFound(UserId),
    #[error("Ledger entry {0} not found")]
    EntryNotFound(EntryId),
    #[error("Payout {0} not found")]
    PayoutNotFound(PayoutId),
    #[error("Business {0} not found")]
    BusinessNotFound(BusinessId),
    #[error("Business {business} is not referred by user {user}")]
    BusinessNotOwned { business: BusinessId, user: UserId },
    #[error("Payout {payout} belongs to user {owner}, not {user}")]
    PayoutNotOwned {
        payout: PayoutId,
        owner: UserId,
        user: UserId,
    },
    #[error("Payout {0} failed and cannot settle entries")]
    PayoutFailed(PayoutId),
    #[error("Payout {payout} of {amount} cannot cover {linked} of linked entries")]
    PayoutOverallocated {
        payout: PayoutId,
        amount: Decimal,
        linked: Decimal,
    },
    #[error("Page and limit must both be at least 1")]
    InvalidPage,
    #[error("Domain error: {0}")]
    DomainError(#[from] DomainError),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
}
