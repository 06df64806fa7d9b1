//! Persistence seam.
//!
//! Reads are plain lookups returning owned rows. Writes only ever happen through
//! [`Store::apply`], which lands a whole [`ChangeSet`] or nothing.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{
    BusinessEntity, BusinessId, EarningEntry, EntryId, Payout, PayoutAccount, PayoutId, User,
    UserId,
};
use crate::ledger::EntryFilter;

pub use locks::{RowGuard, RowKey, RowLocks};
pub use memory::MemoryStore;

mod locks;
mod memory;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Rows written by one unit of work. Every row is an upsert keyed by its id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub users: Vec<User>,
    pub accounts: Vec<PayoutAccount>,
    pub entries: Vec<EarningEntry>,
    pub payouts: Vec<Payout>,
    pub businesses: Vec<BusinessEntity>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
            && self.accounts.is_empty()
            && self.entries.is_empty()
            && self.payouts.is_empty()
            && self.businesses.is_empty()
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError>;
    async fn payout_account(&self, user: UserId) -> Result<Option<PayoutAccount>, StoreError>;
    async fn payout_account_by_gateway_id(
        &self,
        account_id: &str,
    ) -> Result<Option<PayoutAccount>, StoreError>;
    /// Users with a positive wallet and an active payout account, ordered by id.
    async fn users_eligible_for_payout(&self) -> Result<Vec<(UserId, Decimal)>, StoreError>;

    async fn entry(&self, id: EntryId) -> Result<Option<EarningEntry>, StoreError>;
    /// Matching entries, newest first.
    async fn entries(&self, filter: &EntryFilter) -> Result<Vec<EarningEntry>, StoreError>;
    async fn next_entry_id(&self) -> Result<EntryId, StoreError>;

    async fn payout(&self, id: PayoutId) -> Result<Option<Payout>, StoreError>;
    async fn payout_by_transfer(&self, transfer_id: &str) -> Result<Option<Payout>, StoreError>;
    /// Payouts, newest first, optionally restricted to one user.
    async fn payouts(&self, user: Option<UserId>) -> Result<Vec<Payout>, StoreError>;
    async fn next_payout_id(&self) -> Result<PayoutId, StoreError>;

    async fn business(&self, id: BusinessId) -> Result<Option<BusinessEntity>, StoreError>;

    /// Atomically applies every row in `changes`, enforcing transfer-id and
    /// refund-per-payout uniqueness.
    async fn apply(&self, changes: ChangeSet) -> Result<(), StoreError>;
}
