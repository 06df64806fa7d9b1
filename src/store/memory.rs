use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{ChangeSet, Store, StoreError};
use crate::domain::{
    BusinessEntity, BusinessId, EarningEntry, EntryId, EntryKind, Payout, PayoutAccount, PayoutId,
    User, UserId,
};
use crate::ledger::EntryFilter;

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    /// Keyed by owning user; one payout account per user.
    accounts: HashMap<UserId, PayoutAccount>,
    entries: BTreeMap<EntryId, EarningEntry>,
    payouts: BTreeMap<PayoutId, Payout>,
    businesses: HashMap<BusinessId, BusinessEntity>,
}

impl Tables {
    fn check_unique(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        for payout in &changes.payouts {
            let clash = self
                .payouts
                .values()
                .chain(changes.payouts.iter())
                .any(|other| other.transfer_id == payout.transfer_id && other.id != payout.id);
            if clash {
                return Err(StoreError::UniqueViolation(format!(
                    "payout transfer id {}",
                    payout.transfer_id
                )));
            }
        }
        for entry in changes.entries.iter().filter(|e| e.kind == EntryKind::Refund) {
            let Some(reference) = entry.reference else {
                continue;
            };
            let clash = self
                .entries
                .values()
                .chain(changes.entries.iter())
                .any(|other| {
                    other.kind == EntryKind::Refund
                        && other.reference == Some(reference)
                        && other.id != entry.id
                });
            if clash {
                return Err(StoreError::UniqueViolation(format!(
                    "refund for payout {reference}"
                )));
            }
        }
        Ok(())
    }
}

/// Process-local store. Ids are allocated like database sequences: gaps
/// appear when a unit of work is rolled back.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    entry_seq: AtomicU64,
    payout_seq: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            entry_seq: AtomicU64::new(1),
            payout_seq: AtomicU64::new(1),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("table lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("table lock poisoned".into()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn payout_account(&self, user: UserId) -> Result<Option<PayoutAccount>, StoreError> {
        Ok(self.read()?.accounts.get(&user).cloned())
    }

    async fn payout_account_by_gateway_id(
        &self,
        account_id: &str,
    ) -> Result<Option<PayoutAccount>, StoreError> {
        Ok(self
            .read()?
            .accounts
            .values()
            .find(|a| a.account_id == account_id)
            .cloned())
    }

    async fn users_eligible_for_payout(&self) -> Result<Vec<(UserId, Decimal)>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .users
            .values()
            .filter(|u| u.wallet.balance() > Decimal::ZERO)
            .filter(|u| tables.accounts.get(&u.id).is_some_and(|a| a.is_active()))
            .map(|u| (u.id, u.wallet.balance()))
            .collect())
    }

    async fn entry(&self, id: EntryId) -> Result<Option<EarningEntry>, StoreError> {
        Ok(self.read()?.entries.get(&id).cloned())
    }

    async fn entries(&self, filter: &EntryFilter) -> Result<Vec<EarningEntry>, StoreError> {
        let mut entries: Vec<_> = self
            .read()?
            .entries
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(entries)
    }

    async fn next_entry_id(&self) -> Result<EntryId, StoreError> {
        Ok(self.entry_seq.fetch_add(1, Ordering::SeqCst).into())
    }

    async fn payout(&self, id: PayoutId) -> Result<Option<Payout>, StoreError> {
        Ok(self.read()?.payouts.get(&id).cloned())
    }

    async fn payout_by_transfer(&self, transfer_id: &str) -> Result<Option<Payout>, StoreError> {
        Ok(self
            .read()?
            .payouts
            .values()
            .find(|p| p.transfer_id == transfer_id)
            .cloned())
    }

    async fn payouts(&self, user: Option<UserId>) -> Result<Vec<Payout>, StoreError> {
        let mut payouts: Vec<_> = self
            .read()?
            .payouts
            .values()
            .filter(|p| user.is_none_or(|u| p.user_id == u))
            .cloned()
            .collect();
        payouts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(payouts)
    }

    async fn next_payout_id(&self) -> Result<PayoutId, StoreError> {
        Ok(self.payout_seq.fetch_add(1, Ordering::SeqCst).into())
    }

    async fn business(&self, id: BusinessId) -> Result<Option<BusinessEntity>, StoreError> {
        Ok(self.read()?.businesses.get(&id).cloned())
    }

    async fn apply(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables.check_unique(&changes)?;
        for user in changes.users {
            tables.users.insert(user.id, user);
        }
        for account in changes.accounts {
            tables.accounts.insert(account.user_id, account);
        }
        for entry in changes.entries {
            tables.entries.insert(entry.id, entry);
        }
        for payout in changes.payouts {
            tables.payouts.insert(payout.id, payout);
        }
        for business in changes.businesses {
            tables.businesses.insert(business.id, business);
        }
        Ok(())
    }
}
