//! Transaction-scoped repository.
//!
//! A unit of work reads rows (optionally locking them first), hands back owned
//! copies, and takes modified rows back through explicit `put_*` calls. Nothing
//! reaches the store until [`UnitOfWork::commit`]; dropping it rolls back.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use super::{EntryFilter, LedgerError};
use crate::domain::{
    BusinessEntity, BusinessId, EarningEntry, EntryId, Payout, PayoutAccount, PayoutId, User,
    UserId,
};
use crate::store::{ChangeSet, RowGuard, RowKey, RowLocks, Store, StoreError};

pub struct UnitOfWork<'a> {
    store: &'a dyn Store,
    locks: &'a RowLocks,
    guards: Vec<RowGuard>,
    held: HashSet<RowKey>,
    now: DateTime<Utc>,
    users: BTreeMap<UserId, User>,
    accounts: BTreeMap<UserId, PayoutAccount>,
    entries: BTreeMap<EntryId, EarningEntry>,
    payouts: BTreeMap<PayoutId, Payout>,
    businesses: BTreeMap<BusinessId, BusinessEntity>,
}

impl<'a> UnitOfWork<'a> {
    pub(crate) fn new(store: &'a dyn Store, locks: &'a RowLocks) -> Self {
        Self {
            store,
            locks,
            guards: Vec::new(),
            held: HashSet::new(),
            now: Utc::now(),
            users: BTreeMap::new(),
            accounts: BTreeMap::new(),
            entries: BTreeMap::new(),
            payouts: BTreeMap::new(),
            businesses: BTreeMap::new(),
        }
    }

    /// Timestamp shared by every row this unit of work writes.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    async fn lock(&mut self, key: RowKey) {
        if self.held.insert(key) {
            let guard = self.locks.lock(key).await;
            self.guards.push(guard);
        }
    }

    /// Locks the user row, then reads it.
    pub async fn lock_user(&mut self, id: UserId) -> Result<User, LedgerError> {
        self.lock(RowKey::User(id)).await;
        self.user(id).await
    }

    pub async fn user(&mut self, id: UserId) -> Result<User, LedgerError> {
        if let Some(user) = self.users.get(&id) {
            return Ok(user.clone());
        }
        self.store
            .user(id)
            .await?
            .ok_or(LedgerError::UserNotFound(id))
    }

    pub fn put_user(&mut self, user: User) {
        self.users.insert(user.id, user);
    }

    pub async fn payout_account(
        &mut self,
        user: UserId,
    ) -> Result<Option<PayoutAccount>, LedgerError> {
        if let Some(account) = self.accounts.get(&user) {
            return Ok(Some(account.clone()));
        }
        Ok(self.store.payout_account(user).await?)
    }

    pub fn put_payout_account(&mut self, account: PayoutAccount) {
        self.accounts.insert(account.user_id, account);
    }

    /// Locks the entry row, then reads it.
    pub async fn lock_entry(&mut self, id: EntryId) -> Result<EarningEntry, LedgerError> {
        self.lock(RowKey::Entry(id)).await;
        self.entry(id).await
    }

    pub async fn entry(&mut self, id: EntryId) -> Result<EarningEntry, LedgerError> {
        if let Some(entry) = self.entries.get(&id) {
            return Ok(entry.clone());
        }
        self.store
            .entry(id)
            .await?
            .ok_or(LedgerError::EntryNotFound(id))
    }

    /// Committed entries matching `filter`, overlaid with this unit's staged rows,
    /// ordered by id.
    pub async fn entries(
        &mut self,
        filter: &EntryFilter,
    ) -> Result<Vec<EarningEntry>, LedgerError> {
        let mut found: BTreeMap<EntryId, EarningEntry> = self
            .store
            .entries(filter)
            .await?
            .into_iter()
            .map(|e| (e.id, e))
            .collect();
        for (id, staged) in &self.entries {
            if filter.matches(staged) {
                found.insert(*id, staged.clone());
            } else {
                found.remove(id);
            }
        }
        Ok(found.into_values().collect())
    }

    pub async fn next_entry_id(&mut self) -> Result<EntryId, StoreError> {
        self.store.next_entry_id().await
    }

    pub fn put_entry(&mut self, entry: EarningEntry) {
        self.entries.insert(entry.id, entry);
    }

    /// Locks the payout row, then reads it.
    pub async fn lock_payout(&mut self, id: PayoutId) -> Result<Payout, LedgerError> {
        self.lock(RowKey::Payout(id)).await;
        if let Some(payout) = self.payouts.get(&id) {
            return Ok(payout.clone());
        }
        self.store
            .payout(id)
            .await?
            .ok_or(LedgerError::PayoutNotFound(id))
    }

    pub async fn next_payout_id(&mut self) -> Result<PayoutId, StoreError> {
        self.store.next_payout_id().await
    }

    pub fn put_payout(&mut self, payout: Payout) {
        self.payouts.insert(payout.id, payout);
    }

    pub async fn business(
        &mut self,
        id: BusinessId,
    ) -> Result<Option<BusinessEntity>, LedgerError> {
        if let Some(business) = self.businesses.get(&id) {
            return Ok(Some(business.clone()));
        }
        Ok(self.store.business(id).await?)
    }

    pub fn put_business(&mut self, business: BusinessEntity) {
        self.businesses.insert(business.id, business);
    }

    fn into_changes(self) -> (ChangeSet, Vec<RowGuard>, &'a dyn Store) {
        let changes = ChangeSet {
            users: self.users.into_values().collect(),
            accounts: self.accounts.into_values().collect(),
            entries: self.entries.into_values().collect(),
            payouts: self.payouts.into_values().collect(),
            businesses: self.businesses.into_values().collect(),
        };
        (changes, self.guards, self.store)
    }

    /// Lands every staged row at once, then releases the row locks.
    pub async fn commit(self) -> Result<(), StoreError> {
        let (changes, guards, store) = self.into_changes();
        let result = if changes.is_empty() {
            Ok(())
        } else {
            store.apply(changes).await
        };
        drop(guards);
        result
    }
}
