//! Earnings ledger and wallet aggregate.
//!
//! The ledger is the source of truth for what each payee is owed. Every
//! change to a wallet balance happens inside a unit of work that also writes
//! the ledger row explaining it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::{
    AccountStatus, BusinessEntity, BusinessId, EarningEntry, EntryId, EntryKind, PaymentStatus,
    PayoutAccount, PayoutId, PayoutStatus, TransactionKind, User, UserId,
};
use crate::store::{RowLocks, Store};
pub use errors::LedgerError;
pub use payouts::PayoutChange;
pub use query::{EntryFilter, EntryPage, PageRequest, StatusTotals};
pub use unit_of_work::UnitOfWork;

mod errors;
mod payouts;
mod query;
mod unit_of_work;

/// A commission accrued from a referred business's transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionInput {
    pub user_id: UserId,
    pub amount: Decimal,
    pub business_entity_id: Option<BusinessId>,
    pub external_payment_id: Option<String>,
    #[serde(default)]
    pub service_fee: Decimal,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub business_name: String,
    #[serde(default)]
    pub customer_name: String,
    pub service_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub transaction_kind: TransactionKind,
}

impl CommissionInput {
    pub fn new(user_id: UserId, amount: Decimal) -> Self {
        Self {
            user_id,
            amount,
            business_entity_id: None,
            external_payment_id: None,
            service_fee: Decimal::ZERO,
            service_name: String::new(),
            business_name: String::new(),
            customer_name: String::new(),
            service_date: None,
            transaction_kind: TransactionKind::Regular,
        }
    }
    pub fn for_business(mut self, business: BusinessId) -> Self {
        self.business_entity_id = Some(business);
        self
    }
}

pub struct Ledger {
    store: Arc<dyn Store>,
    locks: RowLocks,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: RowLocks::new(),
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork::new(self.store.as_ref(), &self.locks)
    }

    /// Creates a payee, or updates the profile fields of an existing one.
    /// Wallet figures are never touched here.
    pub async fn upsert_payee(
        &self,
        id: UserId,
        first_name: &str,
        last_name: &str,
        email: &str,
    ) -> Result<User, LedgerError> {
        let mut uow = self.begin();
        let user = match uow.lock_user(id).await {
            Ok(mut existing) => {
                existing.first_name = first_name.to_owned();
                existing.last_name = last_name.to_owned();
                existing.email = email.to_owned();
                existing
            }
            Err(LedgerError::UserNotFound(_)) => User::new(id, first_name, last_name, email),
            Err(e) => return Err(e),
        };
        uow.put_user(user.clone());
        uow.commit().await?;
        Ok(user)
    }

    pub async fn link_payout_account(
        &self,
        user_id: UserId,
        account_id: &str,
        status: AccountStatus,
    ) -> Result<PayoutAccount, LedgerError> {
        let mut uow = self.begin();
        uow.lock_user(user_id).await?;
        let account = match uow.payout_account(user_id).await? {
            Some(mut existing) => {
                existing.account_id = account_id.to_owned();
                existing.status = status;
                existing
            }
            None => PayoutAccount::new(user_id, account_id, status),
        };
        uow.put_payout_account(account.clone());
        uow.commit().await?;
        Ok(account)
    }

    /// Registers a referred business and bumps the referrer's referral count.
    pub async fn register_business(
        &self,
        id: BusinessId,
        referrer: UserId,
        name: &str,
    ) -> Result<BusinessEntity, LedgerError> {
        let mut uow = self.begin();
        let mut user = uow.lock_user(referrer).await?;
        let business = match uow.business(id).await? {
            Some(existing) if existing.referrer_id != referrer => {
                return Err(LedgerError::BusinessNotOwned {
                    business: id,
                    user: referrer,
                });
            }
            Some(mut existing) => {
                existing.name = name.to_owned();
                existing
            }
            None => {
                user.total_businesses_referred += 1;
                uow.put_user(user);
                BusinessEntity::new(id, referrer, name)
            }
        };
        uow.put_business(business.clone());
        uow.commit().await?;
        Ok(business)
    }

    /// Appends a pending referral entry and credits the payee's wallet in the
    /// same unit of work.
    pub async fn record_commission(
        &self,
        input: CommissionInput,
    ) -> Result<EarningEntry, LedgerError> {
        let mut uow = self.begin();
        let mut user = uow.lock_user(input.user_id).await?;
        if let Some(business_id) = input.business_entity_id {
            let business = uow
                .business(business_id)
                .await?
                .ok_or(LedgerError::BusinessNotFound(business_id))?;
            if business.referrer_id != user.id {
                return Err(LedgerError::BusinessNotOwned {
                    business: business_id,
                    user: user.id,
                });
            }
        }

        user.wallet.credit(input.amount)?;

        let id = uow.next_entry_id().await?;
        let mut entry = EarningEntry::new(
            id,
            user.id,
            input.amount,
            EntryKind::Referral,
            PaymentStatus::Pending,
            uow.now(),
        );
        entry.description = Some(format!(
            "Earned {} - Business: {}",
            input.amount, input.business_name
        ));
        entry.total_fee = input.service_fee + input.amount;
        entry.business_entity_id = input.business_entity_id;
        entry.external_payment_id = input.external_payment_id;
        entry.service_fee = input.service_fee;
        entry.service_name = input.service_name;
        entry.business_name = input.business_name;
        entry.customer_name = input.customer_name;
        entry.service_date = input.service_date;
        entry.transaction_kind = input.transaction_kind;

        uow.put_user(user);
        uow.put_entry(entry.clone());
        uow.commit().await?;
        info!(
            user_id = %entry.user_id,
            entry_id = %entry.id,
            amount = %entry.amount,
            "commission recorded"
        );
        Ok(entry)
    }

    /// `pending -> paid`, pointing the entry at the payout that settled it.
    /// A credit entry leaves the wallet and counts toward lifetime earnings,
    /// so the payout must belong to the entry's owner and have room for it.
    pub async fn mark_paid(
        &self,
        entry_id: EntryId,
        payout_id: PayoutId,
    ) -> Result<EarningEntry, LedgerError> {
        let mut uow = self.begin();
        let owner = uow.entry(entry_id).await?.user_id;
        let mut user = uow.lock_user(owner).await?;
        let mut entry = uow.lock_entry(entry_id).await?;
        let now = uow.now();
        entry.mark_paid(payout_id, now)?;

        let payout = uow.lock_payout(payout_id).await?;
        if payout.user_id != owner {
            return Err(LedgerError::PayoutNotOwned {
                payout: payout_id,
                owner: payout.user_id,
                user: owner,
            });
        }
        if payout.status == PayoutStatus::Failed {
            return Err(LedgerError::PayoutFailed(payout_id));
        }

        if entry.kind.is_credit() {
            let settled = EntryFilter::for_user(owner).with_status(PaymentStatus::Paid);
            let linked: Decimal = uow
                .entries(&settled)
                .await?
                .iter()
                .filter(|e| e.kind.is_credit() && e.payout_id == Some(payout_id))
                .map(|e| e.amount)
                .sum::<Decimal>()
                + entry.amount;
            if linked > payout.amount {
                return Err(LedgerError::PayoutOverallocated {
                    payout: payout_id,
                    amount: payout.amount,
                    linked,
                });
            }

            user.wallet.debit(entry.amount)?;
            if entry.kind == EntryKind::Referral {
                user.wallet.record_earnings(entry.amount)?;
                if let Some(id) = entry.business_entity_id {
                    if let Some(mut business) = uow.business(id).await? {
                        business.earnings += entry.amount;
                        uow.put_business(business);
                    }
                }
            }
            uow.put_user(user);
        }
        uow.put_entry(entry.clone());
        uow.commit().await?;
        debug!(entry_id = %entry.id, payout_id = %payout_id, "entry marked paid");
        Ok(entry)
    }

    /// `pending -> rejected`, reversing the wallet credit of a credit entry.
    pub async fn mark_rejected(&self, entry_id: EntryId) -> Result<EarningEntry, LedgerError> {
        let mut uow = self.begin();
        let owner = uow.entry(entry_id).await?.user_id;
        let mut user = uow.lock_user(owner).await?;
        let mut entry = uow.lock_entry(entry_id).await?;
        let now = uow.now();
        entry.mark_rejected(now)?;
        if entry.kind.is_credit() {
            user.wallet.debit(entry.amount)?;
            uow.put_user(user);
        }
        uow.put_entry(entry.clone());
        uow.commit().await?;
        debug!(entry_id = %entry.id, "entry rejected");
        Ok(entry)
    }

    pub async fn entry(&self, id: EntryId) -> Result<EarningEntry, LedgerError> {
        self.store
            .entry(id)
            .await?
            .ok_or(LedgerError::EntryNotFound(id))
    }

    /// Newest-first page of entries matching `filter`.
    pub async fn list_entries(
        &self,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> Result<EntryPage, LedgerError> {
        if page.page == 0 || page.limit == 0 {
            return Err(LedgerError::InvalidPage);
        }
        let all = self.store.entries(filter).await?;
        Ok(EntryPage::slice(all, page))
    }

    pub async fn sum_by_status(&self, filter: &EntryFilter) -> Result<StatusTotals, LedgerError> {
        let mut totals = StatusTotals::default();
        for entry in self.store.entries(filter).await? {
            totals.add(&entry);
        }
        Ok(totals)
    }

    pub async fn monthly_totals(
        &self,
        filter: &EntryFilter,
        year: i32,
    ) -> Result<BTreeMap<u32, Decimal>, LedgerError> {
        let entries = self.store.entries(filter).await?;
        Ok(query::monthly_totals(&entries, year))
    }

    /// Sum of the user's pending credit entries: what the wallet must equal
    /// whenever no settlement is in flight.
    pub async fn pending_credit_total(&self, user: UserId) -> Result<Decimal, LedgerError> {
        let filter = EntryFilter::for_user(user).with_status(PaymentStatus::Pending);
        Ok(self
            .store
            .entries(&filter)
            .await?
            .iter()
            .filter(|e| e.kind.is_credit())
            .map(|e| e.amount)
            .sum())
    }
}
