//! Payout settlement engine.
//!
//! Every settlement, whether a weekly wallet sweep or a single ledger entry,
//! follows the same order: lock and re-verify, request the transfer, then land
//! the payout row, wallet debit, ledger flips and business earnings in one
//! commit. Until the gateway reports success nothing is written; if the
//! commit fails afterwards the transfer is flagged for manual reconciliation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::domain::{
    BusinessId, EarningEntry, EntryId, EntryKind, PaymentStatus, Payout, PayoutAccount, PayoutId,
    User, UserId,
};
use crate::gateway::TransferGateway;
use crate::ledger::{EntryFilter, Ledger, LedgerError, PayoutChange, UnitOfWork};
use crate::notify::{Notifier, WeeklyPayoutSummary, payout_week};
pub use errors::{EligibilityError, ErrorKind, SettlementError};
pub use types::{BatchReport, PayoutStats, Settlement, SettlementResult, UnreconciledTransfer};

pub mod errors;
mod types;

pub struct SettlementEngine {
    ledger: Arc<Ledger>,
    gateway: Arc<TransferGateway>,
    notifier: Arc<dyn Notifier>,
    currency: String,
    /// Transfers that moved money without a committed local record.
    unreconciled: Mutex<Vec<UnreconciledTransfer>>,
}

/// Everything a settlement will write, staged under lock before the transfer.
struct Plan<'a> {
    uow: UnitOfWork<'a>,
    user: User,
    amount: Decimal,
    destination: String,
    description: String,
    idempotency_key: String,
    payout_id: PayoutId,
    earning_id: Option<EntryId>,
    settled_entries: Vec<EntryId>,
    withdrawal_entry: EntryId,
}

async fn active_account(
    uow: &mut UnitOfWork<'_>,
    user: UserId,
) -> Result<PayoutAccount, SettlementError> {
    uow.payout_account(user)
        .await?
        .filter(PayoutAccount::is_active)
        .ok_or(EligibilityError::NoActiveAccount(user).into())
}

impl SettlementEngine {
    pub fn new(
        ledger: Arc<Ledger>,
        gateway: Arc<TransferGateway>,
        notifier: Arc<dyn Notifier>,
        currency: &str,
    ) -> Self {
        Self {
            ledger,
            gateway,
            notifier,
            currency: currency.to_owned(),
            unreconciled: Mutex::new(Vec::new()),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Settles every eligible wallet, one user at a time. A failing user is
    /// reported and the run moves on.
    pub async fn run_weekly(&self) -> Result<BatchReport, SettlementError> {
        let eligible = self.ledger.store().users_eligible_for_payout().await?;
        info!(users = eligible.len(), "weekly settlement started");

        let mut report = BatchReport {
            processed: 0,
            failed: 0,
            skipped: 0,
            results: Vec::with_capacity(eligible.len()),
            processed_at: Utc::now(),
        };
        for (user_id, balance) in eligible {
            match self.settle_user(user_id).await {
                Ok(settlement) => {
                    report.processed += 1;
                    report.results.push(SettlementResult::succeeded(&settlement));
                    self.notify_payee(&settlement);
                }
                Err(SettlementError::Eligibility(EligibilityError::NoBalance(_))) => {
                    debug!(user_id = %user_id, "wallet emptied before settlement, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(user_id = %user_id, amount = %balance, error = %e, "settlement failed");
                    report.failed += 1;
                    report.results.push(SettlementResult::failed(user_id, balance, &e));
                }
            }
        }
        info!(
            processed = report.processed,
            failed = report.failed,
            skipped = report.skipped,
            "weekly settlement finished"
        );
        Ok(report)
    }

    /// Sweeps the user's whole wallet into one payout.
    pub async fn settle_user(&self, user_id: UserId) -> Result<Settlement, SettlementError> {
        let mut uow = self.ledger.begin();
        let user = uow.lock_user(user_id).await?;
        let account = active_account(&mut uow, user_id).await?;
        let amount = user.wallet.balance();
        if amount <= Decimal::ZERO {
            return Err(EligibilityError::NoBalance(user_id).into());
        }

        let pending = EntryFilter::for_user(user_id).with_status(PaymentStatus::Pending);
        // Id order, so the last entry is the newest credit swept.
        let mut entries = Vec::new();
        for candidate in uow.entries(&pending).await? {
            if candidate.kind.is_credit() {
                entries.push(uow.lock_entry(candidate.id).await?);
            }
        }
        let pending_total: Decimal = entries.iter().map(|e| e.amount).sum();
        let last_entry = match entries.last() {
            Some(last) if pending_total == amount => last.id,
            _ => {
                return Err(SettlementError::LedgerDrift {
                    user_id,
                    wallet: amount,
                    pending: pending_total,
                });
            }
        };

        let idempotency_key = format!("settle-u{user_id}-e{last_entry}");
        let description = format!(
            "Weekly earnings payout to {} ({idempotency_key})",
            user.display_name()
        );
        let plan = self
            .prepare(uow, user, entries, account, amount, idempotency_key, description, None)
            .await?;
        self.execute(plan).await
    }

    /// Pays out exactly one pending credit entry.
    pub async fn settle_entry(&self, entry_id: EntryId) -> Result<Settlement, SettlementError> {
        let owner = self.ledger.entry(entry_id).await?.user_id;
        let mut uow = self.ledger.begin();
        let user = uow.lock_user(owner).await?;
        let entry = uow.lock_entry(entry_id).await?;
        if entry.status != PaymentStatus::Pending {
            return Err(EligibilityError::EntryNotPending {
                entry: entry_id,
                status: entry.status,
            }
            .into());
        }
        if !entry.kind.is_credit() {
            return Err(EligibilityError::NotSettleable {
                entry: entry_id,
                kind: entry.kind,
            }
            .into());
        }
        if entry.amount <= Decimal::ZERO {
            return Err(EligibilityError::ZeroAmount(entry_id).into());
        }
        let account = active_account(&mut uow, owner).await?;
        if user.wallet.balance() < entry.amount {
            return Err(SettlementError::LedgerDrift {
                user_id: owner,
                wallet: user.wallet.balance(),
                pending: entry.amount,
            });
        }

        let amount = entry.amount;
        let idempotency_key = format!("settle-entry-{entry_id}");
        let description = format!("Payout for transaction {entry_id} ({idempotency_key})");
        let plan = self
            .prepare(
                uow,
                user,
                vec![entry],
                account,
                amount,
                idempotency_key,
                description,
                Some(entry_id),
            )
            .await?;
        self.execute(plan).await
    }

    /// Stages the wallet debit, ledger flips, business earnings and withdrawal
    /// row. Staged rows stay private to the unit of work until commit.
    #[allow(clippy::too_many_arguments)]
    async fn prepare<'a>(
        &self,
        mut uow: UnitOfWork<'a>,
        mut user: User,
        entries: Vec<EarningEntry>,
        account: PayoutAccount,
        amount: Decimal,
        idempotency_key: String,
        description: String,
        earning_id: Option<EntryId>,
    ) -> Result<Plan<'a>, SettlementError> {
        let payout_id = uow.next_payout_id().await?;
        let now = uow.now();

        let referral_total: Decimal = entries
            .iter()
            .filter(|e| e.kind == EntryKind::Referral)
            .map(|e| e.amount)
            .sum();
        user.wallet.debit(amount)?;
        user.wallet.record_earnings(referral_total)?;

        let mut business_earnings: BTreeMap<BusinessId, Decimal> = BTreeMap::new();
        let mut settled_entries = Vec::with_capacity(entries.len());
        for mut entry in entries {
            if let Some(business) = entry.business_entity_id {
                *business_earnings.entry(business).or_default() += entry.amount;
            }
            entry.mark_paid(payout_id, now)?;
            settled_entries.push(entry.id);
            uow.put_entry(entry);
        }
        for (id, earned) in business_earnings {
            match uow.business(id).await? {
                Some(mut business) => {
                    business.earnings += earned;
                    uow.put_business(business);
                }
                None => warn!(business_id = %id, "settled entry links an unknown business"),
            }
        }

        let withdrawal_entry = uow.next_entry_id().await?;
        let mut withdrawal = EarningEntry::new(
            withdrawal_entry,
            user.id,
            amount,
            EntryKind::Withdrawal,
            PaymentStatus::Paid,
            now,
        );
        withdrawal.reference = Some(payout_id);
        withdrawal.description = Some(description.clone());
        uow.put_entry(withdrawal);
        uow.put_user(user.clone());

        Ok(Plan {
            uow,
            user,
            amount,
            destination: account.account_id,
            description,
            idempotency_key,
            payout_id,
            earning_id,
            settled_entries,
            withdrawal_entry,
        })
    }

    async fn execute(&self, plan: Plan<'_>) -> Result<Settlement, SettlementError> {
        let Plan {
            mut uow,
            user,
            amount,
            destination,
            description,
            idempotency_key,
            payout_id,
            earning_id,
            settled_entries,
            withdrawal_entry,
        } = plan;

        debug!(
            user_id = %user.id,
            amount = %amount,
            idempotency_key = %idempotency_key,
            "requesting transfer"
        );
        let transfer = self
            .gateway
            .create_transfer(
                amount,
                &self.currency,
                &destination,
                &description,
                &idempotency_key,
            )
            .await?;

        let payout = Payout {
            id: payout_id,
            user_id: user.id,
            transfer_id: transfer.id,
            amount,
            currency: self.currency.clone(),
            status: transfer.status,
            account_id: destination,
            description,
            earning_id,
            created_at: uow.now(),
            updated_at: uow.now(),
        };
        uow.put_payout(payout.clone());

        if let Err(source) = uow.commit().await {
            error!(
                user_id = %user.id,
                transfer_id = %payout.transfer_id,
                amount = %amount,
                idempotency_key = %idempotency_key,
                error = %source,
                "transfer executed but settlement was not recorded; flagged for reconciliation"
            );
            self.flag_unreconciled(UnreconciledTransfer {
                user_id: user.id,
                transfer_id: payout.transfer_id.clone(),
                amount,
                idempotency_key,
                reason: source.to_string(),
                detected_at: Utc::now(),
            });
            return Err(SettlementError::Consistency {
                user_id: user.id,
                transfer_id: payout.transfer_id,
                amount,
                source,
            });
        }

        info!(
            user_id = %user.id,
            payout_id = %payout.id,
            transfer_id = %payout.transfer_id,
            amount = %amount,
            "settlement committed"
        );
        self.clear_unreconciled(&payout.transfer_id);
        Ok(Settlement {
            payout,
            settled_entries,
            withdrawal_entry,
            user,
        })
    }

    fn flag_unreconciled(&self, transfer: UnreconciledTransfer) {
        self.unreconciled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transfer);
    }

    /// A retry that committed under the same idempotency key has recorded the
    /// transfer after all.
    fn clear_unreconciled(&self, transfer_id: &str) {
        let mut flagged = self
            .unreconciled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = flagged.len();
        flagged.retain(|t| t.transfer_id != transfer_id);
        if flagged.len() < before {
            info!(transfer_id, "flagged transfer reconciled by retry");
        }
    }

    /// Transfers that moved money without a committed record, oldest first.
    pub fn unreconciled(&self) -> Vec<UnreconciledTransfer> {
        self.unreconciled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fire-and-forget: the send runs on its own task and only logs failures.
    fn notify_payee(&self, settlement: &Settlement) {
        let user = &settlement.user;
        let (start_date, end_date) = payout_week(settlement.payout.created_at.date_naive());
        let summary = WeeklyPayoutSummary {
            email: user.email.clone(),
            payee_name: user.display_name(),
            start_date,
            end_date,
            total_amount_earned: user.wallet.total_earnings(),
            completed_referrals: user.total_businesses_referred,
            total_paid: settlement.payout.amount,
        };
        let notifier = Arc::clone(&self.notifier);
        let user_id = user.id;
        tokio::spawn(async move {
            if let Err(e) = notifier.send_weekly_summary(summary).await {
                warn!(user_id = %user_id, error = %e, "weekly payout summary not sent");
            }
        });
    }

    pub async fn payout(&self, payout_id: PayoutId) -> Result<Payout, SettlementError> {
        Ok(self
            .ledger
            .store()
            .payout(payout_id)
            .await?
            .ok_or(LedgerError::PayoutNotFound(payout_id))?)
    }

    /// The user's payouts, newest first.
    pub async fn payout_history(&self, user_id: UserId) -> Result<Vec<Payout>, SettlementError> {
        let store = self.ledger.store();
        if store.user(user_id).await?.is_none() {
            return Err(LedgerError::UserNotFound(user_id).into());
        }
        Ok(store.payouts(Some(user_id)).await?)
    }

    /// Pulls the transfer's current status from the gateway and applies it
    /// locally, refunding the wallet if the transfer failed.
    pub async fn refresh_status(
        &self,
        payout_id: PayoutId,
    ) -> Result<(Payout, PayoutChange), SettlementError> {
        let payout = self.payout(payout_id).await?;
        let status = self.gateway.retrieve_transfer(&payout.transfer_id).await?;
        let change = self.ledger.apply_payout_status(payout_id, status).await?;
        Ok((self.payout(payout_id).await?, change))
    }

    pub async fn stats(&self) -> Result<PayoutStats, SettlementError> {
        let payouts = self.ledger.store().payouts(None).await?;
        Ok(PayoutStats::from_payouts(&payouts))
    }
}
