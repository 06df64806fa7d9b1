//! Payout-side ledger writes: status reconciliation, failure refunds and
//! gateway account snapshots.

use tracing::{info, warn};

use super::{EntryFilter, Ledger, LedgerError};
use crate::domain::{
    EarningEntry, EntryKind, PaymentStatus, PayoutAccount, PayoutId, PayoutStatus,
    RequirementsStatus,
};
use crate::store::StoreError;

/// What applying a gateway-reported status did to a payout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutChange {
    Unchanged,
    Updated {
        from: PayoutStatus,
        to: PayoutStatus,
    },
    /// The payout failed and its amount went back to the wallet.
    Refunded(EarningEntry),
    AlreadyRefunded,
}

impl Ledger {
    /// Mirrors a gateway status onto the local payout row. A `failed` status
    /// reverses the payout exactly once: the wallet is credited and a pending
    /// refund entry referencing the payout is appended. A failed payout is
    /// terminal; later updates leave it alone.
    pub async fn apply_payout_status(
        &self,
        payout_id: PayoutId,
        status: PayoutStatus,
    ) -> Result<PayoutChange, LedgerError> {
        let owner = self
            .store()
            .payout(payout_id)
            .await?
            .ok_or(LedgerError::PayoutNotFound(payout_id))?
            .user_id;

        let mut uow = self.begin();
        let mut user = uow.lock_user(owner).await?;
        let mut payout = uow.lock_payout(payout_id).await?;

        if status != PayoutStatus::Failed {
            if payout.status == status || payout.status == PayoutStatus::Failed {
                return Ok(PayoutChange::Unchanged);
            }
            let from = payout.status;
            payout.status = status;
            payout.updated_at = uow.now();
            uow.put_payout(payout);
            uow.commit().await?;
            info!(payout_id = %payout_id, %from, to = %status, "payout status updated");
            return Ok(PayoutChange::Updated { from, to: status });
        }

        let refunds = EntryFilter::default()
            .with_kind(EntryKind::Refund)
            .with_reference(payout_id);
        if !uow.entries(&refunds).await?.is_empty() {
            if payout.status != PayoutStatus::Failed {
                payout.status = PayoutStatus::Failed;
                payout.updated_at = uow.now();
                uow.put_payout(payout);
                uow.commit().await?;
            }
            return Ok(PayoutChange::AlreadyRefunded);
        }

        let now = uow.now();
        user.wallet.credit(payout.amount)?;
        let mut refund = EarningEntry::new(
            uow.next_entry_id().await?,
            owner,
            payout.amount,
            EntryKind::Refund,
            PaymentStatus::Pending,
            now,
        );
        refund.reference = Some(payout_id);
        refund.description = Some(format!("Failed payout refund - {}", payout.transfer_id));

        payout.status = PayoutStatus::Failed;
        payout.updated_at = now;
        let transfer_id = payout.transfer_id.clone();
        uow.put_payout(payout);
        uow.put_user(user);
        uow.put_entry(refund.clone());

        match uow.commit().await {
            Ok(()) => {
                info!(
                    payout_id = %payout_id,
                    user_id = %owner,
                    amount = %refund.amount,
                    transfer_id = %transfer_id,
                    "failed payout refunded to wallet"
                );
                Ok(PayoutChange::Refunded(refund))
            }
            Err(StoreError::UniqueViolation(what)) => {
                warn!(payout_id = %payout_id, %what, "refund already recorded");
                Ok(PayoutChange::AlreadyRefunded)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stores the gateway's capability snapshot for a destination account.
    /// Returns `None` when no payee is linked to `account_id`.
    pub async fn update_account_snapshot(
        &self,
        account_id: &str,
        capabilities: Option<serde_json::Value>,
        requirements_status: Option<RequirementsStatus>,
    ) -> Result<Option<PayoutAccount>, LedgerError> {
        let Some(linked) = self.store().payout_account_by_gateway_id(account_id).await? else {
            return Ok(None);
        };
        let mut uow = self.begin();
        uow.lock_user(linked.user_id).await?;
        let Some(mut account) = uow.payout_account(linked.user_id).await? else {
            return Ok(None);
        };
        if account.account_id != account_id {
            // Relinked to another destination since the lookup.
            return Ok(None);
        }
        if capabilities.is_some() {
            account.capabilities = capabilities;
        }
        if requirements_status.is_some() {
            account.requirements_status = requirements_status;
        }
        uow.put_payout_account(account.clone());
        uow.commit().await?;
        Ok(Some(account))
    }
}
