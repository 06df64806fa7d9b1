use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::errors::{ErrorKind, SettlementError};
use crate::domain::{EntryId, Payout, PayoutId, PayoutStatus, User, UserId};

/// A committed settlement: the payout row plus the ledger entries it paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub payout: Payout,
    pub settled_entries: Vec<EntryId>,
    pub withdrawal_entry: EntryId,
    /// Payee as committed, after the wallet debit.
    pub user: User,
}

/// One row of a batch report, shaped for the admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    pub user_id: UserId,
    pub success: bool,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_id: Option<PayoutId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PayoutStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl SettlementResult {
    pub fn succeeded(settlement: &Settlement) -> Self {
        Self {
            user_id: settlement.payout.user_id,
            success: true,
            amount: settlement.payout.amount,
            payout_id: Some(settlement.payout.id),
            transfer_id: Some(settlement.payout.transfer_id.clone()),
            status: Some(settlement.payout.status),
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(user_id: UserId, amount: Decimal, error: &SettlementError) -> Self {
        let transfer_id = match error {
            SettlementError::Consistency { transfer_id, .. } => Some(transfer_id.clone()),
            _ => None,
        };
        Self {
            user_id,
            success: false,
            amount,
            payout_id: None,
            transfer_id,
            status: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub processed: usize,
    pub failed: usize,
    /// Users selected but found with nothing to pay once locked.
    pub skipped: usize,
    pub results: Vec<SettlementResult>,
    pub processed_at: DateTime<Utc>,
}

/// A transfer the gateway executed that has no committed local record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreconciledTransfer {
    pub user_id: UserId,
    pub transfer_id: String,
    pub amount: Decimal,
    pub idempotency_key: String,
    pub reason: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutStats {
    pub total_payouts: usize,
    /// Sum over payouts that have not failed.
    pub total_amount_paid: Decimal,
    pub pending_payouts: usize,
}

impl PayoutStats {
    pub fn from_payouts<'a>(payouts: impl IntoIterator<Item = &'a Payout>) -> Self {
        let mut stats = PayoutStats::default();
        for payout in payouts {
            stats.total_payouts += 1;
            if payout.status != PayoutStatus::Failed {
                stats.total_amount_paid += payout.amount;
            }
            if payout.status == PayoutStatus::Pending {
                stats.pending_payouts += 1;
            }
        }
        stats
    }
}
