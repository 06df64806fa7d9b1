//! Core domain types: payees, ledger entries, payouts, and referred businesses.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use derive_more::{Display, From, Into};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Newtype wrapper for payee (referring user) identifiers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into,
    Display,
)]
pub struct UserId(u64);

/// Newtype wrapper for earnings ledger entry identifiers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into,
    Display,
)]
pub struct EntryId(u64);

/// Newtype wrapper for local payout record identifiers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into,
    Display,
)]
pub struct PayoutId(u64);

/// Newtype wrapper for referred business identifiers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into,
    Display,
)]
pub struct BusinessId(u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("Insufficient wallet balance: have {available}, need {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },
    #[error("Amount must not be negative: {0}")]
    NegativeAmount(Decimal),
    #[error("Entry {entry} is {status}, expected pending")]
    EntryNotPending { entry: EntryId, status: PaymentStatus },
    #[error("Unknown payout status: {0}")]
    UnknownPayoutStatus(String),
}

/// Per-payee cached balance. Invariant: `balance` equals the sum of the payee's
/// pending credit entries; it never goes negative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    balance: Decimal,
    total_earnings: Decimal,
}

impl Wallet {
    pub fn new(balance: Decimal, total_earnings: Decimal) -> Self {
        Self {
            balance,
            total_earnings,
        }
    }
    pub fn balance(&self) -> Decimal {
        self.balance
    }
    pub fn total_earnings(&self) -> Decimal {
        self.total_earnings
    }
    /// Credit a pending amount (commission accrual or failed-payout refund).
    pub fn credit(&mut self, amount: Decimal) -> Result<(), DomainError> {
        ensure_non_negative(amount)?;
        self.balance += amount;
        Ok(())
    }
    /// Debit a pending amount. Fails if the balance would go negative.
    pub fn debit(&mut self, amount: Decimal) -> Result<(), DomainError> {
        ensure_non_negative(amount)?;
        if self.balance < amount {
            return Err(DomainError::InsufficientFunds {
                available: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        Ok(())
    }
    /// Move confirmed earnings into the lifetime total. Only ever increases.
    pub fn record_earnings(&mut self, amount: Decimal) -> Result<(), DomainError> {
        ensure_non_negative(amount)?;
        self.total_earnings += amount;
        Ok(())
    }
}

fn ensure_non_negative(amount: Decimal) -> Result<(), DomainError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(DomainError::NegativeAmount(amount));
    }
    Ok(())
}

/// A referring user ("BPM") who earns commissions and receives payouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub wallet: Wallet,
    pub total_businesses_referred: u32,
}

impl User {
    pub fn new(id: UserId, first_name: &str, last_name: &str, email: &str) -> Self {
        Self {
            id,
            first_name: first_name.to_owned(),
            last_name: last_name.to_owned(),
            email: email.to_owned(),
            wallet: Wallet::default(),
            total_businesses_referred: 0,
        }
    }
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Pending,
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementsStatus {
    Complete,
    Incomplete,
}

/// The payee's linked destination account at the payment gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutAccount {
    pub user_id: UserId,
    pub account_id: String,
    pub status: AccountStatus,
    /// Last capability snapshot reported by the gateway.
    pub capabilities: Option<serde_json::Value>,
    pub requirements_status: Option<RequirementsStatus>,
}

impl PayoutAccount {
    pub fn new(user_id: UserId, account_id: &str, status: AccountStatus) -> Self {
        Self {
            user_id,
            account_id: account_id.to_owned(),
            status,
            capabilities: None,
            requirements_status: None,
        }
    }
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    #[display("referral")]
    Referral,
    #[display("withdrawal")]
    Withdrawal,
    #[display("refund")]
    Refund,
}

impl EntryKind {
    /// Credit entries add to the wallet while pending and are swept by settlement.
    pub fn is_credit(&self) -> bool {
        matches!(self, EntryKind::Referral | EntryKind::Refund)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[display("pending")]
    Pending,
    #[display("paid")]
    Paid,
    #[display("rejected")]
    Rejected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    #[default]
    Regular,
    Qr,
}

/// One row of the earnings ledger. Amounts are never rewritten; the only
/// mutation is a single `pending -> paid | rejected` transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningEntry {
    pub id: EntryId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub kind: EntryKind,
    pub status: PaymentStatus,
    pub business_entity_id: Option<BusinessId>,
    pub external_payment_id: Option<String>,
    pub total_fee: Decimal,
    pub service_fee: Decimal,
    pub service_name: String,
    pub business_name: String,
    pub customer_name: String,
    pub service_date: Option<DateTime<Utc>>,
    pub transaction_kind: TransactionKind,
    /// Payout that settled this entry (credit entries only).
    pub payout_id: Option<PayoutId>,
    /// Payout this entry records (withdrawal) or reverses (refund).
    pub reference: Option<PayoutId>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EarningEntry {
    /// A bare entry with no commission metadata.
    pub fn new(
        id: EntryId,
        user_id: UserId,
        amount: Decimal,
        kind: EntryKind,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            amount,
            kind,
            status,
            business_entity_id: None,
            external_payment_id: None,
            total_fee: Decimal::ZERO,
            service_fee: Decimal::ZERO,
            service_name: String::new(),
            business_name: String::new(),
            customer_name: String::new(),
            service_date: None,
            transaction_kind: TransactionKind::Regular,
            payout_id: None,
            reference: None,
            description: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending_credit(&self) -> bool {
        self.status == PaymentStatus::Pending && self.kind.is_credit()
    }

    pub fn mark_paid(&mut self, payout: PayoutId, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_pending()?;
        self.status = PaymentStatus::Paid;
        self.payout_id = Some(payout);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_rejected(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_pending()?;
        self.status = PaymentStatus::Rejected;
        self.updated_at = now;
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), DomainError> {
        if self.status != PaymentStatus::Pending {
            return Err(DomainError::EntryNotPending {
                entry: self.id,
                status: self.status,
            });
        }
        Ok(())
    }
}

/// Gateway-side lifecycle of a transfer, mirrored onto the local payout row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    #[display("pending")]
    Pending,
    #[display("in_transit")]
    InTransit,
    #[display("paid")]
    Paid,
    #[display("failed")]
    Failed,
    #[display("canceled")]
    Canceled,
}

impl FromStr for PayoutStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PayoutStatus::Pending),
            "in_transit" => Ok(PayoutStatus::InTransit),
            "paid" | "completed" | "succeeded" => Ok(PayoutStatus::Paid),
            "failed" => Ok(PayoutStatus::Failed),
            "canceled" | "cancelled" | "reversed" => Ok(PayoutStatus::Canceled),
            other => Err(DomainError::UnknownPayoutStatus(other.to_owned())),
        }
    }
}

/// One attempted external transfer. Never deleted; only `status` changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payout {
    pub id: PayoutId,
    pub user_id: UserId,
    pub transfer_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PayoutStatus,
    pub account_id: String,
    pub description: String,
    /// Set when the payout settles exactly one ledger entry.
    pub earning_id: Option<EntryId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A business referred by a payee, carrying the running total of settled
/// commissions linked to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessEntity {
    pub id: BusinessId,
    pub referrer_id: UserId,
    pub name: String,
    pub earnings: Decimal,
}

impl BusinessEntity {
    pub fn new(id: BusinessId, referrer_id: UserId, name: &str) -> Self {
        Self {
            id,
            referrer_id,
            name: name.to_owned(),
            earnings: Decimal::ZERO,
        }
    }
}
