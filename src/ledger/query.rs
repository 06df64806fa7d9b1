//! Reporting surface over the ledger: filtered pages and aggregates.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{EarningEntry, EntryKind, PaymentStatus, PayoutId, UserId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryFilter {
    pub user_id: Option<UserId>,
    pub status: Option<PaymentStatus>,
    pub kind: Option<EntryKind>,
    pub reference: Option<PayoutId>,
    /// Inclusive lower bound on `created_at`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub to: Option<DateTime<Utc>>,
}

impl EntryFilter {
    pub fn for_user(user: UserId) -> Self {
        Self {
            user_id: Some(user),
            ..Self::default()
        }
    }
    pub fn with_status(mut self, status: PaymentStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn with_kind(mut self, kind: EntryKind) -> Self {
        self.kind = Some(kind);
        self
    }
    pub fn with_reference(mut self, payout: PayoutId) -> Self {
        self.reference = Some(payout);
        self
    }
    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn matches(&self, entry: &EarningEntry) -> bool {
        self.user_id.is_none_or(|u| entry.user_id == u)
            && self.status.is_none_or(|s| entry.status == s)
            && self.kind.is_none_or(|k| entry.kind == k)
            && self.reference.is_none_or(|r| entry.reference == Some(r))
            && self.from.is_none_or(|from| entry.created_at >= from)
            && self.to.is_none_or(|to| entry.created_at <= to)
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 10 }
    }
}

impl PageRequest {
    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.limit as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPage {
    pub entries: Vec<EarningEntry>,
    pub total: usize,
    pub page: u32,
    pub limit: u32,
    pub total_pages: usize,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl EntryPage {
    pub(crate) fn slice(all: Vec<EarningEntry>, request: PageRequest) -> Self {
        let total = all.len();
        let total_pages = total.div_ceil(request.limit as usize);
        let entries = all
            .into_iter()
            .skip(request.offset())
            .take(request.limit as usize)
            .collect();
        Self {
            entries,
            total,
            page: request.page,
            limit: request.limit,
            total_pages,
            has_next_page: (request.page as usize) < total_pages,
            has_previous_page: request.page > 1,
        }
    }
}

/// Commission totals by status. Only referral rows are earnings: a withdrawal
/// mirrors the referrals it settled and a refund returns money already earned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTotals {
    pub pending: Decimal,
    pub paid: Decimal,
    pub rejected: Decimal,
    /// Failed-payout refunds waiting for the next sweep.
    pub pending_refunds: Decimal,
}

impl StatusTotals {
    pub(crate) fn add(&mut self, entry: &EarningEntry) {
        match (entry.kind, entry.status) {
            (EntryKind::Referral, PaymentStatus::Pending) => self.pending += entry.amount,
            (EntryKind::Referral, PaymentStatus::Paid) => self.paid += entry.amount,
            (EntryKind::Referral, PaymentStatus::Rejected) => self.rejected += entry.amount,
            (EntryKind::Refund, PaymentStatus::Pending) => self.pending_refunds += entry.amount,
            _ => {}
        }
    }
}

/// Referral earnings per calendar month (1..=12) of `year`; months with no
/// entries are zero.
pub(crate) fn monthly_totals(entries: &[EarningEntry], year: i32) -> BTreeMap<u32, Decimal> {
    let mut months: BTreeMap<u32, Decimal> = (1..=12).map(|m| (m, Decimal::ZERO)).collect();
    let earned = entries
        .iter()
        .filter(|e| e.kind == EntryKind::Referral && e.created_at.year() == year);
    for entry in earned {
        *months.entry(entry.created_at.month()).or_default() += entry.amount;
    }
    months
}
