mod common;

use chrono::{Datelike, Utc};
use common::{harness, signed_event};
use referral_payouts::domain::{DomainError, EntryKind, PaymentStatus};
use referral_payouts::ledger::{CommissionInput, EntryFilter, LedgerError, PageRequest};
use rust_decimal::{Decimal, dec};
use serde_json::json;

/// Accrual appends a pending referral entry and credits the wallet in the same commit.
#[tokio::test]
async fn commission_credits_wallet_and_appends_pending_entry() {
    let h = harness();
    let user = h.payee(1).await;

    let entry = h.accrue(user, dec!(40.00)).await;

    assert_eq!(entry.kind, EntryKind::Referral);
    assert_eq!(entry.status, PaymentStatus::Pending);
    assert_eq!(entry.amount, dec!(40.00));
    let payee = h.user(user).await;
    assert_eq!(payee.wallet.balance(), dec!(40.00));
    assert_eq!(payee.wallet.total_earnings(), Decimal::ZERO);
    h.assert_wallet_consistent(user).await;
}

/// total_fee records the transaction amount plus the commission taken from it.
#[tokio::test]
async fn commission_metadata_is_kept() {
    let h = harness();
    let user = h.payee(1).await;
    h.ledger
        .register_business(7.into(), user, "Corner Cafe")
        .await
        .unwrap();

    let mut input = CommissionInput::new(user, dec!(5.00)).for_business(7.into());
    input.service_fee = dec!(50.00);
    input.business_name = "Corner Cafe".into();
    input.external_payment_id = Some("pi_1".into());
    let entry = h.ledger.record_commission(input).await.unwrap();

    assert_eq!(entry.total_fee, dec!(55.00));
    assert_eq!(entry.business_entity_id, Some(7.into()));
    assert_eq!(entry.external_payment_id.as_deref(), Some("pi_1"));
    assert_eq!(h.user(user).await.total_businesses_referred, 1);
}

/// A commission for a business referred by someone else is rejected with no state change.
#[tokio::test]
async fn commission_for_foreign_business_is_rejected() {
    let h = harness();
    let owner = h.payee(1).await;
    let other = h.payee(2).await;
    h.ledger
        .register_business(7.into(), owner, "Corner Cafe")
        .await
        .unwrap();

    let err = h
        .ledger
        .record_commission(CommissionInput::new(other, dec!(10)).for_business(7.into()))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::BusinessNotOwned { .. }));
    assert_eq!(h.user(other).await.wallet.balance(), Decimal::ZERO);
    assert!(h.entries(other).await.is_empty());
}

#[tokio::test]
async fn commission_for_unknown_user_is_rejected() {
    let h = harness();
    let err = h
        .ledger
        .record_commission(CommissionInput::new(99.into(), dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::UserNotFound(_)));
}

/// Rejecting a pending commission reverses its wallet credit.
#[tokio::test]
async fn rejecting_entry_reverses_wallet_credit() {
    let h = harness();
    let user = h.payee(1).await;
    h.accrue(user, dec!(25)).await;
    let doomed = h.accrue(user, dec!(15)).await;

    let rejected = h.ledger.mark_rejected(doomed.id).await.unwrap();

    assert_eq!(rejected.status, PaymentStatus::Rejected);
    assert_eq!(h.user(user).await.wallet.balance(), dec!(25));
    h.assert_wallet_consistent(user).await;
}

/// Terminal states are final: a second transition reports a conflict.
#[tokio::test]
async fn entry_transitions_exactly_once() {
    let h = harness();
    let user = h.payee(1).await;
    let entry = h.accrue(user, dec!(10)).await;
    h.ledger.mark_rejected(entry.id).await.unwrap();

    let err = h.ledger.mark_paid(entry.id, 99.into()).await.unwrap_err();

    assert!(matches!(
        err,
        LedgerError::DomainError(DomainError::EntryNotPending { .. })
    ));
    let again = h.ledger.mark_rejected(entry.id).await.unwrap_err();
    assert!(matches!(again, LedgerError::DomainError(_)));
    assert_eq!(h.user(user).await.wallet.balance(), Decimal::ZERO);
}

/// Linking an entry to a payout moves its amount out of the wallet and into
/// lifetime earnings.
#[tokio::test]
async fn mark_paid_debits_wallet_into_recorded_payout() {
    let h = harness();
    let user = h.payee(1).await;
    let entry = h.accrue(user, dec!(25)).await;
    let payout = h.record_payout(user, "tr_manual", dec!(25)).await;

    let paid = h.ledger.mark_paid(entry.id, payout.id).await.unwrap();

    assert_eq!(paid.status, PaymentStatus::Paid);
    assert_eq!(paid.payout_id, Some(payout.id));
    let payee = h.user(user).await;
    assert_eq!(payee.wallet.balance(), Decimal::ZERO);
    assert_eq!(payee.wallet.total_earnings(), dec!(25));
    h.assert_wallet_consistent(user).await;

    let other = h.accrue(user, dec!(1)).await;
    let err = h.ledger.mark_paid(other.id, 99.into()).await.unwrap_err();
    assert!(matches!(err, LedgerError::PayoutNotFound(_)));
}

/// A payout already covered by its entries takes no more, and the wallet
/// stays settleable.
#[tokio::test]
async fn mark_paid_refuses_a_full_payout() {
    let h = harness();
    let user = h.payee(1).await;
    let settled = h.accrue(user, dec!(10)).await;
    let payout = h.engine.settle_entry(settled.id).await.unwrap().payout;
    let entry = h.accrue(user, dec!(25)).await;

    let err = h.ledger.mark_paid(entry.id, payout.id).await.unwrap_err();

    assert!(matches!(
        err,
        LedgerError::PayoutOverallocated { linked, .. } if linked == dec!(35)
    ));
    assert_eq!(
        h.ledger.entry(entry.id).await.unwrap().status,
        PaymentStatus::Pending
    );
    assert_eq!(h.user(user).await.wallet.balance(), dec!(25));
    h.assert_wallet_consistent(user).await;
    assert_eq!(
        h.engine.settle_user(user).await.unwrap().payout.amount,
        dec!(25)
    );
}

#[tokio::test]
async fn mark_paid_refuses_another_users_payout() {
    let h = harness();
    let user = h.payee(1).await;
    let other = h.payee(2).await;
    let entry = h.accrue(user, dec!(5)).await;
    let payout = h.record_payout(other, "tr_other", dec!(5)).await;

    let err = h.ledger.mark_paid(entry.id, payout.id).await.unwrap_err();

    assert!(matches!(err, LedgerError::PayoutNotOwned { .. }));
    assert_eq!(h.user(user).await.wallet.balance(), dec!(5));
    h.assert_wallet_consistent(user).await;
}

/// Listing is newest first with page metadata.
#[tokio::test]
async fn entries_are_paginated_newest_first() {
    let h = harness();
    let user = h.payee(1).await;
    for amount in [dec!(1), dec!(2), dec!(3), dec!(4), dec!(5)] {
        h.accrue(user, amount).await;
    }

    let page = h
        .ledger
        .list_entries(&EntryFilter::for_user(user), PageRequest { page: 2, limit: 2 })
        .await
        .unwrap();

    assert_eq!(page.total, 5);
    assert_eq!(page.total_pages, 3);
    assert!(page.has_next_page);
    assert!(page.has_previous_page);
    let amounts: Vec<_> = page.entries.iter().map(|e| e.amount).collect();
    assert_eq!(amounts, vec![dec!(3), dec!(2)]);
}

#[tokio::test]
async fn zero_page_is_invalid() {
    let h = harness();
    let err = h
        .ledger
        .list_entries(&EntryFilter::default(), PageRequest { page: 0, limit: 10 })
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidPage));
}

#[tokio::test]
async fn totals_by_status_and_month() {
    let h = harness();
    let user = h.payee(1).await;
    h.accrue(user, dec!(10)).await;
    let rejected = h.accrue(user, dec!(4)).await;
    let paid = h.accrue(user, dec!(6)).await;
    h.ledger.mark_rejected(rejected.id).await.unwrap();
    h.engine.settle_entry(paid.id).await.unwrap();

    let filter = EntryFilter::for_user(user).with_kind(EntryKind::Referral);
    let totals = h.ledger.sum_by_status(&filter).await.unwrap();
    assert_eq!(totals.pending, dec!(10));
    assert_eq!(totals.paid, dec!(6));
    assert_eq!(totals.rejected, dec!(4));

    let now = Utc::now();
    let months = h.ledger.monthly_totals(&filter, now.year()).await.unwrap();
    assert_eq!(months.len(), 12);
    assert_eq!(months[&now.month()], dec!(20));
    assert_eq!(months.values().copied().sum::<Decimal>(), dec!(20));
}

/// A sweep's withdrawal row and a failed payout's refund are not earnings.
#[tokio::test]
async fn totals_count_settled_money_once() {
    let h = harness();
    let user = h.payee(1).await;
    h.accrue(user, dec!(40)).await;
    h.engine.run_weekly().await.unwrap();

    let filter = EntryFilter::for_user(user);
    let totals = h.ledger.sum_by_status(&filter).await.unwrap();
    assert_eq!(totals.paid, dec!(40));
    assert_eq!(totals.pending, Decimal::ZERO);

    let (body, signature) = signed_event("transfer.failed", json!({ "id": "tr_1" }));
    h.webhooks.handle(&body, Some(&signature)).await.unwrap();
    let totals = h.ledger.sum_by_status(&filter).await.unwrap();
    assert_eq!(totals.paid, dec!(40));
    assert_eq!(totals.pending_refunds, dec!(40));
    assert_eq!(
        totals.pending + totals.pending_refunds,
        h.user(user).await.wallet.balance()
    );

    h.engine.run_weekly().await.unwrap();
    let totals = h.ledger.sum_by_status(&filter).await.unwrap();
    assert_eq!(totals.paid, dec!(40));
    assert_eq!(totals.pending_refunds, Decimal::ZERO);

    let now = Utc::now();
    let months = h.ledger.monthly_totals(&filter, now.year()).await.unwrap();
    assert_eq!(months[&now.month()], dec!(40));
}

/// Upserting a payee edits the profile and never touches the wallet.
#[tokio::test]
async fn upsert_payee_keeps_wallet() {
    let h = harness();
    let user = h.payee(1).await;
    h.accrue(user, dec!(12)).await;

    let updated = h
        .ledger
        .upsert_payee(user, "Robin", "Quinn", "robin@example.com")
        .await
        .unwrap();

    assert_eq!(updated.display_name(), "Robin Quinn");
    assert_eq!(updated.wallet.balance(), dec!(12));
}
