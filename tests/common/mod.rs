#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use referral_payouts::domain::{
    AccountStatus, BusinessEntity, BusinessId, EarningEntry, EntryId, Payout, PayoutAccount,
    PayoutId, PayoutStatus, User, UserId,
};
use referral_payouts::engine::SettlementEngine;
use referral_payouts::gateway::{
    GatewayError, NewTransfer, Transfer, TransferApi, TransferGateway, signature,
};
use referral_payouts::ledger::{CommissionInput, EntryFilter, Ledger};
use referral_payouts::notify::{Notifier, NotifyError, WeeklyPayoutSummary};
use referral_payouts::store::{ChangeSet, MemoryStore, Store, StoreError};
use referral_payouts::webhook::WebhookHandler;

pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const CURRENCY: &str = "usd";

/// Scripted gateway. Transfers get ids `tr_1`, `tr_2`, ... and start `pending`;
/// a repeated idempotency key returns the original transfer.
#[derive(Default)]
pub struct FakeGateway {
    calls: Mutex<Vec<NewTransfer>>,
    failing: Mutex<HashSet<String>>,
    by_key: Mutex<HashMap<String, Transfer>>,
    statuses: Mutex<HashMap<String, PayoutStatus>>,
    next_id: AtomicU64,
}

impl FakeGateway {
    pub fn fail_destination(&self, destination: &str) {
        self.failing.lock().unwrap().insert(destination.to_owned());
    }

    pub fn set_status(&self, transfer_id: &str, status: PayoutStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(transfer_id.to_owned(), status);
    }

    pub fn calls(&self) -> Vec<NewTransfer> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferApi for FakeGateway {
    async fn create_transfer(&self, transfer: NewTransfer) -> Result<Transfer, GatewayError> {
        self.calls.lock().unwrap().push(transfer.clone());
        if self.failing.lock().unwrap().contains(&transfer.destination) {
            return Err(GatewayError::Rejected {
                status: 400,
                message: format!("destination {} cannot receive transfers", transfer.destination),
            });
        }
        let mut by_key = self.by_key.lock().unwrap();
        let created = by_key
            .entry(transfer.idempotency_key.clone())
            .or_insert_with(|| Transfer {
                id: format!("tr_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
                status: PayoutStatus::Pending,
            });
        Ok(created.clone())
    }

    async fn retrieve_transfer(&self, transfer_id: &str) -> Result<Transfer, GatewayError> {
        let status = self.statuses.lock().unwrap().get(transfer_id).copied();
        let known = self
            .by_key
            .lock()
            .unwrap()
            .values()
            .find(|t| t.id == transfer_id)
            .cloned();
        match (known, status) {
            (Some(transfer), status) => Ok(Transfer {
                status: status.unwrap_or(transfer.status),
                ..transfer
            }),
            (None, _) => Err(GatewayError::Rejected {
                status: 404,
                message: format!("no such transfer {transfer_id}"),
            }),
        }
    }
}

/// `MemoryStore` that can be told to reject every write.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_applies: AtomicBool,
}

impl FailingStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_applies.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.inner.user(id).await
    }
    async fn payout_account(&self, user: UserId) -> Result<Option<PayoutAccount>, StoreError> {
        self.inner.payout_account(user).await
    }
    async fn payout_account_by_gateway_id(
        &self,
        account_id: &str,
    ) -> Result<Option<PayoutAccount>, StoreError> {
        self.inner.payout_account_by_gateway_id(account_id).await
    }
    async fn users_eligible_for_payout(&self) -> Result<Vec<(UserId, Decimal)>, StoreError> {
        self.inner.users_eligible_for_payout().await
    }
    async fn entry(&self, id: EntryId) -> Result<Option<EarningEntry>, StoreError> {
        self.inner.entry(id).await
    }
    async fn entries(&self, filter: &EntryFilter) -> Result<Vec<EarningEntry>, StoreError> {
        self.inner.entries(filter).await
    }
    async fn next_entry_id(&self) -> Result<EntryId, StoreError> {
        self.inner.next_entry_id().await
    }
    async fn payout(&self, id: PayoutId) -> Result<Option<Payout>, StoreError> {
        self.inner.payout(id).await
    }
    async fn payout_by_transfer(&self, transfer_id: &str) -> Result<Option<Payout>, StoreError> {
        self.inner.payout_by_transfer(transfer_id).await
    }
    async fn payouts(&self, user: Option<UserId>) -> Result<Vec<Payout>, StoreError> {
        self.inner.payouts(user).await
    }
    async fn next_payout_id(&self) -> Result<PayoutId, StoreError> {
        self.inner.next_payout_id().await
    }
    async fn business(&self, id: BusinessId) -> Result<Option<BusinessEntity>, StoreError> {
        self.inner.business(id).await
    }
    async fn apply(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if self.fail_applies.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        self.inner.apply(changes).await
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<WeeklyPayoutSummary>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<WeeklyPayoutSummary> {
        self.sent.lock().unwrap().clone()
    }

    /// Waits for spawned sends to land.
    pub async fn wait_for(&self, count: usize) -> Vec<WeeklyPayoutSummary> {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.sent.lock().unwrap().len() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("notifications were not sent");
        self.sent()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_weekly_summary(&self, summary: WeeklyPayoutSummary) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(summary);
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<FailingStore>,
    pub ledger: Arc<Ledger>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: Arc<SettlementEngine>,
    pub webhooks: Arc<WebhookHandler>,
}

pub fn harness() -> Harness {
    let store = Arc::new(FailingStore::default());
    let ledger = Arc::new(Ledger::new(Arc::clone(&store) as Arc<dyn Store>));
    let gateway = Arc::new(FakeGateway::default());
    let adapter = Arc::new(TransferGateway::new(
        Arc::clone(&gateway) as Arc<dyn TransferApi>,
        Duration::from_secs(5),
    ));
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = Arc::new(SettlementEngine::new(
        Arc::clone(&ledger),
        Arc::clone(&adapter),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        CURRENCY,
    ));
    let webhooks = Arc::new(WebhookHandler::new(
        Arc::clone(&ledger),
        adapter,
        WEBHOOK_SECRET,
    ));
    Harness {
        store,
        ledger,
        gateway,
        notifier,
        engine,
        webhooks,
    }
}

impl Harness {
    /// A payee with an active destination account `acct_<id>`.
    pub async fn payee(&self, id: u64) -> UserId {
        let user = UserId::from(id);
        self.ledger
            .upsert_payee(user, "Pat", &format!("Payee{id}"), &format!("payee{id}@example.com"))
            .await
            .unwrap();
        self.ledger
            .link_payout_account(user, &format!("acct_{id}"), AccountStatus::Active)
            .await
            .unwrap();
        user
    }

    pub async fn accrue(&self, user: UserId, amount: Decimal) -> EarningEntry {
        self.ledger
            .record_commission(CommissionInput::new(user, amount))
            .await
            .unwrap()
    }

    pub async fn user(&self, id: UserId) -> User {
        self.store.user(id).await.unwrap().unwrap()
    }

    /// Newest first.
    pub async fn entries(&self, user: UserId) -> Vec<EarningEntry> {
        self.store
            .entries(&EntryFilter::for_user(user))
            .await
            .unwrap()
    }

    pub async fn payouts(&self, user: UserId) -> Vec<Payout> {
        self.store.payouts(Some(user)).await.unwrap()
    }

    /// A payout row written straight to the store, without touching any entry.
    pub async fn record_payout(&self, user: UserId, transfer_id: &str, amount: Decimal) -> Payout {
        let now = Utc::now();
        let payout = Payout {
            id: self.store.next_payout_id().await.unwrap(),
            user_id: user,
            transfer_id: transfer_id.to_owned(),
            amount,
            currency: CURRENCY.to_owned(),
            status: PayoutStatus::Pending,
            account_id: format!("acct_{user}"),
            description: format!("Recorded transfer {transfer_id}"),
            earning_id: None,
            created_at: now,
            updated_at: now,
        };
        self.store
            .apply(ChangeSet {
                payouts: vec![payout.clone()],
                ..ChangeSet::default()
            })
            .await
            .unwrap();
        payout
    }

    /// The cached wallet must equal the sum of the user's pending credit entries.
    pub async fn assert_wallet_consistent(&self, user: UserId) {
        let wallet = self.user(user).await.wallet.balance();
        let pending = self.ledger.pending_credit_total(user).await.unwrap();
        assert_eq!(wallet, pending, "wallet of user {user} drifted from its ledger");
    }
}

/// A gateway event body and its signature header.
pub fn signed_event(event_type: &str, object: serde_json::Value) -> (Vec<u8>, String) {
    let payload = serde_json::to_vec(&serde_json::json!({
        "id": format!("evt_{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()),
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": { "object": object },
    }))
    .unwrap();
    let header = signature::sign(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
    (payload, header)
}
