//! Admin and webhook HTTP surface.
//!
//! Every response body is an [`ApiResponse`] envelope. Endpoints:
//! - `POST /payouts/weekly` (cron trigger, `x-api-key` shared secret)
//! - `POST /payouts/manual` with `{"userId": ..}`
//! - `POST /payouts/transactions/{entryId}`
//! - `GET /payouts/history/{userId}`, `GET /payouts/status/{payoutId}`
//! - `GET /payouts/stats`, `GET /payouts/unreconciled`
//! - `GET /earnings`
//! - `POST /payees`, `POST /payees/{userId}/account`, `POST /businesses`
//! - `POST /webhooks/purchase` (commission intake)
//! - `POST /webhooks/gateway` (signed gateway events, raw body)

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{
    AccountStatus, BusinessEntity, BusinessId, EarningEntry, EntryKind, PaymentStatus, Payout,
    PayoutAccount, TransactionKind, User, UserId,
};
use crate::engine::{
    BatchReport, ErrorKind, PayoutStats, SettlementEngine, SettlementError, SettlementResult,
    UnreconciledTransfer,
};
use crate::fees::{self, FeeBreakdown, FeeConfig, GatewayPricing};
use crate::ledger::{
    CommissionInput, EntryFilter, EntryPage, LedgerError, PageRequest, StatusTotals,
};
use crate::webhook::{WebhookHandler, WebhookOutcome};

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const CRON_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SettlementEngine>,
    pub webhooks: Arc<WebhookHandler>,
    pub cron_api_key: Arc<str>,
    pub pricing: GatewayPricing,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

fn respond<T: Serialize>(message: impl Into<String>, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        message: message.into(),
        data: Some(data),
        error: None,
        kind: None,
    })
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    error: String,
    kind: Option<ErrorKind>,
}

impl ApiError {
    fn new(status: StatusCode, message: &str, error: impl ToString) -> Self {
        Self {
            status,
            message: message.to_owned(),
            error: error.to_string(),
            kind: None,
        }
    }

    fn validation(error: impl ToString) -> Self {
        let mut e = Self::new(StatusCode::BAD_REQUEST, "Invalid request", error);
        e.kind = Some(ErrorKind::Validation);
        e
    }
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        let kind = e.kind();
        let (status, message) = match kind {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, "Invalid request"),
            ErrorKind::Eligibility => (StatusCode::CONFLICT, "Not eligible for payout"),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "Not found"),
            ErrorKind::Gateway => (StatusCode::BAD_GATEWAY, "Payment gateway error"),
            ErrorKind::Consistency => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Transfer sent but not recorded; flagged for reconciliation",
            ),
            ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
        };
        Self {
            status,
            message: message.to_owned(),
            error: e.to_string(),
            kind: Some(kind),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        SettlementError::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            message: self.message,
            data: None,
            error: Some(self.error),
            kind: self.kind,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/payouts/weekly", post(run_weekly))
        .route("/payouts/manual", post(manual_payout))
        .route("/payouts/transactions/:entry_id", post(settle_transaction))
        .route("/payouts/history/:user_id", get(payout_history))
        .route("/payouts/status/:payout_id", get(payout_status))
        .route("/payouts/stats", get(payout_stats))
        .route("/payouts/unreconciled", get(unreconciled_transfers))
        .route("/earnings", get(list_earnings))
        .route("/payees", post(upsert_payee))
        .route("/payees/:user_id/account", post(link_account))
        .route("/businesses", post(register_business))
        .route("/webhooks/purchase", post(purchase_webhook))
        .route("/webhooks/gateway", post(gateway_webhook))
        .with_state(state)
}

async fn run_weekly(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<BatchReport> {
    let provided = headers
        .get(CRON_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if provided != Some(state.cron_api_key.as_ref()) {
        warn!("weekly payout trigger rejected: bad api key");
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "missing or invalid api key",
        ));
    }
    let report = state.engine.run_weekly().await?;
    Ok(respond(
        format!(
            "Weekly payouts processed: {} succeeded, {} failed",
            report.processed, report.failed
        ),
        report,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManualPayoutRequest {
    user_id: Option<u64>,
}

async fn manual_payout(
    State(state): State<AppState>,
    body: Result<Json<ManualPayoutRequest>, JsonRejection>,
) -> ApiResult<SettlementResult> {
    let Json(request) = body.map_err(|e| ApiError::validation(e.body_text()))?;
    let user_id = UserId::from(
        request
            .user_id
            .ok_or_else(|| ApiError::validation("userId is required"))?,
    );
    let settlement = state.engine.settle_user(user_id).await?;
    Ok(respond(
        "Payout processed",
        SettlementResult::succeeded(&settlement),
    ))
}

async fn settle_transaction(
    State(state): State<AppState>,
    Path(entry_id): Path<u64>,
) -> ApiResult<SettlementResult> {
    let settlement = state.engine.settle_entry(entry_id.into()).await?;
    Ok(respond(
        "Transaction payout processed",
        SettlementResult::succeeded(&settlement),
    ))
}

async fn payout_history(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
) -> ApiResult<Vec<Payout>> {
    let payouts = state.engine.payout_history(user_id.into()).await?;
    Ok(respond("Payout history", payouts))
}

async fn payout_status(
    State(state): State<AppState>,
    Path(payout_id): Path<u64>,
) -> ApiResult<Payout> {
    let (payout, _) = state.engine.refresh_status(payout_id.into()).await?;
    Ok(respond("Payout status", payout))
}

async fn payout_stats(State(state): State<AppState>) -> ApiResult<PayoutStats> {
    Ok(respond("Payout stats", state.engine.stats().await?))
}

async fn unreconciled_transfers(
    State(state): State<AppState>,
) -> ApiResult<Vec<UnreconciledTransfer>> {
    Ok(respond("Unreconciled transfers", state.engine.unreconciled()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EarningsQuery {
    user_id: Option<u64>,
    status: Option<PaymentStatus>,
    kind: Option<EntryKind>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EarningsView {
    #[serde(flatten)]
    page: EntryPage,
    totals: StatusTotals,
}

async fn list_earnings(
    State(state): State<AppState>,
    query: Result<Query<EarningsQuery>, QueryRejection>,
) -> ApiResult<EarningsView> {
    let Query(query) = query.map_err(|e| ApiError::validation(e.body_text()))?;
    let filter = EntryFilter {
        user_id: query.user_id.map(UserId::from),
        status: query.status,
        kind: query.kind,
        reference: None,
        from: query.from,
        to: query.to,
    };
    let defaults = PageRequest::default();
    let page = PageRequest {
        page: query.page.unwrap_or(defaults.page),
        limit: query.limit.unwrap_or(defaults.limit),
    };
    let ledger = state.engine.ledger();
    let view = EarningsView {
        page: ledger.list_entries(&filter, page).await?,
        totals: ledger.sum_by_status(&filter).await?,
    };
    Ok(respond("Earnings", view))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayeeRequest {
    user_id: u64,
    first_name: String,
    last_name: String,
    email: String,
}

async fn upsert_payee(
    State(state): State<AppState>,
    body: Result<Json<PayeeRequest>, JsonRejection>,
) -> ApiResult<User> {
    let Json(request) = body.map_err(|e| ApiError::validation(e.body_text()))?;
    if request.email.trim().is_empty() {
        return Err(ApiError::validation("email is required"));
    }
    let user = state
        .engine
        .ledger()
        .upsert_payee(
            request.user_id.into(),
            &request.first_name,
            &request.last_name,
            &request.email,
        )
        .await?;
    Ok(respond("Payee saved", user))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRequest {
    account_id: String,
    #[serde(default = "active")]
    status: AccountStatus,
}

fn active() -> AccountStatus {
    AccountStatus::Active
}

async fn link_account(
    State(state): State<AppState>,
    Path(user_id): Path<u64>,
    body: Result<Json<AccountRequest>, JsonRejection>,
) -> ApiResult<PayoutAccount> {
    let Json(request) = body.map_err(|e| ApiError::validation(e.body_text()))?;
    if request.account_id.trim().is_empty() {
        return Err(ApiError::validation("accountId is required"));
    }
    let account = state
        .engine
        .ledger()
        .link_payout_account(user_id.into(), &request.account_id, request.status)
        .await?;
    Ok(respond("Payout account linked", account))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BusinessRequest {
    business_entity_id: u64,
    referrer_id: u64,
    #[serde(default)]
    name: String,
}

async fn register_business(
    State(state): State<AppState>,
    body: Result<Json<BusinessRequest>, JsonRejection>,
) -> ApiResult<BusinessEntity> {
    let Json(request) = body.map_err(|e| ApiError::validation(e.body_text()))?;
    let business = state
        .engine
        .ledger()
        .register_business(
            request.business_entity_id.into(),
            request.referrer_id.into(),
            &request.name,
        )
        .await?;
    Ok(respond("Business registered", business))
}

/// A completed purchase at a referred business.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseEvent {
    user_id: u64,
    business_entity_id: Option<u64>,
    external_payment_id: Option<String>,
    /// The transaction amount the commission is taken from.
    service_fee: Decimal,
    fee_config: FeeConfig,
    #[serde(default)]
    service_name: String,
    #[serde(default)]
    business_name: String,
    #[serde(default)]
    customer_first_name: String,
    #[serde(default)]
    customer_last_name: String,
    service_date: Option<DateTime<Utc>>,
    #[serde(default)]
    transaction_type: TransactionKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseRecorded {
    entry: EarningEntry,
    fees: FeeBreakdown,
}

async fn purchase_webhook(
    State(state): State<AppState>,
    body: Result<Json<PurchaseEvent>, JsonRejection>,
) -> ApiResult<PurchaseRecorded> {
    let Json(purchase) = body.map_err(|e| ApiError::validation(e.body_text()))?;
    if purchase.service_fee <= Decimal::ZERO {
        return Err(ApiError::validation("Transaction amount is required"));
    }
    if purchase.fee_config.current_fee < Decimal::ZERO {
        return Err(ApiError::validation("currentFee must not be negative"));
    }
    let commission = fees::platform_fee_strict(purchase.service_fee, &purchase.fee_config)
        .map_err(ApiError::validation)?;
    let breakdown = fees::all_fees(purchase.service_fee, &purchase.fee_config, state.pricing)
        .map_err(ApiError::validation)?;

    let customer_name = format!(
        "{} {}",
        purchase.customer_first_name, purchase.customer_last_name
    )
    .trim()
    .to_owned();
    let input = CommissionInput {
        user_id: purchase.user_id.into(),
        amount: fees::round_up_to_cent(commission),
        business_entity_id: purchase.business_entity_id.map(BusinessId::from),
        external_payment_id: purchase.external_payment_id,
        service_fee: purchase.service_fee,
        service_name: purchase.service_name,
        business_name: purchase.business_name,
        customer_name,
        service_date: purchase.service_date,
        transaction_kind: purchase.transaction_type,
    };
    let entry = state.engine.ledger().record_commission(input).await?;
    Ok(respond(
        "Commission recorded",
        PurchaseRecorded {
            entry,
            fees: breakdown,
        },
    ))
}

/// Takes the body as raw bytes: the signature covers the exact payload.
async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<WebhookOutcome>>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    match state.webhooks.handle(&body, signature).await {
        Ok(outcome) => {
            info!(?outcome, "gateway webhook acknowledged");
            let error = match &outcome {
                WebhookOutcome::Errored { error, .. } => Some(error.clone()),
                _ => None,
            };
            Ok(Json(ApiResponse {
                success: true,
                message: "received".to_owned(),
                data: Some(outcome),
                error,
                kind: None,
            }))
        }
        Err(e) => {
            warn!(error = %e, "gateway webhook rejected");
            Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "Webhook signature verification failed",
                e,
            ))
        }
    }
}
