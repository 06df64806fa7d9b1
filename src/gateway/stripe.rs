//! Stripe-compatible transfers API over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{GatewayError, NewTransfer, Transfer, TransferApi};
use crate::domain::{DomainError, PayoutStatus};

#[derive(Debug, Clone)]
pub struct StripeApi {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct TransferBody {
    id: String,
    status: Option<String>,
    #[serde(default)]
    reversed: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl StripeApi {
    pub fn new(base_url: &str, secret_key: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            secret_key: secret_key.to_owned(),
        })
    }

    async fn read_transfer(response: reqwest::Response) -> Result<Transfer, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or(text);
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let body: TransferBody = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let status = if body.reversed {
            PayoutStatus::Canceled
        } else {
            match body.status.as_deref() {
                Some(s) => s
                    .parse()
                    .map_err(|e: DomainError| GatewayError::InvalidResponse(e.to_string()))?,
                // Transfers without a lifecycle field are accepted and awaiting funds movement.
                None => PayoutStatus::Pending,
            }
        };
        Ok(Transfer {
            id: body.id,
            status,
        })
    }
}

#[async_trait]
impl TransferApi for StripeApi {
    async fn create_transfer(&self, transfer: NewTransfer) -> Result<Transfer, GatewayError> {
        debug!(
            destination = %transfer.destination,
            amount_cents = transfer.amount_cents,
            idempotency_key = %transfer.idempotency_key,
            "creating transfer"
        );
        let form = [
            ("amount", transfer.amount_cents.to_string()),
            ("currency", transfer.currency),
            ("destination", transfer.destination),
            ("description", transfer.description),
        ];
        let response = self
            .http
            .post(format!("{}/v1/transfers", self.base_url))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &transfer.idempotency_key)
            .form(&form)
            .send()
            .await?;
        Self::read_transfer(response).await
    }

    async fn retrieve_transfer(&self, transfer_id: &str) -> Result<Transfer, GatewayError> {
        let response = self
            .http
            .get(format!("{}/v1/transfers/{transfer_id}", self.base_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        Self::read_transfer(response).await
    }
}
