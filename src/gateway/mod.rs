//! Transfer gateway adapter.
//!
//! [`TransferGateway`] is the only place decimal amounts become integer
//! minor units, and every outbound call it makes is bounded by a timeout.
//! The wire protocol sits behind [`TransferApi`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::domain::PayoutStatus;
pub use errors::GatewayError;
pub use signature::{EventData, GatewayEvent, SignatureError};
pub use stripe::StripeApi;

mod errors;
pub mod signature;
mod stripe;

/// Default allowed clock skew for webhook signatures.
pub const DEFAULT_SIGNATURE_TOLERANCE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTransfer {
    pub amount_cents: i64,
    pub currency: String,
    pub destination: String,
    pub description: String,
    /// Replays with the same key return the original transfer.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub id: String,
    pub status: PayoutStatus,
}

#[async_trait]
pub trait TransferApi: Send + Sync {
    async fn create_transfer(&self, transfer: NewTransfer) -> Result<Transfer, GatewayError>;
    async fn retrieve_transfer(&self, transfer_id: &str) -> Result<Transfer, GatewayError>;
}

/// Converts a decimal amount to integer cents. Amounts are expected to be
/// cent-exact already; anything finer is a data-integrity error, not something
/// to round away.
pub fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    if amount <= Decimal::ZERO {
        return Err(GatewayError::NonPositiveAmount(amount));
    }
    let cents = amount * Decimal::ONE_HUNDRED;
    if !cents.fract().is_zero() {
        return Err(GatewayError::FractionalCents(amount));
    }
    cents
        .floor()
        .to_i64()
        .ok_or(GatewayError::AmountOverflow(amount))
}

pub struct TransferGateway {
    api: Arc<dyn TransferApi>,
    timeout: Duration,
    signature_tolerance: Duration,
}

impl TransferGateway {
    pub fn new(api: Arc<dyn TransferApi>, timeout: Duration) -> Self {
        Self {
            api,
            timeout,
            signature_tolerance: DEFAULT_SIGNATURE_TOLERANCE,
        }
    }

    pub fn with_signature_tolerance(mut self, tolerance: Duration) -> Self {
        self.signature_tolerance = tolerance;
        self
    }

    pub async fn create_transfer(
        &self,
        amount: Decimal,
        currency: &str,
        destination: &str,
        description: &str,
        idempotency_key: &str,
    ) -> Result<Transfer, GatewayError> {
        let request = NewTransfer {
            amount_cents: to_minor_units(amount)?,
            currency: currency.to_owned(),
            destination: destination.to_owned(),
            description: description.to_owned(),
            idempotency_key: idempotency_key.to_owned(),
        };
        tokio::time::timeout(self.timeout, self.api.create_transfer(request))
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))?
    }

    pub async fn retrieve_transfer(&self, transfer_id: &str) -> Result<PayoutStatus, GatewayError> {
        let transfer = tokio::time::timeout(self.timeout, self.api.retrieve_transfer(transfer_id))
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))??;
        Ok(transfer.status)
    }

    /// Checks the raw body against its signature header. Decoding is left to
    /// the caller.
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
        secret: &str,
    ) -> Result<(), GatewayError> {
        Ok(signature::verify(
            payload,
            signature_header,
            secret,
            self.signature_tolerance,
            Utc::now().timestamp(),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    #[test]
    fn whole_cents_convert_exactly() {
        assert_eq!(to_minor_units(dec!(40)).unwrap(), 4000);
        assert_eq!(to_minor_units(dec!(103.30)).unwrap(), 10330);
        assert_eq!(to_minor_units(dec!(0.01)).unwrap(), 1);
    }

    #[test]
    fn fractional_cents_are_a_data_integrity_error() {
        let err = to_minor_units(dec!(10.005)).unwrap_err();
        assert!(matches!(err, GatewayError::FractionalCents(_)));
        assert!(err.is_data_integrity());
    }

    #[test]
    fn zero_and_negative_amounts_are_rejected() {
        assert!(matches!(
            to_minor_units(Decimal::ZERO),
            Err(GatewayError::NonPositiveAmount(_))
        ));
        assert!(matches!(
            to_minor_units(dec!(-5)),
            Err(GatewayError::NonPositiveAmount(_))
        ));
    }

    struct StalledApi;

    #[async_trait]
    impl TransferApi for StalledApi {
        async fn create_transfer(&self, _: NewTransfer) -> Result<Transfer, GatewayError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("timeout fires first")
        }
        async fn retrieve_transfer(&self, _: &str) -> Result<Transfer, GatewayError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("timeout fires first")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_calls_time_out() {
        let gateway = TransferGateway::new(Arc::new(StalledApi), Duration::from_secs(5));
        let err = gateway
            .create_transfer(dec!(1), "usd", "acct_1", "test", "key")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(d) if d == Duration::from_secs(5)));
        assert!(matches!(
            gateway.retrieve_transfer("tr_1").await,
            Err(GatewayError::Timeout(_))
        ));
    }
}
