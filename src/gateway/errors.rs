use std::time::Duration;

use rust_decimal::Decimal;

use super::signature::SignatureError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Amount {0} carries fractional cents")]
    FractionalCents(Decimal),
    #[error("Transfer amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("Amount {0} does not fit in minor units")]
    AmountOverflow(Decimal),
    #[error("Gateway call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Gateway HTTP error: {0}")]
    Http(String),
    #[error("Gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Unexpected gateway response: {0}")]
    InvalidResponse(String),
    #[error("Webhook signature error: {0}")]
    Signature(#[from] SignatureError),
}

impl GatewayError {
    /// Amount errors mean bad data reached the adapter, not a gateway fault.
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            GatewayError::FractionalCents(_)
                | GatewayError::NonPositiveAmount(_)
                | GatewayError::AmountOverflow(_)
        )
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Http(e.to_string())
    }
}
