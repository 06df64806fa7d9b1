//! Platform commission and gateway fee pass-through.
//!
//! Everything here is pure decimal arithmetic. Monetary outputs are rounded
//! *up* to the cent so the payee is never left short by rounding.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal::dec;
use serde::{Deserialize, Serialize};

/// Default gateway percentage fee (2.9%).
pub const DEFAULT_GATEWAY_FEE_RATE: Decimal = dec!(0.029);
/// Default gateway flat fee per charge.
pub const DEFAULT_GATEWAY_FLAT_FEE: Decimal = dec!(0.30);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeeError {
    #[error("Unknown platform fee type")]
    UnknownFeeType,
    #[error("Gateway fee rate must be in [0, 1), got {0}")]
    InvalidFeeRate(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeType {
    Fixed,
    Percentage,
    /// Any value the platform config carries that this crate does not know.
    #[serde(other)]
    Unknown,
}

/// Platform commission configuration for a business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeConfig {
    pub fee_type: FeeType,
    pub current_fee: Decimal,
}

impl FeeConfig {
    pub fn fixed(fee: Decimal) -> Self {
        Self {
            fee_type: FeeType::Fixed,
            current_fee: fee,
        }
    }
    pub fn percentage(percent: Decimal) -> Self {
        Self {
            fee_type: FeeType::Percentage,
            current_fee: percent,
        }
    }
}

/// Gateway pricing: `fee = gross * rate + flat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayPricing {
    pub rate: Decimal,
    pub flat: Decimal,
}

impl Default for GatewayPricing {
    fn default() -> Self {
        Self {
            rate: DEFAULT_GATEWAY_FEE_RATE,
            flat: DEFAULT_GATEWAY_FLAT_FEE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCharge {
    /// What to charge so that `net` remains after gateway fees.
    pub gross: Decimal,
    pub fee: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    pub platform_fee: Decimal,
    pub gateway_fee: Decimal,
    pub total_service_fee: Decimal,
    pub total_service_cost: Decimal,
}

pub fn round_up_to_cent(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::ToPositiveInfinity)
}

/// Platform commission for `service_amount`. Unknown fee types yield zero;
/// use [`platform_fee_strict`] where a silent zero is not acceptable.
pub fn platform_fee(service_amount: Decimal, config: &FeeConfig) -> Decimal {
    platform_fee_strict(service_amount, config).unwrap_or(Decimal::ZERO)
}

pub fn platform_fee_strict(
    service_amount: Decimal,
    config: &FeeConfig,
) -> Result<Decimal, FeeError> {
    match config.fee_type {
        FeeType::Percentage => Ok(service_amount * config.current_fee / dec!(100)),
        FeeType::Fixed => Ok(config.current_fee),
        FeeType::Unknown => Err(FeeError::UnknownFeeType),
    }
}

/// Solves `G - (G * rate + flat) = net` for the gross charge `G`.
pub fn reverse_gateway_fee(
    net: Decimal,
    rate: Decimal,
    flat: Decimal,
) -> Result<GatewayCharge, FeeError> {
    if rate.is_sign_negative() || rate >= Decimal::ONE {
        return Err(FeeError::InvalidFeeRate(rate));
    }
    let gross = (net + flat) / (Decimal::ONE - rate);
    Ok(GatewayCharge {
        gross: round_up_to_cent(gross),
        fee: round_up_to_cent(gross - net),
    })
}

pub fn all_fees(
    service_amount: Decimal,
    config: &FeeConfig,
    pricing: GatewayPricing,
) -> Result<FeeBreakdown, FeeError> {
    let platform = platform_fee(service_amount, config);
    let charge = reverse_gateway_fee(service_amount + platform, pricing.rate, pricing.flat)?;
    Ok(FeeBreakdown {
        platform_fee: round_up_to_cent(platform),
        gateway_fee: charge.fee,
        total_service_fee: round_up_to_cent(platform + charge.fee),
        total_service_cost: charge.gross,
    })
}

/// Total to charge a customer for `price` so that the business keeps `price`
/// plus the platform commission after gateway fees.
pub fn total_with_gateway_fee(
    price: Decimal,
    config: &FeeConfig,
    pricing: GatewayPricing,
) -> Result<Decimal, FeeError> {
    let to_receive = match config.fee_type {
        FeeType::Percentage => price * (Decimal::ONE + config.current_fee / dec!(100)),
        FeeType::Fixed => price + config.current_fee,
        FeeType::Unknown => return Err(FeeError::UnknownFeeType),
    };
    Ok(reverse_gateway_fee(to_receive, pricing.rate, pricing.flat)?.gross)
}
