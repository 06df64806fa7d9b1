//! Process configuration, read from flags or the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use rust_decimal::Decimal;

use crate::fees::{DEFAULT_GATEWAY_FEE_RATE, DEFAULT_GATEWAY_FLAT_FEE, GatewayPricing};

#[derive(Debug, Clone, Args)]
pub struct Config {
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    #[arg(long, env = "GATEWAY_API_BASE", default_value = "https://api.stripe.com")]
    pub gateway_api_base: String,

    #[arg(long, env = "GATEWAY_SECRET_KEY", hide_env_values = true)]
    pub gateway_secret_key: String,

    #[arg(long, env = "GATEWAY_WEBHOOK_SECRET", hide_env_values = true)]
    pub gateway_webhook_secret: String,

    /// Shared secret expected in `x-api-key` on the weekly cron trigger.
    #[arg(long, env = "CRON_API_KEY", hide_env_values = true)]
    pub cron_api_key: String,

    #[arg(long, env = "PAYOUT_CURRENCY", default_value = "usd")]
    pub payout_currency: String,

    #[arg(long, env = "GATEWAY_TIMEOUT_SECS", default_value_t = 30)]
    pub gateway_timeout_secs: u64,

    #[arg(long, env = "WEBHOOK_TOLERANCE_SECS", default_value_t = 300)]
    pub webhook_tolerance_secs: u64,

    #[arg(long, env = "GATEWAY_FEE_RATE", default_value_t = DEFAULT_GATEWAY_FEE_RATE)]
    pub gateway_fee_rate: Decimal,

    #[arg(long, env = "GATEWAY_FLAT_FEE", default_value_t = DEFAULT_GATEWAY_FLAT_FEE)]
    pub gateway_flat_fee: Decimal,

    /// Import CSV replayed into the store before the API starts listening.
    #[arg(long, env = "SEED_FILE")]
    pub seed_file: Option<PathBuf>,

    /// Run the Friday 02:00 UTC batch from this process.
    #[arg(long, env = "WEEKLY_SCHEDULE")]
    pub weekly_schedule: bool,
}

impl Config {
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn webhook_tolerance(&self) -> Duration {
        Duration::from_secs(self.webhook_tolerance_secs)
    }

    pub fn pricing(&self) -> GatewayPricing {
        GatewayPricing {
            rate: self.gateway_fee_rate,
            flat: self.gateway_flat_fee,
        }
    }
}
