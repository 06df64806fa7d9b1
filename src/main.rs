use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use referral_payouts::api::{self, AppState};
use referral_payouts::config::Config;
use referral_payouts::engine::SettlementEngine;
use referral_payouts::gateway::{StripeApi, TransferGateway};
use referral_payouts::ledger::Ledger;
use referral_payouts::notify::LogNotifier;
use referral_payouts::store::MemoryStore;
use referral_payouts::webhook::WebhookHandler;
use referral_payouts::{output, parsing, schedule};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Arguments::parse();
    let filter = match args.log_level {
        Some(level) => EnvFilter::default().add_directive(LevelFilter::from_level(level).into()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match args.command {
        Command::Serve(config) => serve(config).await,
        Command::Import { input_file } => import(&input_file).await,
    }
}

#[derive(Parser)]
struct Arguments {
    /// Overrides `RUST_LOG`.
    #[arg(long, global = true)]
    log_level: Option<tracing::Level>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the admin/webhook HTTP API and, optionally, the weekly batch.
    Serve(Config),
    /// Replay a CSV of payees, accounts, businesses and commissions and print
    /// the resulting wallets.
    Import { input_file: String },
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let ledger = Arc::new(Ledger::new(Arc::new(MemoryStore::new())));
    if let Some(seed) = &config.seed_file {
        let users = parsing::replay(&ledger, read_records(seed)?).await;
        info!(file = %seed.display(), users = users.len(), "seed import loaded");
    }
    let transfers = StripeApi::new(
        &config.gateway_api_base,
        &config.gateway_secret_key,
        config.gateway_timeout(),
    )
    .context("building gateway client")?;
    let gateway = Arc::new(
        TransferGateway::new(Arc::new(transfers), config.gateway_timeout())
            .with_signature_tolerance(config.webhook_tolerance()),
    );
    let engine = Arc::new(SettlementEngine::new(
        Arc::clone(&ledger),
        Arc::clone(&gateway),
        Arc::new(LogNotifier),
        &config.payout_currency,
    ));
    let webhooks = Arc::new(WebhookHandler::new(
        ledger,
        gateway,
        &config.gateway_webhook_secret,
    ));
    let state = AppState {
        engine: Arc::clone(&engine),
        webhooks,
        cron_api_key: config.cron_api_key.as_str().into(),
        pricing: config.pricing(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = config
        .weekly_schedule
        .then(|| tokio::spawn(schedule::run_weekly_schedule(engine, shutdown_rx)));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "payout API listening");
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Fails only when no scheduler is listening.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler {
        // Lets a batch already in progress finish before exiting.
        handle.await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for shutdown signal");
    }
    info!("shutdown requested");
}

fn read_records(path: &Path) -> anyhow::Result<Vec<parsing::ImportRecord>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);
    Ok(parsing::deserialize_csv(&mut rdr).collect())
}

async fn import(input_file: &str) -> anyhow::Result<()> {
    let ledger = Ledger::new(Arc::new(MemoryStore::new()));
    let users = parsing::replay(&ledger, read_records(Path::new(input_file))?).await;

    let mut wallets = Vec::with_capacity(users.len());
    for id in users {
        if let Some(user) = ledger.store().user(id).await? {
            wallets.push(user);
        }
    }
    output::print_wallets(&wallets, std::io::stdout())
}
