// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Atalanta bot - launch sniping and cross-DEX arbitrage.

use alloy::primitives::Address;
use alloy::providers::Provider;
use anyhow::Context;
use atalanta_bot::arbitrage::{ArbitrageExecutor, ArbitrageScanner};
use atalanta_bot::chain::{connect_http, ChainClient, RpcChain};
use atalanta_bot::config::Config;
use atalanta_bot::dex::{DexQuoter, DexRegistry, UnconfiguredDex, UniswapV2Quoter};
use atalanta_bot::executor::ExecutionPipeline;
use atalanta_bot::listeners::{LaunchMonitor, LaunchObserver, WsPairFeed};
use atalanta_bot::signer::{LocalKeySigner, SignatureInbox, Signer};
use atalanta_bot::storage::JsonTradeStore;
use atalanta_bot::strategies::AutoSniper;
use atalanta_bot::telegram::TelegramNotifier;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often the run loop logs component status.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "atalanta-bot", version, about = "Launch sniper and cross-DEX arbitrage scanner")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor launches, scan for arbitrage and execute requests (default).
    Run,
    /// Check liquidity and honeypot behaviour of a token on every exchange.
    CheckToken {
        /// Token address.
        token: String,
    },
    /// Run a single arbitrage pass over the configured tokens and exit.
    ScanOnce,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    init_tracing(config.as_ref().map_or("info", |c| c.log_level.as_str()));
    let config = config.map_err(|e| {
        error!("Failed to load config: {}", e);
        e
    })?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::CheckToken { token } => {
            let token: Address = token.parse().context("invalid token address")?;
            check_token(config, token).await
        }
        Command::ScanOnce => scan_once(config).await,
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn build_registry<P: Provider + Clone + 'static>(config: &Config, provider: &P) -> DexRegistry {
    let mut registry = DexRegistry::new();
    for exchange in config.exchanges() {
        let dex: Arc<dyn DexQuoter> = match exchange.addresses() {
            Some((router, factory)) => Arc::new(UniswapV2Quoter::new(
                exchange.name.clone(),
                provider.clone(),
                router,
                factory,
                config.base_token,
            )),
            None => Arc::new(UnconfiguredDex::new(exchange.name.clone())),
        };
        registry.register(dex);
    }
    info!("🏦 Exchanges: {}", registry.names().join(", "));
    registry
}

async fn check_token(config: Config, token: Address) -> anyhow::Result<()> {
    let provider = connect_http(&config.rpc_url)?;
    let registry = build_registry(&config, &provider);

    info!("🧪 Checking {}", token);
    for dex in registry.all() {
        let symbol = dex.token_symbol(token).await;
        match dex.liquidity(token).await {
            Ok(liquidity) => info!(
                "{}: {} liquidity {:.4} base",
                dex.name(),
                symbol.as_deref().unwrap_or("?"),
                liquidity
            ),
            Err(e) => {
                warn!("{}: liquidity unavailable: {}", dex.name(), e);
                continue;
            }
        }
        match dex.probe_honeypot(token).await {
            Ok(report) if report.is_honeypot => {
                warn!("🍯 {}: HONEYPOT ({})", dex.name(), report.reason)
            }
            Ok(report) => info!("✅ {}: round-trip loss {:.2}%", dex.name(), report.loss_pct),
            Err(e) => warn!("{}: honeypot probe failed: {}", dex.name(), e),
        }
    }
    Ok(())
}

async fn scan_once(config: Config) -> anyhow::Result<()> {
    let provider = connect_http(&config.rpc_url)?;
    let registry = build_registry(&config, &provider);
    let chain: Arc<dyn ChainClient> = Arc::new(RpcChain::new(provider));
    let scanner = ArbitrageScanner::new(registry, chain, config.scanner_config());

    let found = scanner.scan_once().await;
    info!("🔍 Scan finished: {} opportunities", found.len());
    for opp in found {
        info!(
            "{} {} -> {}: {:.2}% spread, net {:.6}{}",
            opp.symbol.as_deref().unwrap_or("?"),
            opp.buy_exchange,
            opp.sell_exchange,
            opp.profit_pct,
            opp.net_profit,
            if opp.executable { " (executable)" } else { "" }
        );
    }
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("🚀 Atalanta bot starting...");
    info!("📡 RPC: {}", config.rpc_url);
    info!("📡 WS:  {}", config.ws_url);
    info!("👛 Wallet: {}", config.wallet_address);

    let provider = connect_http(&config.rpc_url)?;
    let registry = build_registry(&config, &provider);
    let chain: Arc<dyn ChainClient> = Arc::new(RpcChain::new(provider.clone()));

    let store = Arc::new(JsonTradeStore::load(&config.trades_file));
    store.log_summary();

    let signer: Arc<dyn Signer> = match &config.private_key {
        Some(key) => {
            let local = LocalKeySigner::new(provider.clone(), key, config.chain_id)
                .map_err(anyhow::Error::msg)?;
            if local.address() != config.wallet_address {
                warn!(
                    "PRIVATE_KEY controls {}, not WALLET_ADDRESS {}; requests will be declined",
                    local.address(),
                    config.wallet_address
                );
            }
            info!("🔑 Signing locally as {}", local.address());
            Arc::new(local)
        }
        None => {
            warn!("PRIVATE_KEY not set, prepared requests wait for external signatures");
            Arc::new(SignatureInbox::new())
        }
    };

    let pipeline = Arc::new(ExecutionPipeline::new(
        config.pipeline_config(),
        registry.clone(),
        Arc::clone(&chain),
        signer,
        store.clone(),
        Arc::new(config.gas_settings()),
    ));

    let (opportunity_tx, opportunity_rx) = mpsc::channel(100);
    let scanner = ArbitrageScanner::with_sink(
        registry,
        Arc::clone(&chain),
        config.scanner_config(),
        opportunity_tx,
    );
    let arb_executor = ArbitrageExecutor::new(
        Arc::clone(&pipeline),
        config.arbitrage_settings(),
        opportunity_rx,
    );

    let telegram = Arc::new(TelegramNotifier::new(
        config.telegram_token.clone(),
        config.telegram_chat_id.clone(),
    ));
    let monitor = config.monitor_config().map(|monitor_config| {
        let feed = Arc::new(WsPairFeed::new(config.ws_url.clone()));
        let monitor = LaunchMonitor::new(monitor_config, feed);
        if telegram.is_enabled() {
            let observer: Arc<dyn LaunchObserver> = telegram.clone();
            monitor.on_launch(observer);
        }
        let sniper: Arc<dyn LaunchObserver> =
            Arc::new(AutoSniper::new(Arc::clone(&pipeline), config.sniper_settings()));
        monitor.on_launch(sniper);
        monitor
    });

    pipeline.start();
    if let Some(monitor) = &monitor {
        monitor.start();
    } else {
        warn!(
            "No factory configured for {}, launch monitor disabled",
            config.primary_exchange.name
        );
    }
    if config.arb_tokens.is_empty() {
        info!("No ARB_TOKENS configured, arbitrage scanner idle");
    } else {
        scanner.start();
    }
    arb_executor.start();

    telegram.send_message("🚀 Atalanta bot launching...").await;
    info!("✅ Bot ready! Waiting for launches and spreads...");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("🛑 Shutdown signal received, stopping components...");
                break;
            }
            _ = ticker.tick() => {
                let stats = pipeline.stats();
                info!(
                    "📊 Pipeline: {} active, {} confirmed, {} failed, {} rejected, {:.1}% success",
                    stats.active,
                    stats.confirmed,
                    stats.failed,
                    stats.rejected,
                    stats.success_rate
                );
                info!("📊 Queue: {} waiting, {} workers", stats.queue_depth, stats.workers);
                if let Some(monitor) = &monitor {
                    let status = monitor.status();
                    info!(
                        "📊 Monitor: {} launches cached, {} accepted",
                        status.cached_launches, status.accepted
                    );
                }
                let status = scanner.status();
                info!(
                    "📊 Scanner: {} tokens, {} opportunities cached",
                    status.monitored_tokens, status.cached_opportunities
                );
            }
        }
    }

    if let Some(monitor) = &monitor {
        monitor.stop().await;
    }
    scanner.stop().await;
    arb_executor.stop().await;
    pipeline.stop().await;
    store.log_summary();
    telegram.send_message("🛑 Atalanta bot stopped").await;
    info!("👋 Goodbye");
    Ok(())
}
