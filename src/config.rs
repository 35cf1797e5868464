// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Configuration module - loads settings from environment variables.

use crate::arbitrage::{ArbitrageSettings, ScannerConfig};
use crate::error::ConfigError;
use crate::executor::gas::{GasSettings, DEFAULT_MAX_GAS_PRICE, DEFAULT_PRIORITY_FEE_MULTIPLIER};
use crate::executor::pipeline::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use crate::executor::PipelineConfig;
use crate::listeners::MonitorConfig;
use crate::strategies::SniperSettings;
use alloy::primitives::Address;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Exchanges the bot knows by name. Each is wired up only when both its
/// router and factory addresses are configured.
pub const KNOWN_EXCHANGES: [&str; 4] = ["prismfi", "gte", "valhalla", "warpexchange"];

const DEFAULT_ROUTER: &str = "0x8268DC930BA98759E916DEd4c9F367A844814023";
const DEFAULT_FACTORY: &str = "0x53447989580f541bc138d29A0FcCf72AfbBE1355";

/// One exchange entry. Missing addresses mean the exchange is registered but
/// unavailable.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeConfig {
    pub name: String,
    pub router: Option<Address>,
    pub factory: Option<Address>,
}

impl ExchangeConfig {
    pub fn addresses(&self) -> Option<(Address, Address)> {
        self.router.zip(self.factory)
    }
}

/// Main configuration for the bot.
#[derive(Debug, Clone)]
pub struct Config {
    // RPC
    pub rpc_url: String,
    pub ws_url: String,
    pub chain_id: u64,

    // Wallet
    pub wallet_address: Address,
    /// Signs locally when set; otherwise signatures come from the inbox.
    pub private_key: Option<String>,

    // Contracts
    pub base_token: Address,
    /// Primary exchange; the launch monitor watches its factory.
    pub primary_exchange: ExchangeConfig,
    pub extra_exchanges: Vec<ExchangeConfig>,

    // Launch monitor
    pub launch_cache_size: usize,
    pub launch_blacklist: Vec<Address>,
    pub launch_whitelist: Vec<Address>,

    // Sniper
    pub auto_snipe_enabled: bool,
    pub snipe_amount: f64,
    pub snipe_slippage_pct: f64,

    // Arbitrage
    pub arb_tokens: Vec<Address>,
    pub min_profit_pct: f64,
    pub min_executable_profit: f64,
    pub arb_probe_amount: f64,
    pub scan_interval: Duration,
    pub auto_arb_enabled: bool,

    // Execution
    pub workers: usize,
    pub queue_capacity: usize,
    pub signature_timeout: Duration,
    pub receipt_timeout: Duration,
    pub default_gas_limit: u64,
    pub max_gas_price: u128,
    pub priority_fee_multiplier: f64,

    // Persistence and notifications
    pub trades_file: PathBuf,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        let primary_exchange = ExchangeConfig {
            name: env.env_var_or("EXCHANGE_NAME", "kumbaya"),
            router: Some(env.address_or("ROUTER_ADDRESS", DEFAULT_ROUTER)?),
            factory: Some(env.address_or("FACTORY_ADDRESS", DEFAULT_FACTORY)?),
        };
        let mut extra_exchanges = Vec::new();
        for name in KNOWN_EXCHANGES {
            let prefix = name.to_uppercase();
            extra_exchanges.push(ExchangeConfig {
                name: name.to_string(),
                router: env.optional_address(&format!("{prefix}_ROUTER"))?,
                factory: env.optional_address(&format!("{prefix}_FACTORY"))?,
            });
        }

        let max_gas_price_gwei: f64 = env.parsed(
            "MAX_GAS_PRICE_GWEI",
            (DEFAULT_MAX_GAS_PRICE / 1_000_000_000) as f64,
        )?;
        if !(max_gas_price_gwei.is_finite() && max_gas_price_gwei > 0.0) {
            return Err(invalid("MAX_GAS_PRICE_GWEI", "must be positive"));
        }

        let config = Self {
            // RPC
            rpc_url: env.env_var_or("RPC_URL", "https://rpc.megaeth.com"),
            ws_url: env.env_var_or("WS_URL", "wss://ws.megaeth.com"),
            chain_id: env.parsed("CHAIN_ID", 534352)?,

            // Wallet
            wallet_address: parse_address("WALLET_ADDRESS", &env.env_var("WALLET_ADDRESS")?)?,
            private_key: env.optional("PRIVATE_KEY"),

            // Contracts
            base_token: parse_address("BASE_TOKEN_ADDRESS", &env.env_var("BASE_TOKEN_ADDRESS")?)?,
            primary_exchange,
            extra_exchanges,

            // Launch monitor
            launch_cache_size: env.parsed("LAUNCH_CACHE_SIZE", 100)?,
            launch_blacklist: env.address_list("LAUNCH_BLACKLIST")?,
            launch_whitelist: env.address_list("LAUNCH_WHITELIST")?,

            // Sniper
            auto_snipe_enabled: env.parsed("AUTO_SNIPE_ENABLED", false)?,
            snipe_amount: env.parsed("AUTO_SNIPE_AMOUNT", 0.01)?,
            snipe_slippage_pct: env.parsed("AUTO_SNIPE_SLIPPAGE_PCT", 2.0)?,

            // Arbitrage
            arb_tokens: env.address_list("ARB_TOKENS")?,
            min_profit_pct: env.parsed("MIN_PROFIT_PCT", 0.5)?,
            min_executable_profit: env.parsed("MIN_EXECUTABLE_PROFIT", 0.001)?,
            arb_probe_amount: env.parsed("ARB_PROBE_AMOUNT", 0.1)?,
            scan_interval: Duration::from_secs(env.parsed("SCAN_INTERVAL_SECS", 5)?),
            auto_arb_enabled: env.parsed("AUTO_ARB_ENABLED", false)?,

            // Execution
            workers: env.parsed("EXECUTION_WORKERS", DEFAULT_WORKERS)?,
            queue_capacity: env.parsed("EXECUTION_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            signature_timeout: Duration::from_secs(env.parsed("SIGNATURE_TIMEOUT_SECS", 300)?),
            receipt_timeout: Duration::from_secs(env.parsed("RECEIPT_TIMEOUT_SECS", 120)?),
            default_gas_limit: env.parsed("DEFAULT_GAS_LIMIT", 300_000)?,
            max_gas_price: (max_gas_price_gwei * 1e9) as u128,
            priority_fee_multiplier: env.parsed(
                "PRIORITY_FEE_MULTIPLIER",
                DEFAULT_PRIORITY_FEE_MULTIPLIER,
            )?,

            // Persistence and notifications
            trades_file: PathBuf::from(env.env_var_or("TRADES_FILE", "trades.json")),
            telegram_token: env.optional("TELEGRAM_TOKEN"),
            telegram_chat_id: env.optional("TELEGRAM_CHAT_ID"),
            log_level: env.env_var_or("LOG_LEVEL", "info"),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.wallet_address == Address::ZERO {
            return Err(invalid("WALLET_ADDRESS", "zero address"));
        }
        if self.base_token == Address::ZERO {
            return Err(invalid("BASE_TOKEN_ADDRESS", "zero address"));
        }
        if !(self.priority_fee_multiplier.is_finite() && self.priority_fee_multiplier > 0.0) {
            return Err(invalid("PRIORITY_FEE_MULTIPLIER", "must be positive"));
        }
        if !(0.0..100.0).contains(&self.snipe_slippage_pct) {
            return Err(invalid("AUTO_SNIPE_SLIPPAGE_PCT", "must be in [0, 100)"));
        }
        if !(self.snipe_amount > 0.0 && self.arb_probe_amount > 0.0) {
            return Err(invalid("AUTO_SNIPE_AMOUNT/ARB_PROBE_AMOUNT", "must be positive"));
        }
        if self.workers == 0 || self.queue_capacity == 0 {
            return Err(invalid("EXECUTION_WORKERS/EXECUTION_QUEUE_CAPACITY", "must be non-zero"));
        }
        if self.scan_interval.is_zero() {
            return Err(invalid("SCAN_INTERVAL_SECS", "must be non-zero"));
        }
        Ok(())
    }

    /// Primary exchange first, then every extra exchange.
    pub fn exchanges(&self) -> impl Iterator<Item = &ExchangeConfig> {
        std::iter::once(&self.primary_exchange).chain(self.extra_exchanges.iter())
    }

    pub fn monitor_config(&self) -> Option<MonitorConfig> {
        let factory = self.primary_exchange.factory?;
        let mut config = MonitorConfig::new(factory, self.base_token);
        config.cache_size = self.launch_cache_size;
        config.blacklist = self.launch_blacklist.clone();
        config.whitelist = self.launch_whitelist.clone();
        Some(config)
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        let mut config = ScannerConfig::new(self.base_token, self.wallet_address);
        config.min_profit_pct = self.min_profit_pct;
        config.min_executable_profit = self.min_executable_profit;
        config.probe_notional = self.arb_probe_amount;
        config.interval = self.scan_interval;
        config.monitored = self.arb_tokens.clone();
        config
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::new(self.base_token);
        config.workers = self.workers;
        config.queue_capacity = self.queue_capacity;
        config.signature_timeout = self.signature_timeout;
        config.receipt_timeout = self.receipt_timeout;
        config.default_gas_limit = self.default_gas_limit;
        config.chain_id = Some(self.chain_id);
        config
    }

    pub fn gas_settings(&self) -> GasSettings {
        GasSettings::new(self.max_gas_price, self.priority_fee_multiplier)
    }

    pub fn sniper_settings(&self) -> SniperSettings {
        let mut settings = SniperSettings::new(self.wallet_address);
        settings.enabled = self.auto_snipe_enabled;
        settings.amount_in = self.snipe_amount;
        settings.max_slippage_pct = self.snipe_slippage_pct;
        settings
    }

    pub fn arbitrage_settings(&self) -> ArbitrageSettings {
        let mut settings = ArbitrageSettings::new(self.wallet_address);
        settings.enabled = self.auto_arb_enabled;
        settings.amount_in = self.arb_probe_amount;
        settings.max_slippage_pct = self.snipe_slippage_pct;
        settings
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn env_var(&self, name: &str) -> Result<String, ConfigError> {
        self.optional(name)
            .ok_or_else(|| ConfigError::Missing(name.to_string()))
    }

    fn env_var_or(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            Some(raw) => raw
                .parse()
                .map_err(|e: T::Err| invalid(name, &format!("{raw:?}: {e}"))),
            None => Ok(default),
        }
    }

    fn address_or(&self, name: &str, default: &str) -> Result<Address, ConfigError> {
        parse_address(name, &self.env_var_or(name, default))
    }

    fn optional_address(&self, name: &str) -> Result<Option<Address>, ConfigError> {
        self.optional(name)
            .map(|raw| parse_address(name, &raw))
            .transpose()
    }

    /// Comma-separated addresses; empty entries are ignored.
    fn address_list(&self, name: &str) -> Result<Vec<Address>, ConfigError> {
        let Some(raw) = self.optional(name) else {
            return Ok(Vec::new());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| parse_address(name, s))
            .collect()
    }
}

fn parse_address(name: &str, s: &str) -> Result<Address, ConfigError> {
    Address::from_str(s).map_err(|e| invalid(name, &format!("invalid address {s}: {e}")))
}

fn invalid(name: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}
