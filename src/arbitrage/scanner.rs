// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Arbitrage opportunity scanner.
//!
//! Every pass quotes each monitored token on every unordered pair of
//! registered exchanges and records spreads that clear the configured
//! threshold, together with a net-of-gas profit estimate on a fixed probe
//! notional.

use crate::cache::BoundedCache;
use crate::chain::ChainClient;
use crate::dex::{to_wei, DexQuoter, DexRegistry};
use crate::error::ErrorClass;
use crate::task::{next_backoff, LoopHandle, Shutdown};
use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Gas units assumed per leg when no estimate is available.
pub const DEFAULT_GAS_LIMIT: u64 = 300_000;

/// Gas price assumed when the node cannot be asked (10 gwei).
pub const FALLBACK_GAS_PRICE: u128 = 10_000_000_000;

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub base_token: Address,
    /// Sender used for both legs' gas estimates.
    pub wallet: Address,
    /// Minimum spread, in percent, for an opportunity to be recorded.
    pub min_profit_pct: f64,
    /// Absolute net profit, in base units, above which an opportunity is executable.
    pub min_executable_profit: f64,
    /// Base amount both legs are estimated for.
    pub probe_notional: f64,
    pub interval: Duration,
    pub cache_size: usize,
    pub monitored: Vec<Address>,
    pub backoff_max: Duration,
    pub stop_grace: Duration,
}

impl ScannerConfig {
    pub fn new(base_token: Address, wallet: Address) -> Self {
        Self {
            base_token,
            wallet,
            min_profit_pct: 0.5,
            min_executable_profit: 0.001,
            probe_notional: 0.1,
            interval: Duration::from_secs(5),
            cache_size: 100,
            monitored: Vec::new(),
            backoff_max: Duration::from_secs(60),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// A recorded cross-exchange spread. The buy exchange always has the lower quote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbitrageOpportunity {
    pub token: Address,
    pub symbol: Option<String>,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub profit_pct: f64,
    pub gas_estimate: u64,
    /// `false` when either leg's estimate failed and a default was used.
    pub gas_estimate_reliable: bool,
    pub gas_cost: f64,
    pub net_profit: f64,
    pub executable: bool,
    pub discovered_at: DateTime<Utc>,
}

/// `|a - b| / min(a, b) * 100`, or `None` unless both quotes are positive.
pub fn spread_pct(price_a: f64, price_b: f64) -> Option<f64> {
    if !(price_a > 0.0 && price_b > 0.0) || !price_a.is_finite() || !price_b.is_finite() {
        return None;
    }
    Some((price_a - price_b).abs() / price_a.min(price_b) * 100.0)
}

/// Gross spread on `notional` minus gas.
pub fn net_profit(buy_price: f64, sell_price: f64, notional: f64, gas_cost: f64) -> f64 {
    (sell_price - buy_price) * notional - gas_cost
}

/// Gas units at `gas_price` wei, in whole base units.
pub fn gas_cost_in_base(gas_units: u64, gas_price: u128) -> f64 {
    gas_units as f64 * gas_price as f64 / 1e18
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannerStatus {
    pub running: bool,
    pub exchanges: Vec<String>,
    pub monitored_tokens: usize,
    pub cached_opportunities: usize,
    pub cache_capacity: usize,
    pub interval_secs: u64,
}

/// Tally of a single pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub combinations: usize,
    pub skipped: usize,
    pub transient_errors: usize,
    pub recorded: usize,
}

struct Inner {
    registry: DexRegistry,
    chain: Arc<dyn ChainClient>,
    config: ScannerConfig,
    monitored: RwLock<Vec<Address>>,
    opportunities: BoundedCache<ArbitrageOpportunity>,
    sink: Option<mpsc::Sender<ArbitrageOpportunity>>,
}

/// Polls registered exchanges for price spreads.
pub struct ArbitrageScanner {
    inner: Arc<Inner>,
    task: LoopHandle,
}

impl ArbitrageScanner {
    pub fn new(registry: DexRegistry, chain: Arc<dyn ChainClient>, config: ScannerConfig) -> Self {
        Self::build(registry, chain, config, None)
    }

    /// Executable opportunities are also offered to `sink` (dropped if it is full).
    pub fn with_sink(
        registry: DexRegistry,
        chain: Arc<dyn ChainClient>,
        config: ScannerConfig,
        sink: mpsc::Sender<ArbitrageOpportunity>,
    ) -> Self {
        Self::build(registry, chain, config, Some(sink))
    }

    fn build(
        registry: DexRegistry,
        chain: Arc<dyn ChainClient>,
        config: ScannerConfig,
        sink: Option<mpsc::Sender<ArbitrageOpportunity>>,
    ) -> Self {
        let mut monitored = Vec::new();
        for token in &config.monitored {
            if !monitored.contains(token) {
                monitored.push(*token);
            }
        }
        Self {
            inner: Arc::new(Inner {
                registry,
                chain,
                opportunities: BoundedCache::new(config.cache_size),
                monitored: RwLock::new(monitored),
                config,
                sink,
            }),
            task: LoopHandle::new("arbitrage scanner"),
        }
    }

    pub fn start(&self) -> bool {
        let inner = Arc::clone(&self.inner);
        self.task.start(move |shutdown| run(inner, shutdown))
    }

    pub async fn stop(&self) -> bool {
        self.task.stop(self.inner.config.stop_grace).await
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Run one pass now and return what it recorded.
    pub async fn scan_once(&self) -> Vec<ArbitrageOpportunity> {
        self.inner.scan_pass().await.1
    }

    /// The last `limit` opportunities, newest last.
    pub fn recent_opportunities(&self, limit: usize) -> Vec<ArbitrageOpportunity> {
        self.inner.opportunities.recent(limit)
    }

    /// Highest net profit among executable entries; the earliest wins ties.
    pub fn best_opportunity(&self) -> Option<ArbitrageOpportunity> {
        let mut best: Option<ArbitrageOpportunity> = None;
        for opp in self.inner.opportunities.snapshot() {
            if !opp.executable {
                continue;
            }
            if best.as_ref().map_or(true, |b| opp.net_profit > b.net_profit) {
                best = Some(opp);
            }
        }
        best
    }

    /// Takes effect from the next pass.
    pub fn add_monitor_token(&self, token: Address) -> bool {
        let mut monitored = self.inner.monitored.write();
        if monitored.contains(&token) {
            return false;
        }
        monitored.push(token);
        info!("👀 Monitoring {} for arbitrage", token);
        true
    }

    pub fn remove_monitor_token(&self, token: Address) -> bool {
        let mut monitored = self.inner.monitored.write();
        let before = monitored.len();
        monitored.retain(|t| *t != token);
        monitored.len() != before
    }

    pub fn monitored_tokens(&self) -> Vec<Address> {
        self.inner.monitored.read().clone()
    }

    pub fn clear_cache(&self) {
        self.inner.opportunities.clear();
        info!("🧹 Opportunity cache cleared");
    }

    pub fn status(&self) -> ScannerStatus {
        ScannerStatus {
            running: self.is_running(),
            exchanges: self.inner.registry.names(),
            monitored_tokens: self.inner.monitored.read().len(),
            cached_opportunities: self.inner.opportunities.len(),
            cache_capacity: self.inner.opportunities.capacity(),
            interval_secs: self.inner.config.interval.as_secs(),
        }
    }
}

impl Inner {
    async fn scan_pass(&self) -> (PassReport, Vec<ArbitrageOpportunity>) {
        let tokens = self.monitored.read().clone();
        let pairs = self.registry.pairs();
        let mut report = PassReport::default();
        let mut found = Vec::new();

        for (dex_a, dex_b) in &pairs {
            for token in &tokens {
                report.combinations += 1;
                match self.check(dex_a, dex_b, *token).await {
                    Ok(Some(opp)) => found.push(opp),
                    Ok(None) => {}
                    Err(class) => {
                        report.skipped += 1;
                        if class == ErrorClass::TransientNetwork {
                            report.transient_errors += 1;
                        }
                    }
                }
            }
        }

        for opp in &found {
            self.opportunities.push(opp.clone());
            if opp.executable {
                info!(
                    "💰 ARB FOUND: {} buy on {} @ {:.8}, sell on {} @ {:.8} ({:.2}%, net {:.6})",
                    opp.symbol.as_deref().unwrap_or("?"),
                    opp.buy_exchange,
                    opp.buy_price,
                    opp.sell_exchange,
                    opp.sell_price,
                    opp.profit_pct,
                    opp.net_profit
                );
                if let Some(sink) = &self.sink {
                    if let Err(e) = sink.try_send(opp.clone()) {
                        warn!("Dropping opportunity for {}: {}", opp.token, e);
                    }
                }
            }
        }
        report.recorded = found.len();
        debug!("Scan pass: {:?}", report);
        (report, found)
    }

    /// `Err` carries the class of the quote failure that skipped this combination.
    async fn check(
        &self,
        dex_a: &Arc<dyn DexQuoter>,
        dex_b: &Arc<dyn DexQuoter>,
        token: Address,
    ) -> Result<Option<ArbitrageOpportunity>, ErrorClass> {
        let base = self.config.base_token;
        let (quote_a, quote_b) = tokio::join!(dex_a.quote(token, base), dex_b.quote(token, base));
        let price_a = quote_a.map_err(|e| {
            debug!("{} quote for {} unavailable: {}", dex_a.name(), token, e);
            e.class()
        })?;
        let price_b = quote_b.map_err(|e| {
            debug!("{} quote for {} unavailable: {}", dex_b.name(), token, e);
            e.class()
        })?;

        let Some(profit_pct) = spread_pct(price_a, price_b) else {
            return Err(ErrorClass::DataUnavailable);
        };
        if profit_pct < self.config.min_profit_pct {
            return Ok(None);
        }

        let (buy, sell, buy_price, sell_price) = if price_a <= price_b {
            (dex_a, dex_b, price_a, price_b)
        } else {
            (dex_b, dex_a, price_b, price_a)
        };

        let (gas_estimate, gas_estimate_reliable) =
            self.estimate_round_trip_gas(buy, sell, token).await;
        let gas_price = match self.chain.gas_price().await {
            Ok(price) => price,
            Err(e) => {
                warn!("Gas price unavailable ({}), assuming {} wei", e, FALLBACK_GAS_PRICE);
                FALLBACK_GAS_PRICE
            }
        };
        let gas_cost = gas_cost_in_base(gas_estimate, gas_price);
        let net = net_profit(buy_price, sell_price, self.config.probe_notional, gas_cost);

        Ok(Some(ArbitrageOpportunity {
            token,
            symbol: buy.token_symbol(token).await,
            buy_exchange: buy.name().to_string(),
            sell_exchange: sell.name().to_string(),
            buy_price,
            sell_price,
            profit_pct,
            gas_estimate,
            gas_estimate_reliable,
            gas_cost,
            net_profit: net,
            executable: net > self.config.min_executable_profit,
            discovered_at: Utc::now(),
        }))
    }

    /// Buy-leg plus sell-leg gas. The sell leg is estimated for the amount the
    /// buy leg would actually return.
    async fn estimate_round_trip_gas(
        &self,
        buy: &Arc<dyn DexQuoter>,
        sell: &Arc<dyn DexQuoter>,
        token: Address,
    ) -> (u64, bool) {
        let base = self.config.base_token;
        let wallet = self.config.wallet;
        let amount_in = to_wei(self.config.probe_notional);
        let buy_path = [base, token];
        let sell_path = [token, base];

        let (buy_gas, bought) = tokio::join!(
            buy.estimate_gas(amount_in, &buy_path, wallet),
            buy.amounts_out(amount_in, &buy_path)
        );

        let sell_gas = match bought {
            Ok(amounts) => match amounts.last().copied().filter(|a| *a > U256::ZERO) {
                Some(tokens_out) => sell.estimate_gas(tokens_out, &sell_path, wallet).await.ok(),
                None => None,
            },
            Err(e) => {
                debug!("{} amounts_out for {} failed: {}", buy.name(), token, e);
                None
            }
        };
        let buy_gas = buy_gas.ok();

        let reliable = buy_gas.is_some() && sell_gas.is_some();
        let total = buy_gas.unwrap_or(0) + sell_gas.unwrap_or(0);
        if total == 0 {
            (DEFAULT_GAS_LIMIT * 2, false)
        } else if reliable {
            (total, true)
        } else {
            (total.max(DEFAULT_GAS_LIMIT), false)
        }
    }
}

async fn run(inner: Arc<Inner>, mut shutdown: Shutdown) {
    info!(
        "🔍 Arbitrage scanner running ({:?} interval, {} exchanges)",
        inner.config.interval,
        inner.registry.len()
    );
    let mut backoff = inner.config.interval;

    loop {
        let Some((report, _)) = shutdown.race(inner.scan_pass()).await else {
            break;
        };

        // A pass in which every combination failed on the network backs off.
        let delay = if report.combinations > 0 && report.transient_errors == report.combinations {
            backoff = next_backoff(backoff, inner.config.backoff_max.max(inner.config.interval));
            warn!("Every quote failed this pass, next pass in {:?}", backoff);
            backoff
        } else {
            backoff = inner.config.interval;
            inner.config.interval
        };

        if !shutdown.sleep(delay).await {
            break;
        }
    }
    debug!("Arbitrage scanner loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChain;
    use crate::dex::testing::MockDex;
    use crate::dex::UnconfiguredDex;

    const GWEI: u128 = 1_000_000_000;

    fn base() -> Address {
        Address::repeat_byte(0xbb)
    }

    fn wallet() -> Address {
        Address::repeat_byte(0x77)
    }

    fn token() -> Address {
        Address::repeat_byte(0x01)
    }

    fn config(tokens: Vec<Address>) -> ScannerConfig {
        ScannerConfig {
            monitored: tokens,
            interval: Duration::from_millis(10),
            cache_size: 10,
            ..ScannerConfig::new(base(), wallet())
        }
    }

    fn shared(dex: &Arc<MockDex>) -> Arc<dyn DexQuoter> {
        dex.clone()
    }

    fn priced(name: &str, price: f64, gas: Option<u64>) -> Arc<dyn DexQuoter> {
        Arc::new(MockDex::new(name).with_price(token(), price).with_gas(gas))
    }

    fn scanner(
        dexes: Vec<Arc<dyn DexQuoter>>,
        gas_price: u128,
        cfg: ScannerConfig,
    ) -> ArbitrageScanner {
        let mut registry = DexRegistry::new();
        for dex in dexes {
            registry.register(dex);
        }
        ArbitrageScanner::new(registry, Arc::new(MockChain::new(gas_price)), cfg)
    }

    #[test]
    fn spread_is_relative_to_cheaper_quote() {
        let cases: [(f64, f64); 4] =
            [(1.0, 1.05), (1.05, 1.0), (0.002, 0.0031), (42.0, 41.5)];
        for (a, b) in cases {
            let expected = (a - b).abs() / a.min(b) * 100.0;
            assert_eq!(spread_pct(a, b), Some(expected));
            assert_eq!(spread_pct(a, b), spread_pct(b, a));
        }
        assert_eq!(spread_pct(0.0, 1.0), None);
        assert_eq!(spread_pct(1.0, -1.0), None);
        assert_eq!(spread_pct(f64::NAN, 1.0), None);
    }

    #[tokio::test]
    async fn scenario_a_cheap_exchange_is_buy_side() {
        // 2 x 125k gas at 2 gwei = 0.0005 base.
        let x = priced("x", 1.00, Some(125_000));
        let y = priced("y", 1.05, Some(125_000));
        let scanner = scanner(vec![y, x], 2 * GWEI, config(vec![token()]));

        let found = scanner.scan_once().await;
        assert_eq!(found.len(), 1);
        let opp = &found[0];
        assert_eq!(opp.buy_exchange, "x");
        assert_eq!(opp.sell_exchange, "y");
        assert!(opp.buy_price < opp.sell_price);
        assert!((opp.profit_pct - 5.0).abs() < 1e-9);
        assert_eq!(opp.gas_estimate, 250_000);
        assert!(opp.gas_estimate_reliable);
        assert!((opp.gas_cost - 0.0005).abs() < 1e-12);
        assert!((opp.net_profit - 0.0045).abs() < 1e-9);
        assert!(opp.executable);
        assert_eq!(opp.symbol.as_deref(), Some("MOCK"));
    }

    #[tokio::test]
    async fn executable_tracks_threshold_exactly() {
        for (threshold, expect) in [(0.001, true), (0.0044, true), (0.005, false)] {
            let x = priced("x", 1.00, Some(125_000));
            let y = priced("y", 1.05, Some(125_000));
            let cfg = ScannerConfig {
                min_executable_profit: threshold,
                ..config(vec![token()])
            };
            let scanner = scanner(vec![x, y], 2 * GWEI, cfg);
            let opp = scanner.scan_once().await.remove(0);
            assert_eq!(opp.executable, expect, "threshold {threshold}");
            assert_eq!(opp.executable, opp.net_profit > threshold);
        }
    }

    #[tokio::test]
    async fn spreads_below_threshold_are_not_recorded() {
        let x: Arc<dyn DexQuoter> = Arc::new(MockDex::new("x").with_price(token(), 1.000));
        let y: Arc<dyn DexQuoter> = Arc::new(MockDex::new("y").with_price(token(), 1.004));
        let scanner = scanner(vec![x, y], GWEI, config(vec![token()]));

        assert!(scanner.scan_once().await.is_empty());
        assert!(scanner.recent_opportunities(10).is_empty());
    }

    #[tokio::test]
    async fn unavailable_exchange_skips_only_its_combinations() {
        let x: Arc<dyn DexQuoter> = Arc::new(MockDex::new("x").with_price(token(), 1.0));
        let y: Arc<dyn DexQuoter> = Arc::new(MockDex::new("y").with_price(token(), 1.2));
        let z: Arc<dyn DexQuoter> = Arc::new(UnconfiguredDex::new("z"));
        let other = Address::repeat_byte(0x02);
        let scanner = scanner(vec![x, y, z], GWEI, config(vec![other, token()]));

        let (report, found) = scanner.inner.scan_pass().await;
        assert_eq!(report.combinations, 6);
        assert_eq!(report.skipped, 5);
        assert_eq!(report.transient_errors, 0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].token, token());
    }

    #[tokio::test]
    async fn sell_leg_gas_uses_buy_output_and_wallet() {
        let x = Arc::new(MockDex::new("x").with_price(token(), 0.5));
        let y = Arc::new(MockDex::new("y").with_price(token(), 0.6));
        let scanner = scanner(vec![shared(&x), shared(&y)], GWEI, config(vec![token()]));
        scanner.scan_once().await;

        let buy_calls = x.estimates();
        assert_eq!(buy_calls.len(), 1);
        assert_eq!(buy_calls[0].0, to_wei(0.1));
        assert_eq!(buy_calls[0].1, vec![base(), token()]);
        assert_eq!(buy_calls[0].2, wallet());

        let sell_calls = y.estimates();
        assert_eq!(sell_calls.len(), 1);
        assert_eq!(sell_calls[0].0, to_wei(0.2));
        assert_eq!(sell_calls[0].1, vec![token(), base()]);
        assert_eq!(sell_calls[0].2, wallet());
    }

    #[tokio::test]
    async fn failed_gas_estimate_is_flagged() {
        let x = priced("x", 1.0, None);
        let y = priced("y", 1.1, None);
        let scanner = scanner(vec![x, y], GWEI, config(vec![token()]));

        let opp = scanner.scan_once().await.remove(0);
        assert!(!opp.gas_estimate_reliable);
        assert_eq!(opp.gas_estimate, DEFAULT_GAS_LIMIT * 2);
    }

    #[tokio::test]
    async fn best_opportunity_prefers_profit_then_earliest() {
        let t2 = Address::repeat_byte(0x02);
        let t3 = Address::repeat_byte(0x03);
        let x = Arc::new(
            MockDex::new("x")
                .with_price(token(), 1.0)
                .with_price(t2, 1.0)
                .with_price(t3, 1.0),
        );
        let y = Arc::new(
            MockDex::new("y")
                .with_price(token(), 1.1)
                .with_price(t2, 1.1)
                .with_price(t3, 1.006),
        );
        let scanner = scanner(vec![shared(&x), shared(&y)], GWEI, config(vec![token(), t2, t3]));
        assert!(scanner.best_opportunity().is_none());

        let found = scanner.scan_once().await;
        assert_eq!(found.len(), 3);
        assert!(!found[2].executable);

        let best = scanner.best_opportunity().unwrap();
        assert_eq!(best.token, token());
        assert_eq!(best.net_profit, found[1].net_profit);
    }

    #[tokio::test]
    async fn opportunity_cache_is_bounded() {
        let x = Arc::new(MockDex::new("x").with_price(token(), 1.0));
        let y = Arc::new(MockDex::new("y").with_price(token(), 1.1));
        let cfg = ScannerConfig {
            cache_size: 3,
            ..config(vec![token()])
        };
        let scanner = scanner(vec![shared(&x), shared(&y)], GWEI, cfg);
        for i in 0..5 {
            y.set_price(token(), 1.1 + i as f64 * 0.01);
            scanner.scan_once().await;
        }
        let prices: Vec<f64> = scanner
            .recent_opportunities(10)
            .iter()
            .map(|o| o.sell_price)
            .collect();
        assert_eq!(prices.len(), 3);
        assert!((prices[0] - 1.12).abs() < 1e-9);
        assert!((prices[2] - 1.14).abs() < 1e-9);

        scanner.clear_cache();
        assert_eq!(scanner.status().cached_opportunities, 0);
    }

    #[tokio::test]
    async fn monitored_set_is_snapshotted_per_pass() {
        let x = Arc::new(
            MockDex::new("x")
                .with_price(token(), 1.0)
                .with_quote_delay(Duration::from_millis(50)),
        );
        let y = Arc::new(MockDex::new("y").with_price(token(), 1.1));
        let late = Address::repeat_byte(0x09);
        x.set_price(late, 1.0);
        y.set_price(late, 1.1);

        let scanner = Arc::new(scanner(vec![shared(&x), shared(&y)], GWEI, config(vec![token()])));
        let pass = {
            let scanner = Arc::clone(&scanner);
            tokio::spawn(async move { scanner.scan_once().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(scanner.add_monitor_token(late));
        assert!(!scanner.add_monitor_token(late));

        let found = pass.await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].token, token());

        let next = scanner.scan_once().await;
        assert_eq!(next.len(), 2);

        assert!(scanner.remove_monitor_token(late));
        assert_eq!(scanner.monitored_tokens(), vec![token()]);
    }

    #[tokio::test]
    async fn loop_feeds_sink_until_stopped() {
        let x: Arc<dyn DexQuoter> = Arc::new(MockDex::new("x").with_price(token(), 1.0));
        let y: Arc<dyn DexQuoter> = Arc::new(MockDex::new("y").with_price(token(), 1.1));
        let (tx, mut rx) = mpsc::channel(16);
        let registry = DexRegistry::new().with(x).with(y);
        let scanner = ArbitrageScanner::with_sink(
            registry,
            Arc::new(MockChain::new(GWEI)),
            config(vec![token()]),
            tx,
        );

        assert!(scanner.start());
        assert!(!scanner.start());
        let opp = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(opp.executable);
        assert!(scanner.status().running);

        assert!(scanner.stop().await);
        assert!(!scanner.status().running);
    }
}
