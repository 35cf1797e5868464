// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-exchange quoting and swap construction.
//!
//! Every exchange the bot talks to is a [`DexQuoter`]. The scanner, the launch
//! monitor's auto-snipe path and the execution pipeline only ever see the trait,
//! so an exchange that is not wired up yet is just another implementation
//! ([`UnconfiguredDex`]) that reports `Unavailable` everywhere.

pub mod router;
pub mod unconfigured;

pub use router::UniswapV2Quoter;
pub use unconfigured::UnconfiguredDex;

use crate::error::QuoteError;
use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Round-trip loss (percent) above which a token is treated as a honeypot.
pub const HONEYPOT_LOSS_THRESHOLD_PCT: u64 = 10;

/// Base amount used for the honeypot round trip (0.01 in 18-decimal units).
pub const HONEYPOT_PROBE_WEI: u128 = 10_000_000_000_000_000;

/// Inputs for building a swap.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapParams {
    pub amount_in: U256,
    pub min_out: U256,
    pub path: Vec<Address>,
    pub to: Address,
    /// Unix seconds.
    pub deadline: u64,
}

/// Router call produced by [`DexQuoter::build_swap`]. Gas fields are filled
/// in by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapCall {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

/// Outcome of a buy-then-sell simulation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoneypotReport {
    pub is_honeypot: bool,
    pub loss_pct: f64,
    pub reason: String,
}

impl HoneypotReport {
    /// Classify a round trip of `spent` base units that came back as `returned`.
    pub fn from_round_trip(spent: U256, returned: U256) -> Self {
        if spent.is_zero() {
            return Self::inconclusive("zero probe amount");
        }
        let lost = spent.saturating_sub(returned);
        let loss_pct = wei_to_f64(lost) / wei_to_f64(spent) * 100.0;
        let is_honeypot =
            lost * U256::from(100u64) > spent * U256::from(HONEYPOT_LOSS_THRESHOLD_PCT);
        Self {
            is_honeypot,
            loss_pct,
            reason: if is_honeypot {
                format!("high round-trip loss ({loss_pct:.2}%)")
            } else {
                "normal behavior".to_string()
            },
        }
    }

    /// Probe could not run to completion; fail closed.
    pub fn inconclusive(reason: impl Into<String>) -> Self {
        Self {
            is_honeypot: true,
            loss_pct: 100.0,
            reason: reason.into(),
        }
    }
}

/// Quoting and swap-building capability of a single exchange.
#[async_trait]
pub trait DexQuoter: Send + Sync {
    fn name(&self) -> &str;

    /// Price of one `token` expressed in `base`.
    async fn quote(&self, token: Address, base: Address) -> Result<f64, QuoteError>;

    /// Base-side pool depth for `token`, in whole base units.
    async fn liquidity(&self, token: Address) -> Result<f64, QuoteError>;

    async fn amounts_out(&self, amount_in: U256, path: &[Address]) -> Result<Vec<U256>, QuoteError>;

    async fn build_swap(&self, params: &SwapParams) -> Result<SwapCall, QuoteError>;

    async fn estimate_gas(
        &self,
        amount_in: U256,
        path: &[Address],
        from: Address,
    ) -> Result<u64, QuoteError>;

    async fn probe_honeypot(&self, token: Address) -> Result<HoneypotReport, QuoteError>;

    async fn token_symbol(&self, _token: Address) -> Option<String> {
        None
    }
}

/// Registered exchanges, in registration order. The first one is the primary
/// exchange used when a request does not name a target.
#[derive(Clone, Default)]
pub struct DexRegistry {
    dexes: Vec<Arc<dyn DexQuoter>>,
}

impl DexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an exchange. A later registration under the same name replaces
    /// the earlier one in place.
    pub fn register(&mut self, dex: Arc<dyn DexQuoter>) {
        match self.dexes.iter().position(|d| d.name() == dex.name()) {
            Some(idx) => self.dexes[idx] = dex,
            None => self.dexes.push(dex),
        }
    }

    pub fn with(mut self, dex: Arc<dyn DexQuoter>) -> Self {
        self.register(dex);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DexQuoter>> {
        self.dexes.iter().find(|d| d.name() == name).cloned()
    }

    pub fn primary(&self) -> Option<Arc<dyn DexQuoter>> {
        self.dexes.first().cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.dexes.iter().map(|d| d.name().to_string()).collect()
    }

    pub fn all(&self) -> &[Arc<dyn DexQuoter>] {
        &self.dexes
    }

    pub fn len(&self) -> usize {
        self.dexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dexes.is_empty()
    }

    /// Every unordered pair `(i, j)` with `i < j`.
    pub fn pairs(&self) -> Vec<(Arc<dyn DexQuoter>, Arc<dyn DexQuoter>)> {
        let mut out = Vec::new();
        for (i, a) in self.dexes.iter().enumerate() {
            for b in &self.dexes[i + 1..] {
                out.push((Arc::clone(a), Arc::clone(b)));
            }
        }
        out
    }
}

/// 18-decimal fixed point to float.
pub fn wei_to_f64(wei: U256) -> f64 {
    let whole: u128 = (wei / U256::from(1_000_000_000_000_000_000u128)).saturating_to();
    let frac: u128 = (wei % U256::from(1_000_000_000_000_000_000u128)).saturating_to();
    whole as f64 + frac as f64 / 1e18
}

/// Float base amount to 18-decimal fixed point (truncating, like the config helpers).
pub fn to_wei(amount: f64) -> U256 {
    if !amount.is_finite() || amount <= 0.0 {
        return U256::ZERO;
    }
    U256::from((amount * 1e18) as u128)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable in-process exchange used by the component tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct State {
        prices: HashMap<Address, f64>,
        liquidity: HashMap<Address, f64>,
        honeypot_loss: HashMap<Address, f64>,
        gas: Option<u64>,
        fail_build: bool,
        quote_delay: Option<std::time::Duration>,
        built: Vec<SwapParams>,
        estimates: Vec<(U256, Vec<Address>, Address)>,
    }

    pub struct MockDex {
        name: String,
        state: Mutex<State>,
    }

    impl MockDex {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                state: Mutex::new(State {
                    gas: Some(150_000),
                    ..State::default()
                }),
            }
        }

        pub fn with_price(self, token: Address, price: f64) -> Self {
            self.state.lock().prices.insert(token, price);
            self
        }

        pub fn with_liquidity(self, token: Address, base: f64) -> Self {
            self.state.lock().liquidity.insert(token, base);
            self
        }

        pub fn with_honeypot_loss(self, token: Address, loss_pct: f64) -> Self {
            self.state.lock().honeypot_loss.insert(token, loss_pct);
            self
        }

        pub fn with_gas(self, gas: Option<u64>) -> Self {
            self.state.lock().gas = gas;
            self
        }

        pub fn failing_build(self) -> Self {
            self.state.lock().fail_build = true;
            self
        }

        pub fn with_quote_delay(self, delay: std::time::Duration) -> Self {
            self.state.lock().quote_delay = Some(delay);
            self
        }

        pub fn set_price(&self, token: Address, price: f64) {
            self.state.lock().prices.insert(token, price);
        }

        pub fn built(&self) -> Vec<SwapParams> {
            self.state.lock().built.clone()
        }

        pub fn estimates(&self) -> Vec<(U256, Vec<Address>, Address)> {
            self.state.lock().estimates.clone()
        }
    }

    #[async_trait]
    impl DexQuoter for MockDex {
        fn name(&self) -> &str {
            &self.name
        }

        async fn quote(&self, token: Address, _base: Address) -> Result<f64, QuoteError> {
            let delay = self.state.lock().quote_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.state
                .lock()
                .prices
                .get(&token)
                .copied()
                .ok_or_else(|| QuoteError::Unavailable(format!("no pool for {token}")))
        }

        async fn liquidity(&self, token: Address) -> Result<f64, QuoteError> {
            Ok(self.state.lock().liquidity.get(&token).copied().unwrap_or(0.0))
        }

        async fn amounts_out(
            &self,
            amount_in: U256,
            path: &[Address],
        ) -> Result<Vec<U256>, QuoteError> {
            let state = self.state.lock();
            let token = *path.last().ok_or_else(|| QuoteError::Build("empty path".into()))?;
            let price = state
                .prices
                .get(&token)
                .copied()
                .ok_or_else(|| QuoteError::Unavailable("no price".into()))?;
            let out = to_wei(wei_to_f64(amount_in) / price);
            Ok(vec![amount_in, out])
        }

        async fn build_swap(&self, params: &SwapParams) -> Result<SwapCall, QuoteError> {
            let mut state = self.state.lock();
            if state.fail_build {
                return Err(QuoteError::Build("router rejected path".into()));
            }
            state.built.push(params.clone());
            Ok(SwapCall {
                to: Address::repeat_byte(0xee),
                value: params.amount_in,
                data: Bytes::from(vec![0x7f, 0xf3, 0x6a, 0xb5]),
            })
        }

        async fn estimate_gas(
            &self,
            amount_in: U256,
            path: &[Address],
            from: Address,
        ) -> Result<u64, QuoteError> {
            let mut state = self.state.lock();
            state.estimates.push((amount_in, path.to_vec(), from));
            state
                .gas
                .ok_or_else(|| QuoteError::Unavailable("estimate failed".into()))
        }

        async fn probe_honeypot(&self, token: Address) -> Result<HoneypotReport, QuoteError> {
            let loss = self.state.lock().honeypot_loss.get(&token).copied().unwrap_or(1.0);
            let spent = U256::from(HONEYPOT_PROBE_WEI);
            let kept_bps = U256::from(((100.0 - loss) * 100.0).round() as u64);
            let returned = spent * kept_bps / U256::from(10_000u64);
            Ok(HoneypotReport::from_round_trip(spent, returned))
        }

        async fn token_symbol(&self, _token: Address) -> Option<String> {
            Some("MOCK".to_string())
        }
    }
}
