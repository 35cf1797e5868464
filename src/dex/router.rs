// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Uniswap-V2 style router/factory exchange.
//!
//! Prices come from pair reserves, swaps go through the router's
//! `swapExactETHForTokens` / `swapExactTokensForETH`.

use super::{DexQuoter, HoneypotReport, SwapCall, SwapParams, HONEYPOT_PROBE_WEI};
use crate::error::QuoteError;
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Minimum base-side depth (whole units) for the honeypot probe to run.
const PROBE_MIN_LIQUIDITY: f64 = 0.1;

/// Deadline offset used for gas estimation calls.
const ESTIMATE_DEADLINE_SECS: u64 = 300;

sol! {
    #[sol(rpc)]
    interface IUniswapV2Router {
        function getAmountsOut(uint256 amountIn, address[] calldata path)
            external view returns (uint256[] memory amounts);

        function swapExactETHForTokens(
            uint256 amountOutMin,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external payable returns (uint256[] memory amounts);

        function swapExactTokensForETH(
            uint256 amountIn,
            uint256 amountOutMin,
            address[] calldata path,
            address to,
            uint256 deadline
        ) external returns (uint256[] memory amounts);
    }
}

sol! {
    #[sol(rpc)]
    interface IUniswapV2Factory {
        function getPair(address tokenA, address tokenB) external view returns (address pair);
    }
}

sol! {
    #[sol(rpc)]
    interface IUniswapV2Pair {
        function token0() external view returns (address);
        function getReserves()
            external
            view
            returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
    }
}

sol! {
    #[sol(rpc)]
    interface IERC20Metadata {
        function symbol() external view returns (string);
    }
}

/// Exchange backed by a V2 router and factory pair.
pub struct UniswapV2Quoter<P> {
    name: String,
    provider: P,
    router: Address,
    factory: Address,
    base: Address,
}

impl<P: Provider + Clone + 'static> UniswapV2Quoter<P> {
    pub fn new(
        name: impl Into<String>,
        provider: P,
        router: Address,
        factory: Address,
        base: Address,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            router,
            factory,
            base,
        }
    }

    /// Returns `(token_reserve, base_reserve)` of the token/base pool.
    async fn reserves(&self, token: Address, base: Address) -> Result<(U256, U256), QuoteError> {
        let factory = IUniswapV2Factory::new(self.factory, &self.provider);
        let pair = factory
            .getPair(token, base)
            .call()
            .await
            .map_err(|e| QuoteError::Rpc(format!("{}: getPair failed: {e}", self.name)))?;
        if pair == Address::ZERO {
            return Err(QuoteError::Unavailable(format!("{}: no pair for {token}", self.name)));
        }

        let pair = IUniswapV2Pair::new(pair, &self.provider);
        let token0_call = pair.token0();
        let reserves_call = pair.getReserves();
        let (token0, reserves) = tokio::join!(token0_call.call(), reserves_call.call());
        let token0 =
            token0.map_err(|e| QuoteError::Rpc(format!("{}: token0 failed: {e}", self.name)))?;
        let reserves = reserves
            .map_err(|e| QuoteError::Rpc(format!("{}: getReserves failed: {e}", self.name)))?;

        let r0 = U256::from(reserves.reserve0.to::<u128>());
        let r1 = U256::from(reserves.reserve1.to::<u128>());
        if token0 == token {
            Ok((r0, r1))
        } else {
            Ok((r1, r0))
        }
    }

    fn swap_call(&self, params: &SwapParams) -> Result<SwapCall, QuoteError> {
        let router = IUniswapV2Router::new(self.router, &self.provider);
        let deadline = U256::from(params.deadline);

        match (params.path.first(), params.path.last()) {
            (Some(first), Some(_)) if *first == self.base && params.path.len() >= 2 => {
                let call = router.swapExactETHForTokens(
                    params.min_out,
                    params.path.clone(),
                    params.to,
                    deadline,
                );
                Ok(SwapCall {
                    to: self.router,
                    value: params.amount_in,
                    data: call.calldata().clone(),
                })
            }
            (Some(_), Some(last)) if *last == self.base && params.path.len() >= 2 => {
                let call = router.swapExactTokensForETH(
                    params.amount_in,
                    params.min_out,
                    params.path.clone(),
                    params.to,
                    deadline,
                );
                Ok(SwapCall {
                    to: self.router,
                    value: U256::ZERO,
                    data: call.calldata().clone(),
                })
            }
            _ => Err(QuoteError::Build(format!(
                "{}: path must start or end with the base token",
                self.name
            ))),
        }
    }
}

#[async_trait]
impl<P: Provider + Clone + 'static> DexQuoter for UniswapV2Quoter<P> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn quote(&self, token: Address, base: Address) -> Result<f64, QuoteError> {
        let (token_reserve, base_reserve) = self.reserves(token, base).await?;
        if token_reserve.is_zero() {
            return Err(QuoteError::Unavailable(format!("{}: empty pool", self.name)));
        }
        Ok(super::wei_to_f64(base_reserve) / super::wei_to_f64(token_reserve))
    }

    async fn liquidity(&self, token: Address) -> Result<f64, QuoteError> {
        let (_, base_reserve) = self.reserves(token, self.base).await?;
        Ok(super::wei_to_f64(base_reserve))
    }

    async fn amounts_out(
        &self,
        amount_in: U256,
        path: &[Address],
    ) -> Result<Vec<U256>, QuoteError> {
        let router = IUniswapV2Router::new(self.router, &self.provider);
        let amounts = router
            .getAmountsOut(amount_in, path.to_vec())
            .call()
            .await
            .map_err(|e| QuoteError::Rpc(format!("{}: getAmountsOut failed: {e}", self.name)))?;
        if amounts.len() < path.len() || amounts.is_empty() {
            return Err(QuoteError::Unavailable(format!(
                "{}: invalid getAmountsOut response",
                self.name
            )));
        }
        Ok(amounts)
    }

    async fn build_swap(&self, params: &SwapParams) -> Result<SwapCall, QuoteError> {
        self.swap_call(params)
    }

    async fn estimate_gas(
        &self,
        amount_in: U256,
        path: &[Address],
        from: Address,
    ) -> Result<u64, QuoteError> {
        let deadline = chrono::Utc::now().timestamp().max(0) as u64 + ESTIMATE_DEADLINE_SECS;
        let call = self.swap_call(&SwapParams {
            amount_in,
            min_out: U256::ZERO,
            path: path.to_vec(),
            to: from,
            deadline,
        })?;

        let tx = TransactionRequest::default()
            .from(from)
            .to(call.to)
            .value(call.value)
            .input(call.data.into());

        let gas = self
            .provider
            .estimate_gas(tx)
            .await
            .map_err(|e| {
                QuoteError::Unavailable(format!("{}: estimateGas failed: {e}", self.name))
            })?;
        debug!("{} gas estimate for {:?}: {}", self.name, path, gas);
        Ok(gas)
    }

    async fn probe_honeypot(&self, token: Address) -> Result<HoneypotReport, QuoteError> {
        match self.liquidity(token).await {
            Ok(depth) if depth >= PROBE_MIN_LIQUIDITY => {}
            Ok(depth) => {
                return Ok(HoneypotReport::inconclusive(format!(
                    "insufficient liquidity ({depth:.4})"
                )))
            }
            Err(e) => return Ok(HoneypotReport::inconclusive(format!("no pool: {e}"))),
        }

        let spent = U256::from(HONEYPOT_PROBE_WEI);
        let bought = match self.amounts_out(spent, &[self.base, token]).await {
            Ok(amounts) => amounts.last().copied().unwrap_or(U256::ZERO),
            Err(e) => {
                warn!("{} honeypot buy simulation failed for {}: {}", self.name, token, e);
                return Ok(HoneypotReport::inconclusive("cannot simulate buy"));
            }
        };
        if bought.is_zero() {
            return Ok(HoneypotReport::inconclusive("buy simulation returned zero"));
        }

        let returned = match self.amounts_out(bought, &[token, self.base]).await {
            Ok(amounts) => amounts.last().copied().unwrap_or(U256::ZERO),
            Err(e) => {
                warn!("{} honeypot sell simulation failed for {}: {}", self.name, token, e);
                return Ok(HoneypotReport::inconclusive("cannot simulate sell"));
            }
        };

        let report = HoneypotReport::from_round_trip(spent, returned);
        debug!(
            "{} honeypot probe {}: loss {:.2}%",
            self.name, token, report.loss_pct
        );
        Ok(report)
    }

    async fn token_symbol(&self, token: Address) -> Option<String> {
        let erc20 = IERC20Metadata::new(token, &self.provider);
        erc20.symbol().call().await.ok()
    }
}
