// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Placeholder for an exchange whose contracts are not known yet.

use super::{DexQuoter, HoneypotReport, SwapCall, SwapParams};
use crate::error::QuoteError;
use alloy::primitives::{Address, U256};
use async_trait::async_trait;

/// Registered under its name but answers `Unavailable` to everything.
pub struct UnconfiguredDex {
    name: String,
}

impl UnconfiguredDex {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn unavailable(&self) -> QuoteError {
        QuoteError::Unavailable(format!("{} is not configured", self.name))
    }
}

#[async_trait]
impl DexQuoter for UnconfiguredDex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn quote(&self, _token: Address, _base: Address) -> Result<f64, QuoteError> {
        Err(self.unavailable())
    }

    async fn liquidity(&self, _token: Address) -> Result<f64, QuoteError> {
        Err(self.unavailable())
    }

    async fn amounts_out(
        &self,
        _amount_in: U256,
        _path: &[Address],
    ) -> Result<Vec<U256>, QuoteError> {
        Err(self.unavailable())
    }

    async fn build_swap(&self, _params: &SwapParams) -> Result<SwapCall, QuoteError> {
        Err(self.unavailable())
    }

    async fn estimate_gas(
        &self,
        _amount_in: U256,
        _path: &[Address],
        _from: Address,
    ) -> Result<u64, QuoteError> {
        Err(self.unavailable())
    }

    async fn probe_honeypot(&self, _token: Address) -> Result<HoneypotReport, QuoteError> {
        Err(self.unavailable())
    }
}
