// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Gas pricing for prepared transactions.

use crate::error::ConfigError;
use parking_lot::RwLock;

/// Default ceiling on the network gas price (50 gwei).
pub const DEFAULT_MAX_GAS_PRICE: u128 = 50_000_000_000;

/// Default bump applied to the network gas price.
pub const DEFAULT_PRIORITY_FEE_MULTIPLIER: f64 = 1.2;

/// `min(base × multiplier, ceiling)`, with the multiplier applied in per-mille.
pub fn effective_gas_price(base: u128, multiplier: f64, ceiling: u128) -> u128 {
    let per_mille = if multiplier.is_finite() && multiplier > 0.0 {
        (multiplier * 1000.0).round() as u128
    } else {
        1000
    };
    (base.saturating_mul(per_mille) / 1000).min(ceiling)
}

/// Values read by a worker at the start of a request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasSnapshot {
    pub max_gas_price: u128,
    pub priority_fee_multiplier: f64,
}

/// Process-wide gas settings. Setters affect the next read only.
#[derive(Debug)]
pub struct GasSettings {
    current: RwLock<GasSnapshot>,
}

impl GasSettings {
    pub fn new(max_gas_price: u128, priority_fee_multiplier: f64) -> Self {
        Self {
            current: RwLock::new(GasSnapshot {
                max_gas_price,
                priority_fee_multiplier,
            }),
        }
    }

    pub fn snapshot(&self) -> GasSnapshot {
        *self.current.read()
    }

    pub fn set_max_gas_price(&self, wei: u128) -> Result<(), ConfigError> {
        if wei == 0 {
            return Err(ConfigError::Invalid {
                name: "max_gas_price".into(),
                reason: "must be positive".into(),
            });
        }
        self.current.write().max_gas_price = wei;
        Ok(())
    }

    pub fn set_priority_fee_multiplier(&self, multiplier: f64) -> Result<(), ConfigError> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(ConfigError::Invalid {
                name: "priority_fee_multiplier".into(),
                reason: format!("{multiplier} is not a positive number"),
            });
        }
        self.current.write().priority_fee_multiplier = multiplier;
        Ok(())
    }
}

impl Default for GasSettings {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_GAS_PRICE, DEFAULT_PRIORITY_FEE_MULTIPLIER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GWEI: u128 = 1_000_000_000;

    #[test]
    fn multiplier_is_capped_at_ceiling() {
        assert_eq!(effective_gas_price(10 * GWEI, 1.2, 50 * GWEI), 12 * GWEI);
        assert_eq!(effective_gas_price(45 * GWEI, 1.2, 50 * GWEI), 50 * GWEI);
        assert_eq!(effective_gas_price(10 * GWEI, f64::NAN, 50 * GWEI), 10 * GWEI);
        assert_eq!(effective_gas_price(u128::MAX, 2.0, 50 * GWEI), 50 * GWEI);
    }

    #[test]
    fn setters_validate_and_apply() {
        let settings = GasSettings::default();
        assert_eq!(settings.snapshot().max_gas_price, DEFAULT_MAX_GAS_PRICE);

        settings.set_max_gas_price(30 * GWEI).unwrap();
        settings.set_priority_fee_multiplier(1.5).unwrap();
        assert!(settings.set_max_gas_price(0).is_err());
        assert!(settings.set_priority_fee_multiplier(-1.0).is_err());

        let snap = settings.snapshot();
        assert_eq!(snap.max_gas_price, 30 * GWEI);
        assert_eq!(snap.priority_fee_multiplier, 1.5);
    }
}
