// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Auto-snipe strategy: turns accepted launches into pipeline requests.

use crate::executor::{ExecutionPipeline, SnipeRequest};
use crate::listeners::{LaunchObserver, TokenLaunchEvent};
use alloy::primitives::Address;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Auto-snipe settings.
#[derive(Debug, Clone)]
pub struct SniperSettings {
    pub enabled: bool,
    /// Base units spent per launch.
    pub amount_in: f64,
    pub max_slippage_pct: f64,
    pub wallet: Address,
    /// Requester name; the token address is appended to keep ids distinct.
    pub requester: String,
    /// Exchange to buy on; the registry's primary one if unset.
    pub exchange: Option<String>,
    pub priority_fee_multiplier: Option<f64>,
}

impl SniperSettings {
    pub fn new(wallet: Address) -> Self {
        Self {
            enabled: false,
            amount_in: 0.01,
            max_slippage_pct: 2.0,
            wallet,
            requester: "auto".to_string(),
            exchange: None,
            priority_fee_multiplier: None,
        }
    }
}

/// Launch observer that submits one buy per new token.
pub struct AutoSniper {
    pipeline: Arc<ExecutionPipeline>,
    settings: SniperSettings,
    sniped: Mutex<HashSet<Address>>,
}

impl AutoSniper {
    pub fn new(pipeline: Arc<ExecutionPipeline>, settings: SniperSettings) -> Self {
        Self {
            pipeline,
            settings,
            sniped: Mutex::new(HashSet::new()),
        }
    }

    /// Build the request for `event`, or `None` if this launch should be skipped.
    pub fn decide(&self, event: &TokenLaunchEvent) -> Option<SnipeRequest> {
        if !self.settings.enabled {
            debug!("Sniper disabled, skipping {}", event.token);
            return None;
        }
        if self.sniped.lock().contains(&event.token) {
            debug!("Already sniped {}, skipping pair {}", event.token, event.pair);
            return None;
        }

        let mut request = SnipeRequest::snipe(
            format!("{}-{}", self.settings.requester, event.token),
            event.token,
            self.settings.amount_in,
            self.settings.max_slippage_pct,
            self.settings.wallet,
        );
        request.exchange = self.settings.exchange.clone();
        request.priority_fee_multiplier = self.settings.priority_fee_multiplier;
        Some(request)
    }

    pub fn sniped_count(&self) -> usize {
        self.sniped.lock().len()
    }
}

#[async_trait]
impl LaunchObserver for AutoSniper {
    fn name(&self) -> &str {
        "auto-sniper"
    }

    async fn notify(&self, event: &TokenLaunchEvent) -> anyhow::Result<()> {
        let Some(request) = self.decide(event) else {
            return Ok(());
        };

        match self.pipeline.submit(request) {
            Ok(id) => {
                self.sniped.lock().insert(event.token);
                info!(
                    "🎯 AUTO-SNIPE queued {} for {} ({:.4} base)",
                    id, event.token, self.settings.amount_in
                );
                Ok(())
            }
            Err(e) => {
                warn!("❌ Auto-snipe of {} refused: {}", event.token, e);
                Err(e.into())
            }
        }
    }
}
