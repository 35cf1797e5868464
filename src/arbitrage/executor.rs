// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Arbitrage auto-execution: submits the buy leg of executable opportunities.

use crate::arbitrage::ArbitrageOpportunity;
use crate::executor::{ExecutionPipeline, RequestKind, SnipeRequest};
use crate::task::{LoopHandle, Shutdown};
use alloy::primitives::Address;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ArbitrageSettings {
    pub enabled: bool,
    /// Base units spent on the buy leg.
    pub amount_in: f64,
    pub max_slippage_pct: f64,
    pub wallet: Address,
    /// Minimum time between two submissions for the same token.
    pub cooldown: Duration,
    pub stop_grace: Duration,
}

impl ArbitrageSettings {
    pub fn new(wallet: Address) -> Self {
        Self {
            enabled: false,
            amount_in: 0.1,
            max_slippage_pct: 2.0,
            wallet,
            cooldown: Duration::from_secs(60),
            stop_grace: Duration::from_secs(5),
        }
    }
}

struct Inner {
    pipeline: Arc<ExecutionPipeline>,
    settings: ArbitrageSettings,
    opportunities: tokio::sync::Mutex<mpsc::Receiver<ArbitrageOpportunity>>,
    last_submitted: Mutex<HashMap<Address, Instant>>,
}

/// Consumes the scanner's opportunity channel.
pub struct ArbitrageExecutor {
    inner: Arc<Inner>,
    task: LoopHandle,
}

impl ArbitrageExecutor {
    pub fn new(
        pipeline: Arc<ExecutionPipeline>,
        settings: ArbitrageSettings,
        opportunities: mpsc::Receiver<ArbitrageOpportunity>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pipeline,
                settings,
                opportunities: tokio::sync::Mutex::new(opportunities),
                last_submitted: Mutex::new(HashMap::new()),
            }),
            task: LoopHandle::new("arbitrage executor"),
        }
    }

    pub fn start(&self) -> bool {
        let inner = Arc::clone(&self.inner);
        self.task.start(move |shutdown| run(inner, shutdown))
    }

    pub async fn stop(&self) -> bool {
        self.task.stop(self.inner.settings.stop_grace).await
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Submit the buy leg of `opp`. Returns `true` if a request was queued.
    pub fn execute(&self, opp: &ArbitrageOpportunity) -> bool {
        self.inner.execute(opp)
    }
}

impl Inner {
    fn execute(&self, opp: &ArbitrageOpportunity) -> bool {
        if !self.settings.enabled || !opp.executable {
            return false;
        }
        if let Some(at) = self.last_submitted.lock().get(&opp.token) {
            if at.elapsed() < self.settings.cooldown {
                debug!("{} still cooling down, skipping opportunity", opp.token);
                return false;
            }
        }

        let mut request = SnipeRequest::snipe(
            format!("{}-{}", opp.buy_exchange, opp.token),
            opp.token,
            self.settings.amount_in,
            self.settings.max_slippage_pct,
            self.settings.wallet,
        );
        request.kind = RequestKind::ArbitrageLeg;
        request.exchange = Some(opp.buy_exchange.clone());

        match self.pipeline.submit(request) {
            Ok(id) => {
                self.last_submitted.lock().insert(opp.token, Instant::now());
                info!(
                    "⚡ Executing arbitrage buy leg {}: {} on {} (net {:.6})",
                    id,
                    opp.symbol.as_deref().unwrap_or("?"),
                    opp.buy_exchange,
                    opp.net_profit
                );
                true
            }
            Err(e) => {
                warn!("Arbitrage leg for {} refused: {}", opp.token, e);
                false
            }
        }
    }
}

async fn run(inner: Arc<Inner>, mut shutdown: Shutdown) {
    loop {
        let next = shutdown
            .race(async { inner.opportunities.lock().await.recv().await })
            .await;
        match next {
            Some(Some(opp)) => {
                inner.execute(&opp);
            }
            Some(None) => {
                info!("Opportunity channel closed");
                break;
            }
            None => break,
        }
    }
}
