// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Trade history persistence and profit logging.

use crate::error::StoreError;
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeType {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Confirmed,
    Failed,
    Expired,
    Cancelled,
}

/// Fields supplied when a trade is first recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrade {
    pub request_id: String,
    pub token: Address,
    pub token_symbol: Option<String>,
    pub trade_type: TradeType,
    /// Base units.
    pub amount_in: f64,
    pub gas_estimate: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub id: u64,
    pub request_id: String,
    pub token: Address,
    pub token_symbol: Option<String>,
    pub trade_type: TradeType,
    pub amount_in: f64,
    pub gas_estimate: u64,
    pub status: TradeStatus,
    pub tx_hash: Option<B256>,
    pub profit_loss: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage used by the execution pipeline. Failures are logged by the caller
/// and never block a request.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn create_trade(&self, trade: NewTrade) -> Result<u64, StoreError>;

    async fn update_trade_status(
        &self,
        id: u64,
        tx_hash: Option<B256>,
        status: TradeStatus,
        profit_loss: Option<f64>,
    ) -> Result<(), StoreError>;
}

/// Trade history kept in memory and mirrored to a JSON file.
#[derive(Debug)]
pub struct JsonTradeStore {
    path: Option<PathBuf>,
    trades: Mutex<Vec<TradeRecord>>,
}

impl JsonTradeStore {
    /// Load from `path`, starting fresh if the file is missing or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let trades = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("Failed to parse {}: {}", path.display(), e);
                Vec::new()
            }),
            Err(_) => {
                info!("No trades history file found, starting fresh");
                Vec::new()
            }
        };

        info!("📊 Loaded {} historical trades", trades.len());
        Self {
            path: Some(path),
            trades: Mutex::new(trades),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            trades: Mutex::new(Vec::new()),
        }
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().clone()
    }

    pub fn get(&self, id: u64) -> Option<TradeRecord> {
        self.trades.lock().iter().find(|t| t.id == id).cloned()
    }

    fn save(&self, trades: &[TradeRecord]) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(trades)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn summary(&self) -> TradeSummary {
        let trades = self.trades.lock();
        let mut summary = TradeSummary::default();
        for trade in trades.iter() {
            match trade.status {
                TradeStatus::Pending => summary.pending += 1,
                TradeStatus::Confirmed => {
                    summary.confirmed += 1;
                    match trade.trade_type {
                        TradeType::Buy => summary.total_bought += trade.amount_in,
                        TradeType::Sell => summary.total_sold += trade.amount_in,
                    }
                }
                TradeStatus::Failed => summary.failed += 1,
                TradeStatus::Expired | TradeStatus::Cancelled => summary.abandoned += 1,
            }
            summary.net_pnl += trade.profit_loss.unwrap_or(0.0);
        }
        summary
    }

    /// Log summary on startup.
    pub fn log_summary(&self) {
        let summary = self.summary();
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("📊 Trade History Summary:");
        info!(
            "   Confirmed: {} ({:.4} bought, {:.4} sold)",
            summary.confirmed, summary.total_bought, summary.total_sold
        );
        info!(
            "   Pending: {}, failed: {}, expired/cancelled: {}",
            summary.pending, summary.failed, summary.abandoned
        );
        info!("   Net P/L: {:.4}", summary.net_pnl);
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }
}

#[async_trait]
impl TradeStore for JsonTradeStore {
    async fn create_trade(&self, trade: NewTrade) -> Result<u64, StoreError> {
        let mut trades = self.trades.lock();
        let id = trades.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        let now = Utc::now();
        info!(
            "📝 Recording {:?} of {} for {:.4} (request {})",
            trade.trade_type,
            trade.token_symbol.as_deref().unwrap_or("?"),
            trade.amount_in,
            trade.request_id
        );
        trades.push(TradeRecord {
            id,
            request_id: trade.request_id,
            token: trade.token,
            token_symbol: trade.token_symbol,
            trade_type: trade.trade_type,
            amount_in: trade.amount_in,
            gas_estimate: trade.gas_estimate,
            status: TradeStatus::Pending,
            tx_hash: None,
            profit_loss: None,
            created_at: now,
            updated_at: now,
        });
        self.save(&trades)?;
        Ok(id)
    }

    async fn update_trade_status(
        &self,
        id: u64,
        tx_hash: Option<B256>,
        status: TradeStatus,
        profit_loss: Option<f64>,
    ) -> Result<(), StoreError> {
        let mut trades = self.trades.lock();
        let trade = trades
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(StoreError::NotFound(id))?;
        trade.status = status;
        if tx_hash.is_some() {
            trade.tx_hash = tx_hash;
        }
        if profit_loss.is_some() {
            trade.profit_loss = profit_loss;
        }
        trade.updated_at = Utc::now();
        self.save(&trades)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeSummary {
    pub total_bought: f64,
    pub total_sold: f64,
    pub net_pnl: f64,
    pub confirmed: usize,
    pub pending: usize,
    pub failed: usize,
    pub abandoned: usize,
}
