// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Execution requests, their lifecycle states and results.

use crate::error::{ErrorClass, SubmitError};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Snipe,
    ArbitrageLeg,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snipe => f.write_str("snipe"),
            Self::ArbitrageLeg => f.write_str("arb"),
        }
    }
}

/// `"{kind}_{requester}_{submitted_at_ms}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A buy of `token` for `amount_in` base units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnipeRequest {
    pub requester: String,
    pub token: Address,
    /// Whole base units.
    pub amount_in: f64,
    pub max_slippage_pct: f64,
    /// Receives the bought tokens and signs the transaction.
    pub wallet: Address,
    pub submitted_at: DateTime<Utc>,
    /// Overrides the shared priority-fee multiplier for this request.
    pub priority_fee_multiplier: Option<f64>,
    /// Exchange to route through; the registry's primary one if unset.
    pub exchange: Option<String>,
    pub kind: RequestKind,
}

impl SnipeRequest {
    pub fn snipe(
        requester: impl Into<String>,
        token: Address,
        amount_in: f64,
        max_slippage_pct: f64,
        wallet: Address,
    ) -> Self {
        Self {
            requester: requester.into(),
            token,
            amount_in,
            max_slippage_pct,
            wallet,
            submitted_at: Utc::now(),
            priority_fee_multiplier: None,
            exchange: None,
            kind: RequestKind::Snipe,
        }
    }

    pub fn id(&self) -> RequestId {
        RequestId(format!(
            "{}_{}_{}",
            self.kind,
            self.requester,
            self.submitted_at.timestamp_millis()
        ))
    }

    pub fn validate(&self) -> Result<(), SubmitError> {
        if self.requester.trim().is_empty() {
            return Err(SubmitError::Invalid("empty requester".into()));
        }
        if self.token == Address::ZERO {
            return Err(SubmitError::Invalid("zero token address".into()));
        }
        if self.wallet == Address::ZERO {
            return Err(SubmitError::Invalid("zero wallet address".into()));
        }
        if !self.amount_in.is_finite() || self.amount_in <= 0.0 {
            return Err(SubmitError::Invalid(format!("amount {}", self.amount_in)));
        }
        if !(0.0..100.0).contains(&self.max_slippage_pct) {
            return Err(SubmitError::Invalid(format!(
                "slippage {}%",
                self.max_slippage_pct
            )));
        }
        if let Some(m) = self.priority_fee_multiplier {
            if !m.is_finite() || m <= 0.0 {
                return Err(SubmitError::Invalid(format!("priority multiplier {m}")));
            }
        }
        Ok(())
    }
}

/// `Submitted → PreflightChecking → {Rejected, Prepared} → AwaitingSignature →
/// {Expired, Signed} → Broadcast → {Confirmed, Failed}`, plus `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Submitted,
    PreflightChecking,
    Rejected,
    Prepared,
    AwaitingSignature,
    Expired,
    Signed,
    Broadcast,
    Confirmed,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Expired | Self::Confirmed | Self::Failed | Self::Cancelled
        )
    }

    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            Self::Submitted | Self::PreflightChecking | Self::AwaitingSignature
        )
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Submitted, PreflightChecking)
                | (PreflightChecking, Rejected | Prepared | Failed)
                | (Prepared, AwaitingSignature | Failed)
                | (AwaitingSignature, Expired | Signed)
                | (Signed, Broadcast | Failed)
                | (Broadcast, Confirmed | Failed)
        ) || (next == Cancelled && self.is_cancellable())
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Transaction waiting for the signer. Gas is priced as a legacy `gasPrice`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnsignedTx {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub chain_id: Option<u64>,
    /// Router deadline embedded in the calldata (unix seconds).
    pub swap_deadline: u64,
}

impl UnsignedTx {
    pub fn to_request(&self) -> TransactionRequest {
        let mut tx = TransactionRequest::default()
            .from(self.from)
            .to(self.to)
            .value(self.value)
            .input(self.data.clone().into())
            .gas_limit(self.gas_limit)
            .gas_price(self.gas_price);
        tx.chain_id = self.chain_id;
        tx
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnipeResult {
    pub success: bool,
    pub tx_hash: Option<B256>,
    pub error_class: Option<ErrorClass>,
    /// Short machine-checkable code, e.g. `honeypot_detected`.
    pub reason: Option<String>,
    pub gas_used: Option<u64>,
    /// Base units.
    pub gas_cost: Option<f64>,
    pub tokens_received: Option<U256>,
    pub realized_slippage_pct: Option<f64>,
    pub duration_ms: u64,
}

impl SnipeResult {
    pub fn failure(class: ErrorClass, reason: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            tx_hash: None,
            error_class: Some(class),
            reason: Some(reason.into()),
            gas_used: None,
            gas_cost: None,
            tokens_received: None,
            realized_slippage_pct: None,
            duration_ms,
        }
    }
}

/// Snapshot of a request returned by `ExecutionPipeline::status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestStatus {
    pub id: RequestId,
    pub state: RequestState,
    pub request: SnipeRequest,
    pub exchange: Option<String>,
    pub unsigned_tx: Option<UnsignedTx>,
    pub signature_deadline: Option<DateTime<Utc>>,
    pub result: Option<SnipeResult>,
    pub trade_id: Option<u64>,
    /// The pipeline stopped while a worker held this request; nothing will
    /// move it further.
    pub interrupted: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotCancellable(RequestState),
    NotFound,
}

/// `quoted × (100 − slippage) / 100`, computed in basis points.
pub fn min_out(quoted: U256, slippage_pct: f64) -> U256 {
    let keep_bps = ((100.0 - slippage_pct) * 100.0).round().clamp(0.0, 10_000.0) as u64;
    quoted * U256::from(keep_bps) / U256::from(10_000u64)
}
