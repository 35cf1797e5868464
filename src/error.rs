// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error types shared across the monitor, scanner and execution pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification attached to every terminal request outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// RPC or subscription hiccup; retried by the owning loop.
    TransientNetwork,
    /// A quote or liquidity call returned nothing usable.
    DataUnavailable,
    /// Liquidity, honeypot or gas ceiling check failed.
    AdmissionRejected,
    /// Transaction construction failed.
    BuildFailure,
    /// Signature deadline elapsed.
    Expired,
    /// Receipt status was not success, or no receipt arrived in time.
    OnChainFailure,
    /// Queue at capacity.
    Overloaded,
    /// Cancelled by the caller or declined by the signer.
    Cancelled,
    /// Unexpected failure inside the pipeline.
    Internal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TransientNetwork => "transient_network",
            Self::DataUnavailable => "data_unavailable",
            Self::AdmissionRejected => "admission_rejected",
            Self::BuildFailure => "build_failure",
            Self::Expired => "expired",
            Self::OnChainFailure => "on_chain_failure",
            Self::Overloaded => "overloaded",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Errors returned by a [`crate::dex::DexQuoter`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QuoteError {
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("build failed: {0}")]
    Build(String),
}

impl QuoteError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable(_) => ErrorClass::DataUnavailable,
            Self::Rpc(_) => ErrorClass::TransientNetwork,
            Self::Build(_) => ErrorClass::BuildFailure,
        }
    }
}

/// Errors from the chain RPC boundary.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("transaction rejected by node: {0}")]
    Rejected(String),
}

/// Errors from the trade store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("trade {0} not found")]
    NotFound(u64),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors surfaced by a pair-created event feed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FeedError {
    /// Connection dropped or the node reported an error; resubscribe.
    #[error("transport: {0}")]
    Transport(String),
    /// A single log could not be decoded; skip it.
    #[error("decode: {0}")]
    Decode(String),
}

/// Reasons `ExecutionPipeline::submit` can refuse a request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SubmitError {
    #[error("execution queue is at capacity")]
    Overloaded,
    #[error("request {0} is already in flight")]
    Duplicate(String),
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl SubmitError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Overloaded => ErrorClass::Overloaded,
            Self::Duplicate(_) | Self::Invalid(_) => ErrorClass::AdmissionRejected,
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(String),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}
