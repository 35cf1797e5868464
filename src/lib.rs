// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Launch sniper, cross-DEX arbitrage scanner and gated execution pipeline.

pub mod arbitrage;
pub mod cache;
pub mod chain;
pub mod config;
pub mod dex;
pub mod error;
pub mod executor;
pub mod listeners;
pub mod signer;
pub mod storage;
pub mod strategies;
pub mod task;
pub mod telegram;
