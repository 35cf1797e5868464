// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Cross-DEX arbitrage detection and auto-execution.

pub mod executor;
pub mod scanner;

pub use executor::{ArbitrageExecutor, ArbitrageSettings};
pub use scanner::{ArbitrageOpportunity, ArbitrageScanner, ScannerConfig, ScannerStatus};
