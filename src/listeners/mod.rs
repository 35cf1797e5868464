// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Event listeners for detecting new pairs.

pub mod monitor;
pub mod pair_feed;

pub use monitor::{LaunchMonitor, LaunchObserver, MonitorConfig, MonitorStatus, TokenLaunchEvent};
pub use pair_feed::{PairEventSource, RawPairLog, WsPairFeed};
