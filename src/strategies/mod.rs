// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Trading strategies.

pub mod sniper;

pub use sniper::{AutoSniper, SniperSettings};
