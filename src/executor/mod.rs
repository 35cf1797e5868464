// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transaction execution module.

pub mod gas;
pub mod pipeline;
pub mod request;

pub use gas::GasSettings;
pub use pipeline::{ExecutionPipeline, PipelineConfig, PipelineStats};
pub use request::{
    CancelOutcome, RequestId, RequestKind, RequestState, RequestStatus, SnipeRequest, SnipeResult,
};
