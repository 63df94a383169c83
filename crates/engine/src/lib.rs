// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Keyward credential engine: timers, slot synchronization and orchestration

mod error;
mod gate;
mod jobs;
mod retry;
mod runtime;
mod sync;

pub use error::RuntimeError;
pub use gate::{CommandGate, GatedDevice};
pub use jobs::{JobHandler, JobRunner};
pub use retry::with_backoff;
pub use runtime::{
    FleetWriteSummary, PollSummary, ResyncSummary, Runtime, RuntimeDeps, SyncStatus,
};
pub use sync::{SweepSummary, SyncFailure, SyncManager};
