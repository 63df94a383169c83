// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Durable storage: a JSON-lines write-ahead log and the state it replays into

mod snapshot;
mod state;
mod store;
mod wal;

pub use snapshot::{SnapshotError, StorableState};
pub use state::{MaterializedState, AUDIT_RETENTION};
pub use store::{Store, DEFAULT_COMPACT_AFTER};
pub use wal::{Wal, WalError};
