// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Keyward daemon: loads the property configuration, restores state and
//! runs the credential engine until signalled

pub mod lifecycle;

pub use lifecycle::{startup, Config, DaemonRuntime, DaemonState, LifecycleError};
