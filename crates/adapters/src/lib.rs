// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Adapters for external I/O: lock devices, reservation sources, operator alerts

pub mod device;
pub mod notify;
pub mod source;
pub mod traced;

pub use device::{DeviceAdapter, DeviceError, DryRunDeviceAdapter};
pub use notify::{LogNotifyAdapter, NotifyAdapter, NotifyError};
pub use source::{JsonFileSource, ReservationSource, SourceError};
pub use traced::{TracedDeviceAdapter, TracedReservationSource};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use device::{DeviceCall, FakeDeviceAdapter};
#[cfg(any(test, feature = "test-support"))]
pub use notify::{FakeNotifyAdapter, NotifyCall};
#[cfg(any(test, feature = "test-support"))]
pub use source::FakeReservationSource;
