// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device control adapters

mod dry_run;

pub use dry_run::DryRunDeviceAdapter;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{DeviceCall, FakeDeviceAdapter};

use async_trait::async_trait;
use kw_core::DeviceId;
use thiserror::Error;

/// Errors from device commands
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("device unreachable: {0}")]
    Unreachable(DeviceId),
    #[error("device {device} rejected command: {reason}")]
    Rejected { device: DeviceId, reason: String },
    #[error("device {0} timed out")]
    Timeout(DeviceId),
}

/// Adapter for the command channel to physical locks
///
/// Every method issues exactly one command on the shared device bus.
#[async_trait]
pub trait DeviceAdapter: Clone + Send + Sync + 'static {
    /// Write a code into a slot
    async fn write_code(&self, device: &DeviceId, slot: u8, code: &str) -> Result<(), DeviceError>;

    /// Remove whatever code a slot holds
    async fn clear_code(&self, device: &DeviceId, slot: u8) -> Result<(), DeviceError>;

    /// Whether the device answers at all
    async fn ping(&self, device: &DeviceId) -> bool;

    /// Enable or disable automatic re-locking after the door closes
    async fn set_auto_relock(&self, device: &DeviceId, enabled: bool) -> Result<(), DeviceError>;

    async fn lock(&self, device: &DeviceId) -> Result<(), DeviceError>;

    async fn unlock(&self, device: &DeviceId) -> Result<(), DeviceError>;
}
