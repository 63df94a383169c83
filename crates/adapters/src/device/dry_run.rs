// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dry-run device adapter for deployments without a transport.

use super::{DeviceAdapter, DeviceError};
use async_trait::async_trait;
use kw_core::DeviceId;

/// Device adapter that accepts every command without sending it.
///
/// Codes are never logged in full; only their length is.
#[derive(Clone, Copy, Debug, Default)]
pub struct DryRunDeviceAdapter;

impl DryRunDeviceAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeviceAdapter for DryRunDeviceAdapter {
    async fn write_code(&self, device: &DeviceId, slot: u8, code: &str) -> Result<(), DeviceError> {
        tracing::info!(%device, slot, code_len = code.len(), "dry run: write code");
        Ok(())
    }

    async fn clear_code(&self, device: &DeviceId, slot: u8) -> Result<(), DeviceError> {
        tracing::info!(%device, slot, "dry run: clear code");
        Ok(())
    }

    async fn ping(&self, _device: &DeviceId) -> bool {
        true
    }

    async fn set_auto_relock(&self, device: &DeviceId, enabled: bool) -> Result<(), DeviceError> {
        tracing::info!(%device, enabled, "dry run: auto relock");
        Ok(())
    }

    async fn lock(&self, device: &DeviceId) -> Result<(), DeviceError> {
        tracing::info!(%device, "dry run: lock");
        Ok(())
    }

    async fn unlock(&self, device: &DeviceId) -> Result<(), DeviceError> {
        tracing::info!(%device, "dry run: unlock");
        Ok(())
    }
}
