// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serialized access to the shared device command bus

use async_trait::async_trait;
use kw_adapters::{DeviceAdapter, DeviceError};
use kw_core::DeviceId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// One command at a time, with a minimum gap after each completes
#[derive(Debug)]
pub struct CommandGate {
    spacing: Duration,
    last: Mutex<Option<Instant>>,
}

impl CommandGate {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            last: Mutex::new(None),
        }
    }

    /// Run one command once the bus is free and the spacing has elapsed
    pub async fn run<F, T>(&self, command: F) -> T
    where
        F: Future<Output = T>,
    {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + self.spacing).await;
        }
        let output = command.await;
        *last = Some(Instant::now());
        output
    }
}

/// Device adapter whose every command passes through a [`CommandGate`]
#[derive(Clone)]
pub struct GatedDevice<D> {
    inner: D,
    gate: Arc<CommandGate>,
}

impl<D> GatedDevice<D> {
    pub fn new(inner: D, spacing: Duration) -> Self {
        Self {
            inner,
            gate: Arc::new(CommandGate::new(spacing)),
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }
}

#[async_trait]
impl<D: DeviceAdapter> DeviceAdapter for GatedDevice<D> {
    async fn write_code(&self, device: &DeviceId, slot: u8, code: &str) -> Result<(), DeviceError> {
        self.gate
            .run(self.inner.write_code(device, slot, code))
            .await
    }

    async fn clear_code(&self, device: &DeviceId, slot: u8) -> Result<(), DeviceError> {
        self.gate.run(self.inner.clear_code(device, slot)).await
    }

    async fn ping(&self, device: &DeviceId) -> bool {
        self.gate.run(self.inner.ping(device)).await
    }

    async fn set_auto_relock(&self, device: &DeviceId, enabled: bool) -> Result<(), DeviceError> {
        self.gate
            .run(self.inner.set_auto_relock(device, enabled))
            .await
    }

    async fn lock(&self, device: &DeviceId) -> Result<(), DeviceError> {
        self.gate.run(self.inner.lock(device)).await
    }

    async fn unlock(&self, device: &DeviceId) -> Result<(), DeviceError> {
        self.gate.run(self.inner.unlock(device)).await
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
