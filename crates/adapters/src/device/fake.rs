// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake device adapter for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{DeviceAdapter, DeviceError};
use async_trait::async_trait;
use kw_core::DeviceId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Recorded device command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    WriteCode {
        device: DeviceId,
        slot: u8,
        code: String,
    },
    ClearCode {
        device: DeviceId,
        slot: u8,
    },
    Ping {
        device: DeviceId,
    },
    SetAutoRelock {
        device: DeviceId,
        enabled: bool,
    },
    Lock {
        device: DeviceId,
    },
    Unlock {
        device: DeviceId,
    },
}

impl DeviceCall {
    pub fn device(&self) -> &DeviceId {
        match self {
            DeviceCall::WriteCode { device, .. }
            | DeviceCall::ClearCode { device, .. }
            | DeviceCall::Ping { device }
            | DeviceCall::SetAutoRelock { device, .. }
            | DeviceCall::Lock { device }
            | DeviceCall::Unlock { device } => device,
        }
    }
}

#[derive(Default)]
struct FakeDeviceState {
    calls: Vec<(Instant, DeviceCall)>,
    codes: HashMap<(DeviceId, u8), String>,
    locked: HashMap<DeviceId, bool>,
    auto_relock: HashMap<DeviceId, bool>,
    unreachable: HashSet<DeviceId>,
    fail_next: HashMap<DeviceId, u32>,
    delay: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Fake device fleet for testing
///
/// Commands succeed and update an in-memory picture of every device unless
/// the device was marked unreachable or given injected failures.
#[derive(Clone, Default)]
pub struct FakeDeviceAdapter {
    inner: Arc<Mutex<FakeDeviceState>>,
}

impl FakeDeviceAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeDeviceState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get all recorded calls, oldest first
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state().calls.iter().map(|(_, c)| c.clone()).collect()
    }

    /// Get recorded calls with the instant each one started
    pub fn timed_calls(&self) -> Vec<(Instant, DeviceCall)> {
        self.state().calls.clone()
    }

    /// Recorded calls excluding pings
    pub fn commands(&self) -> Vec<DeviceCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, DeviceCall::Ping { .. }))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Code currently held by a slot
    pub fn code_at(&self, device: &DeviceId, slot: u8) -> Option<String> {
        self.state().codes.get(&(device.clone(), slot)).cloned()
    }

    /// Put a code on a slot without recording a call
    pub fn preload_code(&self, device: &DeviceId, slot: u8, code: &str) {
        self.state()
            .codes
            .insert((device.clone(), slot), code.to_string());
    }

    pub fn is_locked(&self, device: &DeviceId) -> Option<bool> {
        self.state().locked.get(device).copied()
    }

    pub fn auto_relock(&self, device: &DeviceId) -> Option<bool> {
        self.state().auto_relock.get(device).copied()
    }

    pub fn set_unreachable(&self, device: &DeviceId, unreachable: bool) {
        let mut state = self.state();
        if unreachable {
            state.unreachable.insert(device.clone());
        } else {
            state.unreachable.remove(device);
        }
    }

    /// Make the next `count` commands to a device fail
    pub fn fail_next(&self, device: &DeviceId, count: u32) {
        self.state().fail_next.insert(device.clone(), count);
    }

    /// Make every command take this long
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    /// Highest number of commands observed running at once
    pub fn max_concurrent(&self) -> usize {
        self.state().max_in_flight
    }

    async fn run(&self, call: DeviceCall) -> Result<(), DeviceError> {
        let device = call.device().clone();
        let delay = {
            let mut state = self.state();
            state.calls.push((Instant::now(), call.clone()));
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.in_flight -= 1;

        if state.unreachable.contains(&device) {
            return Err(DeviceError::Unreachable(device));
        }
        if let Some(remaining) = state.fail_next.get_mut(&device) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DeviceError::Rejected {
                    device,
                    reason: "injected failure".to_string(),
                });
            }
        }

        match call {
            DeviceCall::WriteCode { device, slot, code } => {
                state.codes.insert((device, slot), code);
            }
            DeviceCall::ClearCode { device, slot } => {
                state.codes.remove(&(device, slot));
            }
            DeviceCall::SetAutoRelock { device, enabled } => {
                state.auto_relock.insert(device, enabled);
            }
            DeviceCall::Lock { device } => {
                state.locked.insert(device, true);
            }
            DeviceCall::Unlock { device } => {
                state.locked.insert(device, false);
            }
            DeviceCall::Ping { .. } => {}
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceAdapter for FakeDeviceAdapter {
    async fn write_code(&self, device: &DeviceId, slot: u8, code: &str) -> Result<(), DeviceError> {
        self.run(DeviceCall::WriteCode {
            device: device.clone(),
            slot,
            code: code.to_string(),
        })
        .await
    }

    async fn clear_code(&self, device: &DeviceId, slot: u8) -> Result<(), DeviceError> {
        self.run(DeviceCall::ClearCode {
            device: device.clone(),
            slot,
        })
        .await
    }

    async fn ping(&self, device: &DeviceId) -> bool {
        self.run(DeviceCall::Ping {
            device: device.clone(),
        })
        .await
        .is_ok()
    }

    async fn set_auto_relock(&self, device: &DeviceId, enabled: bool) -> Result<(), DeviceError> {
        self.run(DeviceCall::SetAutoRelock {
            device: device.clone(),
            enabled,
        })
        .await
    }

    async fn lock(&self, device: &DeviceId) -> Result<(), DeviceError> {
        self.run(DeviceCall::Lock {
            device: device.clone(),
        })
        .await
    }

    async fn unlock(&self, device: &DeviceId) -> Result<(), DeviceError> {
        self.run(DeviceCall::Unlock {
            device: device.clone(),
        })
        .await
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
