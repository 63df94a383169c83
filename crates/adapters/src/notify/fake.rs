// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake notification adapter for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{NotifyAdapter, NotifyError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// An alert as the operator would have received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyCall {
    pub channel: String,
    pub message: String,
}

#[derive(Default)]
struct FakeNotifyState {
    calls: Vec<NotifyCall>,
    undeliverable: bool,
}

/// Records alerts; delivery can be switched off to exercise error paths
#[derive(Clone, Default)]
pub struct FakeNotifyAdapter {
    inner: Arc<Mutex<FakeNotifyState>>,
}

impl FakeNotifyAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempted alert, delivered or not
    pub fn calls(&self) -> Vec<NotifyCall> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .clone()
    }

    /// Messages sent on one channel, oldest first
    pub fn messages_on(&self, channel: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.channel == channel)
            .map(|c| c.message)
            .collect()
    }

    /// Make every following send fail after it is recorded
    pub fn set_undeliverable(&self, undeliverable: bool) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .undeliverable = undeliverable;
    }
}

#[async_trait]
impl NotifyAdapter for FakeNotifyAdapter {
    async fn send(&self, channel: &str, message: &str) -> Result<(), NotifyError> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.calls.push(NotifyCall {
            channel: channel.to_string(),
            message: message.to_string(),
        });
        if state.undeliverable {
            return Err(NotifyError::DeliveryFailed(format!(
                "channel {channel} unreachable"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
