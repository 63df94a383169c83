// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notification adapter that writes to the log.

use super::{NotifyAdapter, NotifyError};
use async_trait::async_trait;

/// Notify adapter that emits each message as a warning.
///
/// Used when no outbound notification channel is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifyAdapter;

impl LogNotifyAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotifyAdapter for LogNotifyAdapter {
    async fn send(&self, channel: &str, message: &str) -> Result<(), NotifyError> {
        tracing::warn!(channel, message, "operator notification");
        Ok(())
    }
}
