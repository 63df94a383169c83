// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-slot synchronization state machine
//!
//! ```text
//! idle -> setting -> confirming -> active
//! active | idle -> clearing -> idle
//! setting | confirming | clearing -> retrying -> setting | clearing | idle
//!                                            \-> failed
//! ```
//!
//! Pure bookkeeping: the engine performs the device I/O and records the
//! outcome here.

use crate::id::{DeviceId, ReservationId};
use crate::slot::SlotKey;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Setting,
    Confirming,
    Active,
    Clearing,
    Retrying,
    Failed,
}

impl SyncState {
    /// Waiting on the device; subject to the timeout sweep
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            SyncState::Setting | SyncState::Confirming | SyncState::Clearing
        )
    }

    /// A set is underway (reported as "in progress")
    pub fn is_syncing(self) -> bool {
        matches!(
            self,
            SyncState::Setting | SyncState::Confirming | SyncState::Retrying
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Setting => "setting",
            SyncState::Confirming => "confirming",
            SyncState::Active => "active",
            SyncState::Clearing => "clearing",
            SyncState::Retrying => "retrying",
            SyncState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timeout policy for in-flight operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
}

/// What the sweep should do with a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    /// Nothing pending or not yet timed out
    None,
    /// Timed out with retries left
    Recover,
    /// Timed out with the retry budget spent
    Escalate,
}

/// Synchronization record for one (device, slot)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSync {
    pub device: DeviceId,
    pub slot: u8,
    pub state: SyncState,
    /// Code believed to be physically present
    pub current_code: Option<String>,
    /// Code the in-flight operation is trying to establish
    pub target_code: Option<String>,
    pub reservation: Option<ReservationId>,
    pub started_at: Option<NaiveDateTime>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl SlotSync {
    pub fn new(key: SlotKey) -> Self {
        Self {
            device: key.device,
            slot: key.slot,
            state: SyncState::Idle,
            current_code: None,
            target_code: None,
            reservation: None,
            started_at: None,
            retry_count: 0,
            last_error: None,
        }
    }

    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.device.clone(), self.slot)
    }

    /// A new set begins; resets the retry budget
    pub fn begin_set(&mut self, code: &str, reservation: Option<ReservationId>, now: NaiveDateTime) {
        self.state = SyncState::Setting;
        self.target_code = Some(code.to_string());
        self.reservation = reservation;
        self.started_at = Some(now);
        self.retry_count = 0;
        self.last_error = None;
    }

    /// The device accepted the write; await confirmation
    pub fn write_accepted(&mut self) {
        self.state = SyncState::Confirming;
        self.last_error = None;
    }

    /// A new clear begins; resets the retry budget
    pub fn begin_clear(&mut self, reservation: Option<ReservationId>, now: NaiveDateTime) {
        self.state = SyncState::Clearing;
        self.target_code = None;
        self.reservation = reservation;
        self.started_at = Some(now);
        self.retry_count = 0;
        self.last_error = None;
    }

    /// The device removed the code; clears are authoritative
    pub fn cleared(&mut self) {
        self.state = SyncState::Idle;
        self.current_code = None;
        self.target_code = None;
        self.started_at = None;
        self.last_error = None;
    }

    /// A device command failed; the operation stays in flight for the sweep
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// External confirmation that the target code is on the device
    pub fn confirm(&mut self) -> bool {
        if !matches!(
            self.state,
            SyncState::Setting | SyncState::Confirming | SyncState::Retrying
        ) {
            return false;
        }
        self.state = SyncState::Active;
        self.current_code = self.target_code.clone();
        self.started_at = None;
        self.last_error = None;
        true
    }

    /// Decide what the sweep does with this slot
    pub fn sweep_action(&self, policy: &SyncPolicy, now: NaiveDateTime) -> SweepAction {
        if !self.state.is_in_flight() {
            return SweepAction::None;
        }
        let Some(started) = self.started_at else {
            return SweepAction::None;
        };
        if now - started <= policy.timeout {
            return SweepAction::None;
        }
        if self.retry_count >= policy.max_retries {
            SweepAction::Escalate
        } else {
            SweepAction::Recover
        }
    }

    /// Enter recovery; consumes one retry
    pub fn begin_retry(&mut self) {
        self.state = SyncState::Retrying;
        self.retry_count += 1;
    }

    /// Recovery could not proceed; go back in flight with a fresh timer
    pub fn defer_retry(&mut self, error: impl Into<String>, now: NaiveDateTime) {
        self.state = if self.target_code.is_some() {
            SyncState::Setting
        } else {
            SyncState::Clearing
        };
        self.started_at = Some(now);
        self.last_error = Some(error.into());
    }

    /// Recovery cleared the slot and re-issued the target write
    pub fn reissued(&mut self, now: NaiveDateTime) {
        self.state = SyncState::Setting;
        self.current_code = None;
        self.started_at = Some(now);
    }

    /// Recovery cleared the slot and there was nothing to re-set
    pub fn settled_idle(&mut self) {
        self.state = SyncState::Idle;
        self.current_code = None;
        self.started_at = None;
    }

    /// Retry budget spent; terminal until an operator intervenes
    pub fn fail(&mut self, max_retries: u32) {
        let exhausted = format!("max retries ({max_retries}) exceeded");
        self.last_error = Some(match self.last_error.take() {
            Some(last) => format!("{exhausted}: {last}"),
            None => exhausted,
        });
        self.state = SyncState::Failed;
        self.started_at = None;
    }

    /// Operator dismissed a failed slot
    pub fn reset(&mut self) {
        self.state = SyncState::Idle;
        self.target_code = None;
        self.reservation = None;
        self.started_at = None;
        self.retry_count = 0;
        self.last_error = None;
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
