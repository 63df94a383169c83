// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential windows, assignments and operator overrides

use crate::id::{DeviceId, ReservationId};
use crate::slot::SlotKey;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// The [activate, deactivate) interval a code is expected to be live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub activate_at: NaiveDateTime,
    pub deactivate_at: NaiveDateTime,
}

impl Window {
    pub fn new(activate_at: NaiveDateTime, deactivate_at: NaiveDateTime) -> Self {
        Self {
            activate_at,
            deactivate_at,
        }
    }

    /// Half-open overlap: windows that only touch do not overlap
    pub fn overlaps(&self, other: &Window) -> bool {
        self.activate_at < other.deactivate_at && other.activate_at < self.deactivate_at
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.activate_at <= at && at < self.deactivate_at
    }

    pub fn has_started(&self, now: NaiveDateTime) -> bool {
        self.activate_at <= now
    }

    pub fn has_ended(&self, now: NaiveDateTime) -> bool {
        self.deactivate_at <= now
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.activate_at.format("%Y-%m-%d %H:%M"),
            self.deactivate_at.format("%Y-%m-%d %H:%M")
        )
    }
}

/// A code bound to one (device, slot) for one reservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub device: DeviceId,
    pub slot: u8,
    pub reservation: ReservationId,
    pub code: String,
    pub window: Window,
    /// Whether the code was written to the device for the current window
    #[serde(default)]
    pub is_live: bool,
}

impl Assignment {
    pub fn new(
        device: DeviceId,
        slot: u8,
        reservation: ReservationId,
        code: impl Into<String>,
        window: Window,
    ) -> Self {
        Self {
            device,
            slot,
            reservation,
            code: code.into(),
            window,
            is_live: false,
        }
    }

    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.device.clone(), self.slot)
    }
}

/// Operator replacement for computed activation/deactivation times
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOverride {
    pub reservation: ReservationId,
    pub device: DeviceId,
    #[serde(default)]
    pub activate_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub deactivate_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl TimeOverride {
    pub fn new(reservation: ReservationId, device: DeviceId) -> Self {
        Self {
            reservation,
            device,
            activate_at: None,
            deactivate_at: None,
            notes: None,
        }
    }

    /// Apply only the supplied sides on top of this override
    pub fn merged(
        mut self,
        activate_at: Option<NaiveDateTime>,
        deactivate_at: Option<NaiveDateTime>,
        notes: Option<String>,
    ) -> Self {
        if activate_at.is_some() {
            self.activate_at = activate_at;
        }
        if deactivate_at.is_some() {
            self.deactivate_at = deactivate_at;
        }
        if notes.is_some() {
            self.notes = notes;
        }
        self
    }

    /// The same times applied to another device
    pub fn pegged_to(&self, device: DeviceId) -> Self {
        Self {
            device,
            ..self.clone()
        }
    }
}

#[cfg(test)]
#[path = "assignment_tests.rs"]
mod tests;
