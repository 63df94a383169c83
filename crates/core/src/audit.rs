// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Audit trail records

use crate::id::{DeviceId, ReservationId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CodeActivated,
    CodeDeactivated,
    CodeFinalized,
    CodeSyncFailed,
    ActivationSkipped,
    OverrideSet,
    ReservationDisabled,
    ReservationEnabled,
    ReservationCancelled,
    Resync,
    MasterCodeSet,
    EmergencyCodeSet,
    PropertyUnlock,
    PropertyLock,
}

/// One audited action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: NaiveDateTime,
    pub action: AuditAction,
    pub device: Option<DeviceId>,
    pub slot: Option<u8>,
    pub reservation: Option<ReservationId>,
    pub success: bool,
    pub details: Option<String>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, at: NaiveDateTime) -> Self {
        Self {
            at,
            action,
            device: None,
            slot: None,
            reservation: None,
            success: true,
            details: None,
        }
    }

    pub fn device(mut self, device: &DeviceId) -> Self {
        self.device = Some(device.clone());
        self
    }

    pub fn slot(mut self, slot: u8) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn reservation(mut self, reservation: &ReservationId) -> Self {
        self.reservation = Some(reservation.clone());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Mark as failed with the error text as details
    pub fn failed(mut self, error: impl std::fmt::Display) -> Self {
        self.success = false;
        self.details = Some(error.to_string());
        self
    }

    /// Set success from a result, keeping the error text on failure
    pub fn outcome<T, E: std::fmt::Display>(self, result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => self,
            Err(e) => self.failed(e),
        }
    }
}
