// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable state changes recorded in the write-ahead log

use crate::assignment::{Assignment, TimeOverride};
use crate::audit::AuditEntry;
use crate::id::{DeviceId, ReservationId};
use crate::reservation::Reservation;
use crate::slot::SlotKey;
use crate::sync::SlotSync;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    ReservationUpserted {
        reservation: Reservation,
    },
    ReservationDeleted {
        id: ReservationId,
    },
    ReservationDisabled {
        id: ReservationId,
        disabled: bool,
    },
    CodeLocked {
        id: ReservationId,
        code: String,
    },
    AssignmentUpserted {
        assignment: Assignment,
    },
    AssignmentLive {
        key: SlotKey,
        reservation: ReservationId,
        is_live: bool,
    },
    AssignmentDeleted {
        key: SlotKey,
        reservation: ReservationId,
    },
    OverrideSet {
        time_override: TimeOverride,
    },
    SlotSynced {
        sync: SlotSync,
    },
    MasterCodeSet {
        device: DeviceId,
        code: String,
    },
    EmergencyCodeSet {
        device: DeviceId,
        code: String,
    },
    AuditRecorded {
        entry: AuditEntry,
    },
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod tests;
