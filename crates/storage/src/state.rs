// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay

use kw_core::{
    Assignment, AuditEntry, DeviceId, Operation, Reservation, ReservationId, SlotKey, SlotSync,
    TimeOverride,
};
use std::collections::{BTreeMap, HashMap};

/// Audit entries kept in memory; older ones are dropped as new ones arrive
pub const AUDIT_RETENTION: usize = 10_000;

/// Materialized state built from WAL operations
#[derive(Debug, Default)]
pub struct MaterializedState {
    pub reservations: HashMap<ReservationId, Reservation>,
    /// Several reservations may hold assignments on one slot at different times
    pub assignments: BTreeMap<(SlotKey, ReservationId), Assignment>,
    pub overrides: HashMap<(ReservationId, DeviceId), TimeOverride>,
    pub slots: HashMap<SlotKey, SlotSync>,
    pub master_codes: HashMap<DeviceId, String>,
    pub emergency_codes: HashMap<DeviceId, String>,
    pub audit: Vec<AuditEntry>,
}

impl MaterializedState {
    pub fn reservation(&self, id: &ReservationId) -> Option<&Reservation> {
        self.reservations.get(id)
    }

    pub fn assignment(&self, key: &SlotKey, reservation: &ReservationId) -> Option<&Assignment> {
        self.assignments.get(&(key.clone(), reservation.clone()))
    }

    /// All assignments held by a reservation, ordered by slot
    pub fn assignments_for(&self, reservation: &ReservationId) -> Vec<&Assignment> {
        self.assignments
            .values()
            .filter(|a| &a.reservation == reservation)
            .collect()
    }

    /// Assignments of any reservation on one slot
    pub fn assignments_on<'a>(&'a self, key: &'a SlotKey) -> impl Iterator<Item = &'a Assignment> {
        self.assignments
            .range((key.clone(), ReservationId::from(""))..)
            .take_while(move |((k, _), _)| k == key)
            .map(|(_, a)| a)
    }

    pub fn override_for(&self, reservation: &ReservationId, device: &DeviceId) -> Option<&TimeOverride> {
        self.overrides.get(&(reservation.clone(), device.clone()))
    }

    pub fn slot(&self, key: &SlotKey) -> Option<&SlotSync> {
        self.slots.get(key)
    }

    /// Audit entries touching a reservation, oldest first
    pub fn audit_for(&self, reservation: &ReservationId) -> Vec<&AuditEntry> {
        self.audit
            .iter()
            .filter(|e| e.reservation.as_ref() == Some(reservation))
            .collect()
    }

    /// Apply an operation to update the state
    pub fn apply(&mut self, op: &Operation) {
        match op {
            Operation::ReservationUpserted { reservation } => {
                self.reservations
                    .insert(reservation.id.clone(), reservation.clone());
            }

            Operation::ReservationDeleted { id } => {
                self.reservations.remove(id);
                self.assignments.retain(|(_, r), _| r != id);
                self.overrides.retain(|(r, _), _| r != id);
            }

            Operation::ReservationDisabled { id, disabled } => {
                if let Some(reservation) = self.reservations.get_mut(id) {
                    reservation.disabled = *disabled;
                }
            }

            Operation::CodeLocked { id, code } => {
                if let Some(reservation) = self.reservations.get_mut(id) {
                    reservation.locked_code = Some(code.clone());
                }
            }

            Operation::AssignmentUpserted { assignment } => {
                self.assignments.insert(
                    (assignment.key(), assignment.reservation.clone()),
                    assignment.clone(),
                );
            }

            Operation::AssignmentLive {
                key,
                reservation,
                is_live,
            } => {
                if let Some(assignment) = self
                    .assignments
                    .get_mut(&(key.clone(), reservation.clone()))
                {
                    assignment.is_live = *is_live;
                }
            }

            Operation::AssignmentDeleted { key, reservation } => {
                self.assignments.remove(&(key.clone(), reservation.clone()));
            }

            Operation::OverrideSet { time_override } => {
                self.overrides.insert(
                    (
                        time_override.reservation.clone(),
                        time_override.device.clone(),
                    ),
                    time_override.clone(),
                );
            }

            Operation::SlotSynced { sync } => {
                self.slots.insert(sync.key(), sync.clone());
            }

            Operation::MasterCodeSet { device, code } => {
                self.master_codes.insert(device.clone(), code.clone());
            }

            Operation::EmergencyCodeSet { device, code } => {
                self.emergency_codes.insert(device.clone(), code.clone());
            }

            Operation::AuditRecorded { entry } => {
                self.audit.push(entry.clone());
                if self.audit.len() > AUDIT_RETENTION {
                    let excess = self.audit.len() - AUDIT_RETENTION;
                    self.audit.drain(..excess);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
