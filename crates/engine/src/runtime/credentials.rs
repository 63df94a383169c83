// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet-wide commands outside the slot state machine: master and
//! emergency codes, and whole-property lock routines

use super::{validate_code, Runtime};
use crate::error::RuntimeError;
use crate::retry::with_backoff;
use kw_adapters::{DeviceAdapter, DeviceError, NotifyAdapter, ReservationSource};
use kw_core::{
    AuditAction, AuditEntry, Clock, DeviceId, Operation, ReservationId, EMERGENCY_SLOT,
    MASTER_SLOT,
};
use rand::Rng;
use std::collections::HashSet;

/// Per-device outcome of a fleet-wide command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetWriteSummary {
    pub succeeded: usize,
    pub failed: Vec<(DeviceId, String)>,
}

impl FleetWriteSummary {
    fn record(&mut self, device: &DeviceId, result: &Result<(), DeviceError>) {
        match result {
            Ok(()) => self.succeeded += 1,
            Err(e) => self.failed.push((device.clone(), e.to_string())),
        }
    }

    fn failure_list(&self) -> String {
        self.failed
            .iter()
            .map(|(device, error)| format!("{device}: {error}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn random_code() -> String {
    rand::rng().random_range(1000..=9999).to_string()
}

/// Draw until the code is not already taken on the device
fn draw_free_code(taken: &HashSet<String>, mut draw: impl FnMut() -> String) -> String {
    loop {
        let code = draw();
        if !taken.contains(&code) {
            return code;
        }
        tracing::debug!("drawn code already in use, drawing again");
    }
}

impl<D, S, N, C> Runtime<D, S, N, C>
where
    D: DeviceAdapter,
    S: ReservationSource,
    N: NotifyAdapter,
    C: Clock,
{
    async fn write_with_backoff(
        &self,
        device: &DeviceId,
        slot: u8,
        code: &str,
    ) -> Result<(), DeviceError> {
        with_backoff(self.config.command_retries, self.config.command_backoff, || {
            self.devices.write_code(device, slot, code)
        })
        .await
    }

    /// Codes a device holds or is due to hold outside its emergency slot
    pub(crate) fn codes_in_use(&self, device: &DeviceId) -> HashSet<String> {
        let now = self.now();
        let mut taken: HashSet<String> = self.store.read(|s| {
            s.master_codes
                .get(device)
                .cloned()
                .into_iter()
                .chain(
                    s.assignments
                        .values()
                        .filter(|a| &a.device == device && !a.window.has_ended(now))
                        .map(|a| a.code.clone()),
                )
                .collect()
        });
        for slot in self.sync.slots_on(device) {
            if slot.slot != EMERGENCY_SLOT {
                taken.extend(slot.current_code.into_iter().chain(slot.target_code));
            }
        }
        taken
    }

    /// Write the owner code into slot 1 of every device
    ///
    /// The code is stored even where the write failed; failures are
    /// reported together in one notification.
    pub async fn set_master_code(&self, code: &str) -> Result<FleetWriteSummary, RuntimeError> {
        validate_code(code)?;
        let mut summary = FleetWriteSummary::default();

        for device in self.catalog.devices() {
            let result = self.write_with_backoff(&device.id, MASTER_SLOT, code).await;
            self.persist(Operation::MasterCodeSet {
                device: device.id.clone(),
                code: code.to_string(),
            })?;
            self.audit(
                AuditEntry::new(AuditAction::MasterCodeSet, self.now())
                    .device(&device.id)
                    .slot(MASTER_SLOT)
                    .outcome(&result),
            );
            summary.record(&device.id, &result);
        }

        if !summary.failed.is_empty() {
            let message = format!(
                "Master code failed on {} device(s): {}",
                summary.failed.len(),
                summary.failure_list()
            );
            self.alert("credentials", &message).await;
        }
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            "master code set"
        );
        Ok(summary)
    }

    /// Write an emergency code into slot 20 of one device
    pub async fn set_emergency_code(&self, device: &DeviceId, code: &str) -> Result<(), RuntimeError> {
        validate_code(code)?;
        self.device(device)?;

        let result = self.write_with_backoff(device, EMERGENCY_SLOT, code).await;
        self.persist(Operation::EmergencyCodeSet {
            device: device.clone(),
            code: code.to_string(),
        })?;
        self.audit(
            AuditEntry::new(AuditAction::EmergencyCodeSet, self.now())
                .device(device)
                .slot(EMERGENCY_SLOT)
                .outcome(&result),
        );
        if let Err(e) = &result {
            let message = format!("Emergency code failed on {device}: {e}");
            self.alert("credentials", &message).await;
        }
        Ok(result?)
    }

    /// Give every device a fresh random emergency code
    pub async fn rotate_emergency_codes(&self) -> Result<FleetWriteSummary, RuntimeError> {
        let mut summary = FleetWriteSummary::default();

        for device in self.catalog.devices() {
            let code = draw_free_code(&self.codes_in_use(&device.id), random_code);
            let result = self.write_with_backoff(&device.id, EMERGENCY_SLOT, &code).await;
            self.persist(Operation::EmergencyCodeSet {
                device: device.id.clone(),
                code,
            })?;
            self.audit(
                AuditEntry::new(AuditAction::EmergencyCodeSet, self.now())
                    .device(&device.id)
                    .slot(EMERGENCY_SLOT)
                    .details("rotation")
                    .outcome(&result),
            );
            summary.record(&device.id, &result);
        }

        if !summary.failed.is_empty() {
            let message = format!(
                "Emergency code rotation failed on {} device(s): {}",
                summary.failed.len(),
                summary.failure_list()
            );
            self.alert("credentials", &message).await;
        }
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            "emergency codes rotated"
        );
        Ok(summary)
    }

    /// Whole-property arrival: auto-relock off, internal doors unlocked
    pub async fn property_check_in(
        &self,
        reservation: &ReservationId,
    ) -> Result<FleetWriteSummary, RuntimeError> {
        self.set_internal_locks(reservation, false).await
    }

    /// Whole-property departure: auto-relock on, internal doors locked
    pub async fn property_check_out(
        &self,
        reservation: &ReservationId,
    ) -> Result<FleetWriteSummary, RuntimeError> {
        self.set_internal_locks(reservation, true).await
    }

    async fn set_internal_locks(
        &self,
        reservation_id: &ReservationId,
        secure: bool,
    ) -> Result<FleetWriteSummary, RuntimeError> {
        let reservation = self.reservation(reservation_id)?;
        let mut summary = FleetWriteSummary::default();
        if !reservation.is_schedulable() {
            tracing::info!(reservation = %reservation_id, "reservation not schedulable, locks untouched");
            return Ok(summary);
        }

        let (action, verb) = if secure {
            (AuditAction::PropertyLock, "lock")
        } else {
            (AuditAction::PropertyUnlock, "unlock")
        };
        let retries = self.config.command_retries;
        let backoff = self.config.command_backoff;

        for device in self
            .catalog
            .devices_serving(&reservation.group)
            .filter(|d| d.category.is_internal())
        {
            let relock = with_backoff(retries, backoff, || {
                self.devices.set_auto_relock(&device.id, secure)
            })
            .await;
            let moved = with_backoff(retries, backoff, || {
                if secure {
                    self.devices.lock(&device.id)
                } else {
                    self.devices.unlock(&device.id)
                }
            })
            .await;
            let result = relock.and(moved);

            self.audit(
                AuditEntry::new(action, self.now())
                    .device(&device.id)
                    .reservation(reservation_id)
                    .details(format!("auto-relock {}, {verb}", if secure { "on" } else { "off" }))
                    .outcome(&result),
            );
            summary.record(&device.id, &result);
        }

        if !summary.failed.is_empty() {
            let message = format!(
                "Property {verb} for {} failed on {} lock(s): {}",
                reservation.guest_name,
                summary.failed.len(),
                summary.failure_list()
            );
            self.alert("property", &message).await;
        }
        tracing::info!(
            reservation = %reservation_id,
            verb,
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            "internal locks updated"
        );
        Ok(summary)
    }
}

#[cfg(test)]
#[path = "credentials_tests.rs"]
mod tests;
