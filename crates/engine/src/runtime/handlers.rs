// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer job dispatch: activation, deactivation and finalization

use super::Runtime;
use crate::error::RuntimeError;
use crate::jobs::JobHandler;
use async_trait::async_trait;
use kw_adapters::{DeviceAdapter, NotifyAdapter, ReservationSource};
use kw_core::{
    code_from_phone, AuditAction, AuditEntry, Clock, DeviceId, JobPayload, Operation,
    ReservationId, SlotKey, EMERGENCY_SLOT, MASTER_SLOT,
};

#[async_trait]
impl<D, S, N, C> JobHandler for Runtime<D, S, N, C>
where
    D: DeviceAdapter,
    S: ReservationSource,
    N: NotifyAdapter,
    C: Clock,
{
    async fn handle(&self, payload: JobPayload) -> Result<(), RuntimeError> {
        match payload {
            JobPayload::Activate {
                device,
                slot,
                reservation,
                code,
            } => self.activate(&device, slot, &reservation, &code).await,
            JobPayload::Deactivate {
                device,
                slot,
                reservation,
            } => self.deactivate(&device, slot, &reservation).await,
            JobPayload::Finalize { reservation } => self.finalize(&reservation).await,
            JobPayload::CalendarPoll => self.poll_calendars().await.map(|_| ()),
            JobPayload::CredentialRotation => self.rotate_emergency_codes().await.map(|_| ()),
            JobPayload::PropertyCheckIn { reservation } => {
                self.property_check_in(&reservation).await.map(|_| ())
            }
            JobPayload::PropertyCheckOut { reservation } => {
                self.property_check_out(&reservation).await.map(|_| ())
            }
        }
    }
}

impl<D, S, N, C> Runtime<D, S, N, C>
where
    D: DeviceAdapter,
    S: ReservationSource,
    N: NotifyAdapter,
    C: Clock,
{
    /// Slot on the same device already holding or receiving this code
    fn code_in_use_elsewhere(&self, key: &SlotKey, code: &str) -> Option<u8> {
        let (master, emergency) = self.store.read(|s| {
            (
                s.master_codes.get(&key.device).cloned(),
                s.emergency_codes.get(&key.device).cloned(),
            )
        });
        if master.as_deref() == Some(code) {
            return Some(MASTER_SLOT);
        }
        if emergency.as_deref() == Some(code) {
            return Some(EMERGENCY_SLOT);
        }
        self.sync
            .slots_on(&key.device)
            .into_iter()
            .find(|s| {
                s.slot != key.slot
                    && (s.current_code.as_deref() == Some(code)
                        || (s.state.is_in_flight() && s.target_code.as_deref() == Some(code)))
            })
            .map(|s| s.slot)
    }

    /// Write an assignment's code to its slot
    ///
    /// The code comes from the stored assignment, not the timer, so a code
    /// recomputed after the timer was armed still wins.
    pub(crate) async fn activate(
        &self,
        device: &DeviceId,
        slot: u8,
        reservation_id: &ReservationId,
        armed_code: &str,
    ) -> Result<(), RuntimeError> {
        let key = SlotKey::new(device.clone(), slot);
        let _decision = self.decisions.lock().await;
        let now = self.now();

        let (reservation, assignment) = self.store.read(|s| {
            (
                s.reservation(reservation_id).cloned(),
                s.assignment(&key, reservation_id).cloned(),
            )
        });
        let reservation =
            reservation.ok_or_else(|| RuntimeError::ReservationNotFound(reservation_id.clone()))?;
        let assignment = assignment.ok_or_else(|| RuntimeError::AssignmentNotFound {
            key: key.clone(),
            reservation: reservation_id.clone(),
        })?;
        if assignment.code != armed_code {
            tracing::debug!(%key, "code changed since the timer was armed");
        }

        let skip = if reservation.disabled {
            Some("reservation disabled".to_string())
        } else if reservation.is_blocked {
            Some("reservation blocked".to_string())
        } else if assignment.window.has_ended(now) {
            Some("window already ended".to_string())
        } else {
            self.code_in_use_elsewhere(&key, &assignment.code)
                .map(|other| format!("code already on slot {other}"))
        };
        if let Some(reason) = skip {
            tracing::info!(%key, reservation = %reservation_id, reason, "activation skipped");
            self.audit(
                AuditEntry::new(AuditAction::ActivationSkipped, now)
                    .device(device)
                    .slot(slot)
                    .reservation(reservation_id)
                    .details(reason),
            );
            return Ok(());
        }

        let result = self
            .sync
            .set(device, slot, &assignment.code, Some(reservation_id))
            .await;
        self.audit(
            AuditEntry::new(AuditAction::CodeActivated, now)
                .device(device)
                .slot(slot)
                .reservation(reservation_id)
                .outcome(&result),
        );
        result?;

        self.persist(Operation::AssignmentLive {
            key,
            reservation: reservation_id.clone(),
            is_live: true,
        })?;
        Ok(())
    }

    /// Remove an assignment's code and free its slot
    ///
    /// A slot that another reservation has since taken over is left alone.
    pub(crate) async fn deactivate(
        &self,
        device: &DeviceId,
        slot: u8,
        reservation_id: &ReservationId,
    ) -> Result<(), RuntimeError> {
        let key = SlotKey::new(device.clone(), slot);
        let _decision = self.decisions.lock().await;
        let now = self.now();

        let assignment = self
            .store
            .read(|s| s.assignment(&key, reservation_id).cloned())
            .ok_or_else(|| RuntimeError::AssignmentNotFound {
                key: key.clone(),
                reservation: reservation_id.clone(),
            })?;

        let taken_over = self.sync.slot(&key).is_some_and(|s| {
            let holds_code = s.current_code.is_some() || s.target_code.is_some();
            holds_code
                && s.reservation.is_some()
                && s.reservation.as_ref() != Some(reservation_id)
        });

        if taken_over {
            tracing::info!(%key, reservation = %reservation_id, "slot serves another reservation, not clearing");
        } else if self.slot_owned_by(&assignment) {
            let result = self.sync.clear(device, slot, Some(reservation_id)).await;
            self.audit(
                AuditEntry::new(AuditAction::CodeDeactivated, now)
                    .device(device)
                    .slot(slot)
                    .reservation(reservation_id)
                    .outcome(&result),
            );
            result?;
        } else {
            tracing::debug!(%key, reservation = %reservation_id, "nothing to clear");
        }

        if assignment.is_live {
            self.persist(Operation::AssignmentLive {
                key: key.clone(),
                reservation: reservation_id.clone(),
                is_live: false,
            })?;
        }
        self.lock_allocator().release(&key, reservation_id);
        Ok(())
    }

    /// Fix the reservation's code from the freshest contact details
    pub(crate) async fn finalize(&self, reservation_id: &ReservationId) -> Result<(), RuntimeError> {
        let reservation = self.reservation(reservation_id)?;
        if let Some(code) = &reservation.locked_code {
            tracing::debug!(reservation = %reservation_id, code_len = code.len(), "already finalized");
            return Ok(());
        }

        let mut phone = reservation.phone.clone();
        let source_ref = self
            .catalog
            .group(&reservation.group)
            .and_then(|g| g.source.clone());
        if let Some(source_ref) = source_ref {
            match self.source.fetch_reservations(&source_ref).await {
                Ok(records) => {
                    let fresh = records
                        .into_iter()
                        .find(|r| &r.id == reservation_id)
                        .and_then(|r| r.phone);
                    if fresh.is_some() && fresh != phone {
                        tracing::info!(reservation = %reservation_id, "contact updated before finalizing");
                        phone = fresh;
                    }
                }
                Err(e) => {
                    tracing::warn!(reservation = %reservation_id, error = %e, "source unavailable, finalizing from stored contact")
                }
            }
        }

        let now = self.now();
        let Some(code) = phone.as_deref().and_then(code_from_phone) else {
            self.audit(
                AuditEntry::new(AuditAction::CodeFinalized, now)
                    .reservation(reservation_id)
                    .failed("no usable phone number"),
            );
            return Err(RuntimeError::MissingCode(reservation_id.clone()));
        };

        if phone != reservation.phone {
            let mut updated = reservation.clone();
            updated.phone = phone;
            self.persist(Operation::ReservationUpserted {
                reservation: updated,
            })?;
        }
        self.persist(Operation::CodeLocked {
            id: reservation_id.clone(),
            code: code.clone(),
        })?;
        let recoded = self.recode_pending(reservation_id, &code)?;
        self.audit(
            AuditEntry::new(AuditAction::CodeFinalized, now)
                .reservation(reservation_id)
                .details(format!("{recoded} pending assignment(s) recoded")),
        );
        tracing::info!(reservation = %reservation_id, recoded, "code finalized");
        Ok(())
    }

    /// Give assignments not yet on a device a new code and re-arm them
    pub(crate) fn recode_pending(
        &self,
        reservation: &ReservationId,
        code: &str,
    ) -> Result<usize, RuntimeError> {
        let mut recoded = 0;
        for assignment in self.assignments_for(reservation) {
            if assignment.is_live || assignment.code == code {
                continue;
            }
            let updated = kw_core::Assignment {
                code: code.to_string(),
                ..assignment
            };
            self.persist(Operation::AssignmentUpserted {
                assignment: updated.clone(),
            })?;
            self.arm(&updated);
            recoded += 1;
        }
        Ok(recoded)
    }
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
