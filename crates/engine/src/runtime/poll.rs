// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Calendar polling and window drift correction

use super::Runtime;
use crate::error::RuntimeError;
use kw_adapters::{DeviceAdapter, NotifyAdapter, ReservationSource};
use kw_core::{Clock, Reservation, ReservationGroup, ReservationId, SourceReservation};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// What one calendar poll changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub added: usize,
    pub updated: usize,
    pub cancelled: usize,
    pub corrected: usize,
    /// Groups whose source could not be read
    pub unavailable: usize,
}

/// Clears the polling flag when the poll ends, even by panic
struct PollGuard<'a>(&'a AtomicBool);

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<D, S, N, C> Runtime<D, S, N, C>
where
    D: DeviceAdapter,
    S: ReservationSource,
    N: NotifyAdapter,
    C: Clock,
{
    /// Fetch every sourced group and reconcile stored reservations
    ///
    /// A poll that starts while another is running returns immediately with
    /// an empty summary.
    pub async fn poll_calendars(&self) -> Result<PollSummary, RuntimeError> {
        if self.polling.swap(true, Ordering::SeqCst) {
            tracing::info!("poll already running, skipped");
            return Ok(PollSummary::default());
        }
        let _guard = PollGuard(&self.polling);

        let mut summary = PollSummary::default();
        for group in self.catalog.groups() {
            let Some(source_ref) = &group.source else {
                continue;
            };
            match self.source.fetch_reservations(source_ref).await {
                Ok(records) => self.ingest(group, records, &mut summary).await?,
                Err(e) => {
                    summary.unavailable += 1;
                    tracing::warn!(group = %group.id, error = %e, "source unavailable, group skipped");
                }
            }
        }
        summary.corrected = self.correct_drift()?;

        tracing::info!(
            added = summary.added,
            updated = summary.updated,
            cancelled = summary.cancelled,
            corrected = summary.corrected,
            unavailable = summary.unavailable,
            "calendar poll finished"
        );
        Ok(summary)
    }

    async fn ingest(
        &self,
        group: &ReservationGroup,
        records: Vec<SourceReservation>,
        summary: &mut PollSummary,
    ) -> Result<(), RuntimeError> {
        let today = self.now().date();
        let mut seen = HashSet::new();

        for record in records {
            if !seen.insert(record.id.clone()) {
                continue;
            }
            match self.store.read(|s| s.reservation(&record.id).cloned()) {
                None => {
                    let reservation = Reservation::from_source(group.id.clone(), record);
                    if let Err(e) = self.schedule_reservation(&reservation) {
                        tracing::warn!(reservation = %reservation.id, error = %e, "reservation stored without codes");
                    }
                    summary.added += 1;
                }
                Some(existing) if existing.group != group.id => {
                    tracing::warn!(
                        reservation = %existing.id,
                        stored = %existing.group,
                        listed = %group.id,
                        "reservation listed under another group, ignored"
                    );
                }
                Some(existing) => {
                    if self.refresh(existing, record).await? {
                        summary.updated += 1;
                    }
                }
            }
        }

        let vanished: Vec<ReservationId> = self.store.read(|s| {
            s.reservations
                .values()
                .filter(|r| r.group == group.id && !seen.contains(&r.id) && r.check_out >= today)
                .map(|r| r.id.clone())
                .collect()
        });
        for id in vanished {
            tracing::info!(reservation = %id, "reservation gone from source");
            self.cancel_reservation(&id).await?;
            summary.cancelled += 1;
        }
        Ok(())
    }

    /// Apply a changed source record to a stored reservation
    async fn refresh(
        &self,
        existing: Reservation,
        record: SourceReservation,
    ) -> Result<bool, RuntimeError> {
        let stay_changed = !existing.has_same_stay(&record);
        let contact_changed = existing.locked_code.is_none() && record.phone != existing.phone;
        let block_changed = record.is_blocked != existing.is_blocked;
        let name_changed = record.guest_name != existing.guest_name;
        if !(stay_changed || contact_changed || block_changed || name_changed) {
            return Ok(false);
        }

        let mut updated = existing.clone();
        updated.guest_name = record.guest_name;
        updated.check_in = record.check_in;
        updated.check_out = record.check_out;
        updated.is_blocked = record.is_blocked;
        if existing.locked_code.is_none() {
            updated.phone = record.phone;
        }

        let has_assignments = !self.assignments_for(&updated.id).is_empty();
        if stay_changed && has_assignments && !updated.is_blocked && !block_changed {
            match self.move_stay(&updated) {
                Ok(()) => {}
                Err(RuntimeError::Capacity(e)) => {
                    tracing::warn!(
                        reservation = %updated.id,
                        error = %e,
                        "new dates do not fit, stored stay kept"
                    );
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        } else {
            self.persist(kw_core::Operation::ReservationUpserted {
                reservation: updated.clone(),
            })?;
        }
        tracing::info!(
            reservation = %updated.id,
            stay_changed,
            contact_changed,
            block_changed,
            "reservation updated from source"
        );

        if updated.is_blocked {
            if block_changed {
                let _decision = self.decisions.lock().await;
                self.clear_owned(&updated.id).await?;
            }
            return Ok(true);
        }

        if !has_assignments || block_changed {
            if let Err(e) = self.schedule_reservation(&updated) {
                tracing::warn!(reservation = %updated.id, error = %e, "reservation left without codes");
            }
            return Ok(true);
        }

        if stay_changed {
            self.arm_reservation_jobs(&updated);
        }
        if contact_changed {
            if let Some(code) = updated.code() {
                self.recode_pending(&updated.id, &code)?;
            }
        }
        Ok(true)
    }

    /// Re-derive every upcoming window and re-arm those that drifted from
    /// what the current catalog and overrides produce
    pub fn correct_drift(&self) -> Result<usize, RuntimeError> {
        let now = self.now();
        let upcoming: Vec<(kw_core::Assignment, Reservation, Option<kw_core::TimeOverride>)> =
            self.store.read(|s| {
                s.assignments
                    .values()
                    .filter(|a| !a.window.has_ended(now))
                    .filter_map(|a| {
                        let reservation = s.reservation(&a.reservation)?.clone();
                        let time_override = s.override_for(&a.reservation, &a.device).cloned();
                        Some((a.clone(), reservation, time_override))
                    })
                    .collect()
            });

        let mut corrected = 0;
        let mut allocator = self.lock_allocator();
        for (assignment, reservation, time_override) in upcoming {
            let Some(device) = self.catalog.device(&assignment.device) else {
                continue;
            };
            match self.plan_retime(&reservation, device, time_override.as_ref()) {
                Ok(Some((previous, moved))) => {
                    self.apply_retime(&mut allocator, &previous, &moved)?;
                    corrected += 1;
                }
                Ok(None) => {}
                Err(RuntimeError::Capacity(e)) => tracing::warn!(
                    key = %assignment.key(),
                    reservation = %assignment.reservation,
                    error = %e,
                    "drifted window does not fit, left as stored"
                ),
                Err(e) => return Err(e),
            }
        }
        drop(allocator);
        if corrected > 0 {
            tracing::info!(corrected, "drifted windows corrected");
        }
        Ok(corrected)
    }
}

#[cfg(test)]
#[path = "poll_tests.rs"]
mod tests;
