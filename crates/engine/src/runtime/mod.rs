// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential lifecycle runtime
//!
//! Composes the allocator, time calculator, job runner and sync manager
//! behind two serialization domains: every device command passes through
//! the command gate, and every activation, deactivation or forced clear
//! holds the decision lock from guard check to device write.

mod credentials;
mod handlers;
mod poll;
mod rehydrate;

#[cfg(test)]
mod test_support;

pub use credentials::FleetWriteSummary;
pub use poll::PollSummary;

use crate::error::RuntimeError;
use crate::gate::GatedDevice;
use crate::jobs::JobRunner;
use crate::sync::{SyncFailure, SyncManager};
use chrono::NaiveDateTime;
use kw_adapters::{DeviceAdapter, NotifyAdapter, ReservationSource};
use kw_core::timing::window_for;
use kw_core::{
    AllocationError, Assignment, AuditAction, AuditEntry, Catalog, Clock, Device,
    DeviceCategory, DeviceId, EngineConfig, JobKey, JobPayload, Operation, Reservation,
    ReservationId, SlotAllocator, SlotKey, SlotPool, SlotSync, SyncState, TimeOverride, Window,
};
use kw_storage::Store;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Runtime adapter dependencies
pub struct RuntimeDeps<D, S, N> {
    pub devices: D,
    pub source: S,
    pub notify: N,
    pub store: Store,
}

/// Slots needing attention and slots still converging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub failed_slots: Vec<SlotSync>,
    pub in_progress_slots: Vec<SlotSync>,
}

/// What a forced resync did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    pub set: usize,
    pub cleared: usize,
    pub failed: usize,
}

/// Codes are 4 to 8 decimal digits
pub(crate) fn validate_code(code: &str) -> Result<(), RuntimeError> {
    if (4..=8).contains(&code.len()) && code.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(RuntimeError::InvalidCode(format!(
            "expected 4-8 digits, got {} chars",
            code.len()
        )))
    }
}

/// Runtime that coordinates the system
pub struct Runtime<D, S, N, C> {
    devices: GatedDevice<D>,
    source: S,
    notify: N,
    clock: C,
    store: Store,
    catalog: Catalog,
    config: EngineConfig,
    sync: SyncManager<GatedDevice<D>, C>,
    jobs: JobRunner<C>,
    allocator: Mutex<SlotAllocator>,
    decisions: Arc<tokio::sync::Mutex<()>>,
    polling: AtomicBool,
}

impl<D, S, N, C> Runtime<D, S, N, C>
where
    D: DeviceAdapter,
    S: ReservationSource,
    N: NotifyAdapter,
    C: Clock,
{
    /// Create a new runtime
    ///
    /// Permanent sync failures arrive on the returned receiver; feed them
    /// back through [`Runtime::handle_sync_failure`].
    pub fn new(
        deps: RuntimeDeps<D, S, N>,
        catalog: Catalog,
        config: EngineConfig,
        clock: C,
    ) -> (Self, mpsc::UnboundedReceiver<SyncFailure>) {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let devices = GatedDevice::new(deps.devices, config.command_spacing);
        let decisions = Arc::new(tokio::sync::Mutex::new(()));
        let sync = SyncManager::new(
            devices.clone(),
            clock.clone(),
            deps.store.clone(),
            config.sync_policy(),
            config.recovery_pause,
            Arc::clone(&decisions),
            failures_tx,
        );
        let jobs = JobRunner::new(clock.clone(), config.tick, config.catch_up_stagger);

        let runtime = Self {
            devices,
            source: deps.source,
            notify: deps.notify,
            clock,
            store: deps.store,
            catalog,
            config,
            sync,
            jobs,
            allocator: Mutex::new(SlotAllocator::new()),
            decisions,
            polling: AtomicBool::new(false),
        };
        (runtime, failures_rx)
    }

    pub fn jobs(&self) -> &JobRunner<C> {
        &self.jobs
    }

    pub fn sync(&self) -> &SyncManager<GatedDevice<D>, C> {
        &self.sync
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Arm the recurring jobs and start the job loops and the sweeper
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let now = self.clock.now();
        if self.catalog.groups().iter().any(|g| g.source.is_some()) {
            self.jobs.schedule(JobPayload::CalendarPoll, now);
        }
        self.jobs
            .schedule_recurring(JobPayload::CalendarPoll, self.config.poll_recurrence());
        let rotation = self
            .jobs
            .schedule_recurring(JobPayload::CredentialRotation, self.config.rotation_recurrence());
        tracing::info!(next_rotation = %rotation, "recurring jobs armed");

        let mut tasks = self.jobs.spawn(Arc::clone(self));
        tasks.push(self.sync.spawn_sweeper(self.config.sweep_interval));
        tasks
    }

    fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    fn persist(&self, op: Operation) -> Result<(), RuntimeError> {
        Ok(self.store.persist(op)?)
    }

    /// Audit failures are logged, never propagated
    fn audit(&self, entry: AuditEntry) {
        let action = entry.action;
        if let Err(e) = self.store.persist(Operation::AuditRecorded { entry }) {
            tracing::error!(?action, error = %e, "failed to record audit entry");
        }
    }

    async fn alert(&self, channel: &str, message: &str) {
        if let Err(e) = self.notify.send(channel, message).await {
            tracing::error!(channel, error = %e, "failed to send notification");
        }
    }

    fn lock_allocator(&self) -> std::sync::MutexGuard<'_, SlotAllocator> {
        self.allocator.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reservation(&self, id: &ReservationId) -> Result<Reservation, RuntimeError> {
        self.store
            .read(|s| s.reservation(id).cloned())
            .ok_or_else(|| RuntimeError::ReservationNotFound(id.clone()))
    }

    fn device(&self, id: &DeviceId) -> Result<&Device, RuntimeError> {
        self.catalog
            .device(id)
            .ok_or_else(|| RuntimeError::DeviceNotFound(id.clone()))
    }

    fn pool_of(&self, reservation: &Reservation) -> Result<SlotPool, RuntimeError> {
        self.catalog
            .group(&reservation.group)
            .map(|g| g.pool)
            .ok_or_else(|| RuntimeError::GroupNotFound(reservation.group.clone()))
    }

    fn assignments_for(&self, reservation: &ReservationId) -> Vec<Assignment> {
        self.store
            .read(|s| s.assignments_for(reservation).into_iter().cloned().collect())
    }

    /// The reservation's assignment on a device, if any
    fn assignment_on(&self, device: &DeviceId, reservation: &ReservationId) -> Option<Assignment> {
        self.store.read(|s| {
            s.assignments_for(reservation)
                .into_iter()
                .find(|a| &a.device == device)
                .cloned()
        })
    }

    /// Other reservations whose windows on this device's pool overlap `window`
    fn contenders(
        &self,
        device: &DeviceId,
        pool: SlotPool,
        reservation: &ReservationId,
        window: &Window,
    ) -> HashSet<ReservationId> {
        self.store.read(|s| {
            let mut live = HashSet::new();
            for slot in pool.slots() {
                let key = SlotKey::new(device.clone(), slot);
                live.extend(
                    s.assignments_on(&key)
                        .filter(|a| &a.reservation != reservation && a.window.overlaps(window))
                        .map(|a| a.reservation.clone()),
                );
            }
            live
        })
    }

    /// Whether the slot holds, or is getting, a code on this assignment's behalf
    fn slot_owned_by(&self, assignment: &Assignment) -> bool {
        if assignment.is_live {
            return true;
        }
        self.sync.slot(&assignment.key()).is_some_and(|s| {
            let holds_code = s.current_code.is_some() || s.target_code.is_some();
            holds_code
                && (s.reservation.as_ref() == Some(&assignment.reservation)
                    || s.current_code.as_deref() == Some(assignment.code.as_str()))
        })
    }

    /// Arm the activation and deactivation timers of one assignment
    ///
    /// Keys are derived from (device, slot, reservation), so re-arming
    /// replaces earlier timers. The activation is always armed first.
    fn arm(&self, assignment: &Assignment) {
        let now = self.now();
        let activate = JobPayload::Activate {
            device: assignment.device.clone(),
            slot: assignment.slot,
            reservation: assignment.reservation.clone(),
            code: assignment.code.clone(),
        };
        let deactivate = JobPayload::Deactivate {
            device: assignment.device.clone(),
            slot: assignment.slot,
            reservation: assignment.reservation.clone(),
        };

        if assignment.window.has_ended(now) {
            self.jobs.cancel(&activate.key());
            if assignment.is_live {
                self.jobs.schedule(deactivate, now);
            } else {
                self.jobs.cancel(&deactivate.key());
            }
            return;
        }

        if assignment.is_live {
            self.jobs.cancel(&activate.key());
        } else {
            self.jobs.schedule(activate, assignment.window.activate_at);
        }
        self.jobs.schedule(deactivate, assignment.window.deactivate_at);
    }

    /// Finalization and whole-property timers for one reservation
    fn arm_reservation_jobs(&self, reservation: &Reservation) {
        let jobs = kw_core::rehydrate::plan_reservation_jobs(
            std::iter::once(reservation),
            &self.catalog,
            &self.config,
            self.now(),
        );
        for job in jobs {
            self.jobs.schedule(job.payload, job.run_at);
        }
    }

    /// Slot for an assignment whose window moves to `window`
    ///
    /// The current slot is kept unless another stay on it overlaps the new
    /// window. A code not yet on the lock may move to the pool's other slot;
    /// a code on the lock, or on its way there, never moves.
    fn reslot(
        &self,
        assignment: &Assignment,
        pool: SlotPool,
        window: &Window,
    ) -> Result<u8, RuntimeError> {
        let clashes: Vec<(u8, Vec<ReservationId>)> = self.store.read(|s| {
            pool.slots()
                .into_iter()
                .map(|slot| {
                    let key = SlotKey::new(assignment.device.clone(), slot);
                    let others = s
                        .assignments_on(&key)
                        .filter(|a| {
                            a.reservation != assignment.reservation && a.window.overlaps(window)
                        })
                        .map(|a| a.reservation.clone())
                        .collect();
                    (slot, others)
                })
                .collect()
        });

        let free = |slot: u8| {
            clashes
                .iter()
                .any(|(candidate, others)| *candidate == slot && others.is_empty())
        };
        if free(assignment.slot) {
            return Ok(assignment.slot);
        }
        if !self.slot_owned_by(assignment) {
            if let Some(slot) = pool.slots().into_iter().find(|slot| free(*slot)) {
                return Ok(slot);
            }
        }

        let mut occupants: Vec<ReservationId> =
            clashes.into_iter().flat_map(|(_, others)| others).collect();
        occupants.sort();
        occupants.dedup();
        Err(AllocationError::Capacity {
            device: assignment.device.clone(),
            pool,
            occupants,
        }
        .into())
    }

    /// Persist an assignment and arm it; caller holds the allocator
    ///
    /// When `previous` sat on another slot its record and timers go first.
    fn store_assignment(
        &self,
        allocator: &mut SlotAllocator,
        previous: Option<&Assignment>,
        assignment: &Assignment,
    ) -> Result<(), RuntimeError> {
        if let Some(previous) = previous.filter(|p| p.slot != assignment.slot) {
            self.jobs.cancel(&JobKey::activate(
                &previous.device,
                previous.slot,
                &previous.reservation,
            ));
            self.jobs.cancel(&JobKey::deactivate(
                &previous.device,
                previous.slot,
                &previous.reservation,
            ));
            self.persist(Operation::AssignmentDeleted {
                key: previous.key(),
                reservation: previous.reservation.clone(),
            })?;
            allocator.release(&previous.key(), &previous.reservation);
            allocator.occupy(assignment.key(), assignment.reservation.clone());
            tracing::info!(
                reservation = %assignment.reservation,
                from = %previous.key(),
                to = %assignment.key(),
                "assignment moved to the other slot"
            );
        }
        self.persist(Operation::AssignmentUpserted {
            assignment: assignment.clone(),
        })?;
        self.arm(assignment);
        Ok(())
    }

    /// Allocate slots and arm timers for a reservation on every device its
    /// group grants access to.
    ///
    /// Idempotent: existing assignments with an unchanged code and window
    /// are returned untouched. All-or-nothing: a capacity error releases the
    /// slots this call allocated and records nothing.
    pub fn schedule_for_reservation(
        &self,
        reservation: &Reservation,
        code: &str,
    ) -> Result<Vec<Assignment>, RuntimeError> {
        validate_code(code)?;
        let pool = self.pool_of(reservation)?;
        let now = self.now();

        let mut allocator = self.lock_allocator();
        let mut planned: Vec<(Option<Assignment>, Assignment)> = Vec::new();
        if !reservation.is_blocked {
            let mut taken: Vec<SlotKey> = Vec::new();

            for device in self.catalog.devices_serving(&reservation.group) {
                let time_override = self
                    .store
                    .read(|s| s.override_for(&reservation.id, &device.id).cloned());
                let window = window_for(device, reservation, time_override.as_ref());

                if let Some(existing) = self.assignment_on(&device.id, &reservation.id) {
                    if existing.code == code && existing.window == window {
                        continue;
                    }
                    let slot = if existing.window == window {
                        Ok(existing.slot)
                    } else {
                        self.reslot(&existing, pool, &window)
                    };
                    let slot = match slot {
                        Ok(slot) => slot,
                        Err(e) => {
                            release_taken(&mut allocator, &taken, &reservation.id);
                            tracing::warn!(
                                reservation = %reservation.id,
                                error = %e,
                                "window no longer fits"
                            );
                            return Err(e);
                        }
                    };
                    // A lock still holding the old code is written again
                    let is_live =
                        existing.is_live && (existing.code == code || window.has_ended(now));
                    let updated = Assignment {
                        slot,
                        code: code.to_string(),
                        window,
                        is_live,
                        ..existing.clone()
                    };
                    planned.push((Some(existing), updated));
                    continue;
                }

                let live = self.contenders(&device.id, pool, &reservation.id, &window);
                let held = allocator.held_by(&device.id, pool, &reservation.id);
                let slot = match allocator.allocate(&device.id, pool, &reservation.id, &live) {
                    Ok(slot) => slot,
                    Err(e) => {
                        release_taken(&mut allocator, &taken, &reservation.id);
                        tracing::warn!(reservation = %reservation.id, error = %e, "allocation failed");
                        return Err(e.into());
                    }
                };
                if held.is_none() {
                    taken.push(SlotKey::new(device.id.clone(), slot));
                }
                planned.push((
                    None,
                    Assignment::new(device.id.clone(), slot, reservation.id.clone(), code, window),
                ));
            }
        }

        self.persist(Operation::ReservationUpserted {
            reservation: reservation.clone(),
        })?;
        for (previous, assignment) in &planned {
            self.store_assignment(&mut allocator, previous.as_ref(), assignment)?;
            tracing::info!(
                key = %assignment.key(),
                reservation = %assignment.reservation,
                window = %assignment.window,
                "assignment scheduled"
            );
        }
        drop(allocator);

        Ok(self.assignments_for(&reservation.id))
    }

    /// Store and schedule a reservation with its derived code, plus its
    /// finalization and whole-property timers
    pub fn schedule_reservation(
        &self,
        reservation: &Reservation,
    ) -> Result<Vec<Assignment>, RuntimeError> {
        let result = match reservation.code() {
            Some(code) => self.schedule_for_reservation(reservation, &code),
            None => {
                self.persist(Operation::ReservationUpserted {
                    reservation: reservation.clone(),
                })?;
                Err(RuntimeError::MissingCode(reservation.id.clone()))
            }
        };
        // A refused allocation stores nothing; the next poll tries again
        let stored = self
            .store
            .read(|s| s.reservation(&reservation.id).is_some());
        if stored && !reservation.is_blocked {
            self.arm_reservation_jobs(reservation);
        }
        result
    }

    /// Where one device's assignment goes when its window is recomputed
    ///
    /// Returns the stored assignment and its moved copy, or `None` when the
    /// window is unchanged. Nothing is written.
    fn plan_retime(
        &self,
        reservation: &Reservation,
        device: &Device,
        time_override: Option<&TimeOverride>,
    ) -> Result<Option<(Assignment, Assignment)>, RuntimeError> {
        let window = window_for(device, reservation, time_override);
        let Some(assignment) = self.assignment_on(&device.id, &reservation.id) else {
            return Ok(None);
        };
        if assignment.window == window {
            return Ok(None);
        }
        let pool = self.pool_of(reservation)?;
        let slot = self.reslot(&assignment, pool, &window)?;
        let moved = Assignment {
            slot,
            window,
            ..assignment.clone()
        };
        Ok(Some((assignment, moved)))
    }

    fn apply_retime(
        &self,
        allocator: &mut SlotAllocator,
        previous: &Assignment,
        moved: &Assignment,
    ) -> Result<(), RuntimeError> {
        tracing::info!(
            key = %moved.key(),
            from = %previous.window,
            to = %moved.window,
            "window moved"
        );
        self.store_assignment(allocator, Some(previous), moved)
    }

    /// Store new stay dates and move every window with them
    ///
    /// Nothing is written when a moved window no longer fits its pool.
    fn move_stay(&self, updated: &Reservation) -> Result<(), RuntimeError> {
        let mut allocator = self.lock_allocator();
        let mut moves = Vec::new();
        for device in self.catalog.devices_serving(&updated.group) {
            let time_override = self
                .store
                .read(|s| s.override_for(&updated.id, &device.id).cloned());
            moves.extend(self.plan_retime(updated, device, time_override.as_ref())?);
        }
        self.persist(Operation::ReservationUpserted {
            reservation: updated.clone(),
        })?;
        for (previous, moved) in &moves {
            self.apply_retime(&mut allocator, previous, moved)?;
        }
        Ok(())
    }

    /// Replace the computed times of a reservation on one device
    ///
    /// Only the supplied sides change. An override on a room device is
    /// copied to every bathroom device serving the same group. Returns the
    /// effective window on the requested device. An override that would put
    /// two stays on one slot is refused and nothing is stored.
    pub fn set_time_override(
        &self,
        reservation_id: &ReservationId,
        device_id: &DeviceId,
        activate_at: Option<NaiveDateTime>,
        deactivate_at: Option<NaiveDateTime>,
        notes: Option<String>,
    ) -> Result<Window, RuntimeError> {
        let reservation = self.reservation(reservation_id)?;
        let device = self.device(device_id)?;
        if !device.serves(&reservation.group) {
            return Err(RuntimeError::NotServed {
                device: device_id.clone(),
                group: reservation.group.clone(),
            });
        }

        let merged = self
            .store
            .read(|s| s.override_for(reservation_id, device_id).cloned())
            .unwrap_or_else(|| TimeOverride::new(reservation_id.clone(), device_id.clone()))
            .merged(activate_at, deactivate_at, notes);
        let mut overrides = vec![(device, merged.clone())];
        if device.category == DeviceCategory::Room {
            overrides.extend(
                self.catalog
                    .devices_serving(&reservation.group)
                    .filter(|d| d.category == DeviceCategory::Bathroom)
                    .map(|bathroom| (bathroom, merged.pegged_to(bathroom.id.clone()))),
            );
        }

        let mut allocator = self.lock_allocator();
        let mut moves = Vec::new();
        for (target, time_override) in &overrides {
            moves.extend(self.plan_retime(&reservation, target, Some(time_override))?);
        }
        for (target, time_override) in &overrides {
            self.persist(Operation::OverrideSet {
                time_override: time_override.clone(),
            })?;
            if target.id != *device_id {
                tracing::info!(room = %device_id, bathroom = %target.id, "pegged override");
            }
        }
        for (previous, moved) in &moves {
            self.apply_retime(&mut allocator, previous, moved)?;
        }
        drop(allocator);

        let window = window_for(device, &reservation, Some(&merged));
        self.audit(
            AuditEntry::new(AuditAction::OverrideSet, self.now())
                .device(device_id)
                .reservation(reservation_id)
                .details(window.to_string()),
        );
        Ok(window)
    }

    /// Clear every slot holding this reservation's code; caller holds the
    /// decision lock
    async fn clear_owned(&self, reservation: &ReservationId) -> Result<usize, RuntimeError> {
        let mut cleared = 0;
        for assignment in self.assignments_for(reservation) {
            if !self.slot_owned_by(&assignment) {
                continue;
            }
            match self
                .sync
                .clear(&assignment.device, assignment.slot, Some(reservation))
                .await
            {
                Ok(()) => cleared += 1,
                Err(e) => tracing::warn!(
                    key = %assignment.key(),
                    error = %e,
                    "clear failed, left to the sweep"
                ),
            }
            if assignment.is_live {
                self.persist(Operation::AssignmentLive {
                    key: assignment.key(),
                    reservation: reservation.clone(),
                    is_live: false,
                })?;
            }
        }
        Ok(cleared)
    }

    /// Administratively revoke a reservation's codes; its timers stay armed
    /// and are skipped while it is disabled
    pub async fn disable(&self, id: &ReservationId) -> Result<usize, RuntimeError> {
        self.reservation(id)?;
        let _decision = self.decisions.lock().await;
        self.persist(Operation::ReservationDisabled {
            id: id.clone(),
            disabled: true,
        })?;
        let cleared = self.clear_owned(id).await?;
        self.audit(
            AuditEntry::new(AuditAction::ReservationDisabled, self.now())
                .reservation(id)
                .details(format!("{cleared} slot(s) cleared")),
        );
        tracing::info!(reservation = %id, cleared, "reservation disabled");
        Ok(cleared)
    }

    /// Lift a disable and re-arm every timer of the reservation
    ///
    /// Windows already open are re-activated via catch-up; the count of
    /// those is returned.
    pub fn enable(&self, id: &ReservationId) -> Result<usize, RuntimeError> {
        self.reservation(id)?;
        self.persist(Operation::ReservationDisabled {
            id: id.clone(),
            disabled: false,
        })?;
        let reservation = self.reservation(id)?;

        let now = self.now();
        let mut requeued = 0;
        for assignment in self.assignments_for(id) {
            if !assignment.is_live && assignment.window.contains(now) {
                requeued += 1;
            }
            self.arm(&assignment);
        }
        self.arm_reservation_jobs(&reservation);
        self.audit(
            AuditEntry::new(AuditAction::ReservationEnabled, now)
                .reservation(id)
                .details(format!("{requeued} activation(s) queued")),
        );
        Ok(requeued)
    }

    /// Remove a reservation: timers cancelled, live codes cleared before the
    /// assignments are deleted
    pub async fn cancel_reservation(&self, id: &ReservationId) -> Result<(), RuntimeError> {
        self.reservation(id)?;
        let cancelled = self.jobs.cancel_reservation(id);

        let _decision = self.decisions.lock().await;
        let cleared = self.clear_owned(id).await?;
        for assignment in self.assignments_for(id) {
            self.persist(Operation::AssignmentDeleted {
                key: assignment.key(),
                reservation: id.clone(),
            })?;
        }
        self.lock_allocator().release_all(id);
        self.persist(Operation::ReservationDeleted { id: id.clone() })?;

        self.audit(
            AuditEntry::new(AuditAction::ReservationCancelled, self.now())
                .reservation(id)
                .details(format!("{cancelled} timer(s) cancelled, {cleared} slot(s) cleared")),
        );
        tracing::info!(reservation = %id, cancelled, cleared, "reservation cancelled");
        Ok(())
    }

    /// Force every pool slot of every device to its expected state: the
    /// code of the assignment whose window contains now, otherwise empty
    pub async fn resync_all(&self) -> Result<ResyncSummary, RuntimeError> {
        let _decision = self.decisions.lock().await;
        let now = self.now();
        let mut summary = ResyncSummary::default();

        for device in self.catalog.devices() {
            for pool in self.catalog.pools_on(device) {
                for slot in pool.slots() {
                    let key = SlotKey::new(device.id.clone(), slot);
                    let (expected, stale): (Option<Assignment>, Vec<Assignment>) =
                        self.store.read(|s| {
                            let expected = s
                                .assignments_on(&key)
                                .find(|a| {
                                    a.window.contains(now)
                                        && s.reservation(&a.reservation)
                                            .is_some_and(Reservation::is_schedulable)
                                })
                                .cloned();
                            let stale = s
                                .assignments_on(&key)
                                .filter(|a| {
                                    a.is_live
                                        && Some(&a.reservation)
                                            != expected.as_ref().map(|e| &e.reservation)
                                })
                                .cloned()
                                .collect();
                            (expected, stale)
                        });

                    for assignment in stale {
                        self.persist(Operation::AssignmentLive {
                            key: key.clone(),
                            reservation: assignment.reservation,
                            is_live: false,
                        })?;
                    }

                    let result = match &expected {
                        Some(assignment) => {
                            let result = self
                                .sync
                                .set(&key.device, slot, &assignment.code, Some(&assignment.reservation))
                                .await;
                            if result.is_ok() {
                                summary.set += 1;
                                if !assignment.is_live {
                                    self.persist(Operation::AssignmentLive {
                                        key: key.clone(),
                                        reservation: assignment.reservation.clone(),
                                        is_live: true,
                                    })?;
                                }
                            }
                            result
                        }
                        None => {
                            let result = self.sync.clear(&key.device, slot, None).await;
                            if result.is_ok() {
                                summary.cleared += 1;
                            }
                            result
                        }
                    };
                    if let Err(e) = result {
                        summary.failed += 1;
                        tracing::warn!(%key, error = %e, "resync command failed");
                    }
                }
            }
        }

        self.audit(AuditEntry::new(AuditAction::Resync, now).details(format!(
            "set {}, cleared {}, failed {}",
            summary.set, summary.cleared, summary.failed
        )));
        tracing::info!(
            set = summary.set,
            cleared = summary.cleared,
            failed = summary.failed,
            "resync finished"
        );
        Ok(summary)
    }

    pub fn get_sync_status(&self) -> SyncStatus {
        SyncStatus {
            failed_slots: self.sync.failed_slots(),
            in_progress_slots: self.sync.in_progress_slots(),
        }
    }

    pub async fn retry_failed_slot(&self, device: &DeviceId, slot: u8) -> Result<(), RuntimeError> {
        let key = SlotKey::new(device.clone(), slot);
        let _decision = self.decisions.lock().await;
        self.sync.retry_failed(&key).await
    }

    /// Retry every failed slot; returns how many were re-issued successfully
    pub async fn retry_all_failed(&self) -> usize {
        let mut retried = 0;
        for failed in self.sync.failed_slots() {
            match self.retry_failed_slot(&failed.device, failed.slot).await {
                Ok(()) => retried += 1,
                Err(e) => tracing::warn!(key = %failed.key(), error = %e, "retry failed"),
            }
        }
        retried
    }

    pub fn dismiss_failed_slot(&self, device: &DeviceId, slot: u8) -> Result<(), RuntimeError> {
        self.sync.dismiss_failed(&SlotKey::new(device.clone(), slot))
    }

    /// External confirmation that a device holds the code it was sent
    pub fn confirm_code(&self, device: &DeviceId, slot: u8) -> Result<bool, RuntimeError> {
        self.sync.confirm(device, slot)
    }

    /// Record and announce a slot that exhausted its retries
    pub async fn handle_sync_failure(&self, failure: SyncFailure) {
        let mut entry = AuditEntry::new(AuditAction::CodeSyncFailed, self.now())
            .device(&failure.device)
            .slot(failure.slot)
            .failed(&failure.error);
        entry.reservation = failure.reservation.clone();
        self.audit(entry);

        let message = format!(
            "Code sync failed on {} slot {} after all retries: {}",
            failure.device, failure.slot, failure.error
        );
        self.alert("code_sync", &message).await;
    }

    /// Whether a slot is currently recorded in the given state
    pub fn slot_state(&self, device: &DeviceId, slot: u8) -> Option<SyncState> {
        self.sync
            .slot(&SlotKey::new(device.clone(), slot))
            .map(|s| s.state)
    }

    /// Pending timers for one reservation's activation on a device slot
    pub fn activation_at(&self, key: &SlotKey, reservation: &ReservationId) -> Option<NaiveDateTime> {
        self.jobs
            .run_at(&JobKey::activate(&key.device, key.slot, reservation))
    }
}

fn release_taken(allocator: &mut SlotAllocator, taken: &[SlotKey], reservation: &ReservationId) {
    for key in taken {
        allocator.release(key, reservation);
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
