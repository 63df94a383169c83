// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup reconstruction of timers and slot ownership from stored state

use super::Runtime;
use kw_adapters::{DeviceAdapter, NotifyAdapter, ReservationSource};
use kw_core::rehydrate::{plan_assignments, plan_reservation_jobs};
use kw_core::{Assignment, Clock, Disposition, RehydrationPlan};

impl<D, S, N, C> Runtime<D, S, N, C>
where
    D: DeviceAdapter,
    S: ReservationSource,
    N: NotifyAdapter,
    C: Clock,
{
    /// Rebuild in-memory state after a restart
    ///
    /// Slot records are restored first, then allocator occupancy, then
    /// timers: windows still ahead get both timers, windows already open
    /// get a catch-up activation unless the slot already holds the code,
    /// and ended windows whose code may remain get a catch-up clear.
    pub fn rehydrate(&self) -> RehydrationPlan {
        let now = self.now();
        let (slots, assignments, reservations) = self.store.read(|s| {
            (
                s.slots.clone(),
                s.assignments.values().cloned().collect::<Vec<Assignment>>(),
                s.reservations.clone(),
            )
        });

        self.sync.restore(slots.values().cloned());

        {
            let mut allocator = self.lock_allocator();
            allocator.clear();
            for assignment in &assignments {
                if assignment.is_live || !assignment.window.has_ended(now) {
                    allocator.occupy(assignment.key(), assignment.reservation.clone());
                }
            }
        }

        let plan = plan_assignments(&assignments, &reservations, &slots, now);
        for job in plan.jobs() {
            self.jobs.schedule(job.payload.clone(), job.run_at);
        }
        let reservation_jobs =
            plan_reservation_jobs(reservations.values(), &self.catalog, &self.config, now);
        let reservation_job_count = reservation_jobs.len();
        for job in reservation_jobs {
            self.jobs.schedule(job.payload, job.run_at);
        }

        tracing::info!(
            pending = plan.count(Disposition::Pending),
            missed_activation = plan.count(Disposition::MissedActivation),
            already_live = plan.count(Disposition::AlreadyLive),
            missed_deactivation = plan.count(Disposition::MissedDeactivation),
            skipped = plan.skipped.len(),
            reservation_jobs = reservation_job_count,
            "rehydrated"
        );
        plan
    }
}

#[cfg(test)]
#[path = "rehydrate_tests.rs"]
mod tests;
