// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup rehydration planning
//!
//! Translates stored assignments and reservations into the jobs the
//! scheduler must hold again after a restart. Nothing here touches timers:
//! the engine feeds the planned jobs to its scheduler, which routes those
//! already due to the catch-up queue.

use crate::assignment::Assignment;
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::id::ReservationId;
use crate::job::{Job, JobPayload};
use crate::reservation::Reservation;
use crate::slot::SlotKey;
use crate::sync::{SlotSync, SyncState};
use chrono::NaiveDateTime;
use std::collections::HashMap;

/// How a stored assignment is brought back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Window not yet open: activation and deactivation as normal
    Pending,
    /// Window open but the slot does not hold the code: catch up
    MissedActivation,
    /// Window open and the slot already holds the code: deactivation only
    AlreadyLive,
    /// Window closed while the code may still be on the device
    MissedDeactivation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ReservationMissing,
    NotSchedulable,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RehydratedAssignment {
    pub key: SlotKey,
    pub reservation: ReservationId,
    pub disposition: Disposition,
    /// Jobs in arming order; activation always precedes deactivation
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RehydrationPlan {
    pub assignments: Vec<RehydratedAssignment>,
    pub skipped: Vec<(SlotKey, ReservationId, SkipReason)>,
}

impl RehydrationPlan {
    pub fn count(&self, disposition: Disposition) -> usize {
        self.assignments
            .iter()
            .filter(|a| a.disposition == disposition)
            .count()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.assignments.iter().flat_map(|a| a.jobs.iter())
    }
}

fn slot_holds(assignment: &Assignment, sync: Option<&SlotSync>) -> bool {
    sync.is_some_and(|s| {
        s.state == SyncState::Active && s.current_code.as_deref() == Some(assignment.code.as_str())
    })
}

fn code_may_remain(assignment: &Assignment, sync: Option<&SlotSync>) -> bool {
    assignment.is_live
        || sync.is_some_and(|s| {
            s.current_code.as_deref() == Some(assignment.code.as_str())
                && s.reservation.as_ref() == Some(&assignment.reservation)
        })
}

fn activate_job(assignment: &Assignment, run_at: NaiveDateTime) -> Job {
    Job::new(
        JobPayload::Activate {
            device: assignment.device.clone(),
            slot: assignment.slot,
            reservation: assignment.reservation.clone(),
            code: assignment.code.clone(),
        },
        run_at,
    )
}

fn deactivate_job(assignment: &Assignment, run_at: NaiveDateTime) -> Job {
    Job::new(
        JobPayload::Deactivate {
            device: assignment.device.clone(),
            slot: assignment.slot,
            reservation: assignment.reservation.clone(),
        },
        run_at,
    )
}

/// Plan the activation and deactivation jobs for stored assignments
pub fn plan_assignments<'a>(
    assignments: impl IntoIterator<Item = &'a Assignment>,
    reservations: &HashMap<ReservationId, Reservation>,
    slots: &HashMap<SlotKey, SlotSync>,
    now: NaiveDateTime,
) -> RehydrationPlan {
    let mut plan = RehydrationPlan::default();

    for assignment in assignments {
        let key = assignment.key();
        let skip = |reason| (key.clone(), assignment.reservation.clone(), reason);

        let Some(reservation) = reservations.get(&assignment.reservation) else {
            plan.skipped.push(skip(SkipReason::ReservationMissing));
            continue;
        };
        if !reservation.is_schedulable() {
            plan.skipped.push(skip(SkipReason::NotSchedulable));
            continue;
        }

        let sync = slots.get(&key);
        let window = assignment.window;
        let (disposition, jobs) = if window.has_ended(now) {
            if !code_may_remain(assignment, sync) {
                plan.skipped.push(skip(SkipReason::Ended));
                continue;
            }
            (
                Disposition::MissedDeactivation,
                vec![deactivate_job(assignment, now)],
            )
        } else if !window.has_started(now) {
            (
                Disposition::Pending,
                vec![
                    activate_job(assignment, window.activate_at),
                    deactivate_job(assignment, window.deactivate_at),
                ],
            )
        } else if slot_holds(assignment, sync) {
            (
                Disposition::AlreadyLive,
                vec![deactivate_job(assignment, window.deactivate_at)],
            )
        } else {
            (
                Disposition::MissedActivation,
                vec![
                    activate_job(assignment, now),
                    deactivate_job(assignment, window.deactivate_at),
                ],
            )
        };

        plan.assignments.push(RehydratedAssignment {
            key,
            reservation: assignment.reservation.clone(),
            disposition,
            jobs,
        });
    }

    plan
}

/// Plan finalization and whole-property jobs for stored reservations
pub fn plan_reservation_jobs<'a>(
    reservations: impl IntoIterator<Item = &'a Reservation>,
    catalog: &Catalog,
    config: &EngineConfig,
    now: NaiveDateTime,
) -> Vec<Job> {
    let mut jobs = Vec::new();

    for reservation in reservations {
        if !reservation.is_schedulable() {
            continue;
        }

        if reservation.locked_code.is_none() && now.date() <= reservation.check_in {
            jobs.push(Job::new(
                JobPayload::Finalize {
                    reservation: reservation.id.clone(),
                },
                config.finalize_at(reservation.check_in),
            ));
        }

        let whole_property = catalog
            .group(&reservation.group)
            .is_some_and(|g| g.is_whole_property());
        if !whole_property {
            continue;
        }

        let check_in_at = config.property_check_in_at(reservation.check_in);
        if check_in_at > now {
            jobs.push(Job::new(
                JobPayload::PropertyCheckIn {
                    reservation: reservation.id.clone(),
                },
                check_in_at,
            ));
        }
        let check_out_at = config.property_check_out_at(reservation.check_out);
        if check_out_at > now {
            jobs.push(Job::new(
                JobPayload::PropertyCheckOut {
                    reservation: reservation.id.clone(),
                },
                check_out_at,
            ));
        }
    }

    jobs
}

#[cfg(test)]
#[path = "rehydrate_tests.rs"]
mod tests;
