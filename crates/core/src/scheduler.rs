// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer queue and catch-up queue for credential jobs
//!
//! Future jobs wait in a min-heap keyed by run time. A job whose run time
//! has already passed when it is scheduled goes to a FIFO catch-up queue
//! instead, which the engine drains one job at a time. Scheduling a key
//! that is already pending replaces the earlier job; replaced heap entries
//! are left in place and skipped when popped.

use crate::id::{DeviceId, ReservationId};
use crate::job::{Job, JobKey, JobPayload, Recurrence};
use chrono::NaiveDateTime;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};

/// Where a scheduled job landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Timer,
    CatchUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapEntry {
    run_at: NaiveDateTime,
    seq: u64,
    key: JobKey,
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Min-heap: earliest first, then insertion order
        Reverse((self.run_at, self.seq)).cmp(&Reverse((other.run_at, other.seq)))
    }
}

#[derive(Debug, Clone)]
struct Pending {
    job: Job,
    seq: u64,
    recurrence: Option<Recurrence>,
}

/// Pending timer jobs plus the catch-up queue
#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<HeapEntry>,
    pending: HashMap<JobKey, Pending>,
    catch_up: VecDeque<Job>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-shot job, or queue it for catch-up if already due
    pub fn schedule(
        &mut self,
        payload: JobPayload,
        run_at: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Placement {
        let job = Job::new(payload, run_at);
        if run_at <= now {
            self.pending.remove(&job.key);
            self.catch_up.push_back(job);
            return Placement::CatchUp;
        }
        self.arm(job, None);
        Placement::Timer
    }

    /// Register a recurring job; returns its first run time
    pub fn schedule_recurring(
        &mut self,
        payload: JobPayload,
        recurrence: Recurrence,
        now: NaiveDateTime,
    ) -> NaiveDateTime {
        let run_at = recurrence.next_after(now);
        self.arm(Job::new(payload, run_at), Some(recurrence));
        run_at
    }

    fn arm(&mut self, job: Job, recurrence: Option<Recurrence>) {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.heap.push(HeapEntry {
            run_at: job.run_at,
            seq,
            key: job.key.clone(),
        });
        self.pending.insert(
            job.key.clone(),
            Pending {
                job,
                seq,
                recurrence,
            },
        );
    }

    /// Remove a timer job that has not fired yet
    ///
    /// Jobs already in the catch-up queue are not affected.
    pub fn cancel(&mut self, key: &JobKey) -> bool {
        self.pending.remove(key).is_some()
    }

    /// Take every timer job due at or before `now`, earliest first
    ///
    /// Fired jobs are forgotten before they are handed out; recurring jobs
    /// are re-armed at their next occurrence after `now`.
    pub fn poll(&mut self, now: NaiveDateTime) -> Vec<Job> {
        let mut ready = Vec::new();

        while let Some(entry) = self.heap.peek() {
            if entry.run_at > now {
                break;
            }
            let Some(entry) = self.heap.pop() else {
                break;
            };

            let current = self
                .pending
                .get(&entry.key)
                .is_some_and(|pending| pending.seq == entry.seq);
            if !current {
                continue;
            }
            let Some(pending) = self.pending.remove(&entry.key) else {
                continue;
            };

            if let Some(recurrence) = pending.recurrence {
                let mut next = recurrence.next_after(pending.job.run_at);
                while next <= now {
                    next = recurrence.next_after(next);
                }
                self.arm(
                    Job::new(pending.job.payload.clone(), next),
                    Some(recurrence),
                );
            }

            ready.push(pending.job);
        }

        ready
    }

    /// Next job from the catch-up queue
    pub fn pop_catch_up(&mut self) -> Option<Job> {
        self.catch_up.pop_front()
    }

    pub fn catch_up_len(&self) -> usize {
        self.catch_up.len()
    }

    pub fn is_scheduled(&self, key: &JobKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn run_at(&self, key: &JobKey) -> Option<NaiveDateTime> {
        self.pending.get(key).map(|p| p.job.run_at)
    }

    /// All pending timer jobs, earliest first
    pub fn pending(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.pending.values().map(|p| p.job.clone()).collect();
        jobs.sort_by(|a, b| (a.run_at, &a.key).cmp(&(b.run_at, &b.key)));
        jobs
    }

    pub fn jobs_for_reservation(&self, reservation: &ReservationId) -> Vec<Job> {
        self.pending()
            .into_iter()
            .filter(|job| job.key.reservation.as_ref() == Some(reservation))
            .collect()
    }

    pub fn jobs_for_device(&self, device: &DeviceId) -> Vec<Job> {
        self.pending()
            .into_iter()
            .filter(|job| job.key.device.as_ref() == Some(device))
            .collect()
    }

    pub fn next_fire_time(&self) -> Option<NaiveDateTime> {
        self.pending.values().map(|p| p.job.run_at).min()
    }

    /// Number of pending timer jobs
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.catch_up.is_empty()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
