// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fires scheduled jobs: timers as independent tasks, overdue jobs one by one

use crate::error::RuntimeError;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use kw_core::{
    Clock, DeviceId, Job, JobKey, JobPayload, Placement, Recurrence, ReservationId, Scheduler,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Receives jobs when they fire
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, payload: JobPayload) -> Result<(), RuntimeError>;
}

/// Run one job, logging rather than propagating its outcome
async fn fire<H: JobHandler + ?Sized>(handler: &H, job: Job) {
    let span = tracing::info_span!("job", key = %job.key, run_at = %job.run_at);
    async move {
        tracing::info!("firing");
        match handler.handle(job.payload).await {
            Ok(()) => tracing::info!("job completed"),
            Err(e) => tracing::error!(error = %e, "job failed"),
        }
    }
    .instrument(span)
    .await
}

/// Owns the scheduler and the loops that drain it
pub struct JobRunner<C> {
    scheduler: Arc<Mutex<Scheduler>>,
    clock: C,
    catch_up: Arc<Notify>,
    tick: Duration,
    stagger: Duration,
}

impl<C: Clone> Clone for JobRunner<C> {
    fn clone(&self) -> Self {
        Self {
            scheduler: Arc::clone(&self.scheduler),
            clock: self.clock.clone(),
            catch_up: Arc::clone(&self.catch_up),
            tick: self.tick,
            stagger: self.stagger,
        }
    }
}

impl<C: Clock> JobRunner<C> {
    pub fn new(clock: C, tick: Duration, stagger: Duration) -> Self {
        Self {
            scheduler: Arc::new(Mutex::new(Scheduler::new())),
            clock,
            catch_up: Arc::new(Notify::new()),
            tick,
            stagger,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm a timer, or queue for catch-up when `run_at` has passed
    pub fn schedule(&self, payload: JobPayload, run_at: NaiveDateTime) -> Placement {
        let now = self.clock.now();
        let key = payload.key();
        let placement = self.lock().schedule(payload, run_at, now);
        match placement {
            Placement::Timer => tracing::debug!(%key, %run_at, "timer armed"),
            Placement::CatchUp => {
                tracing::info!(%key, %run_at, "overdue, queued for catch-up");
                self.catch_up.notify_one();
            }
        }
        placement
    }

    pub fn schedule_recurring(&self, payload: JobPayload, recurrence: Recurrence) -> NaiveDateTime {
        let now = self.clock.now();
        self.lock().schedule_recurring(payload, recurrence, now)
    }

    pub fn cancel(&self, key: &JobKey) -> bool {
        let cancelled = self.lock().cancel(key);
        if cancelled {
            tracing::debug!(%key, "timer cancelled");
        }
        cancelled
    }

    /// Cancel every pending timer of a reservation
    pub fn cancel_reservation(&self, reservation: &ReservationId) -> usize {
        let mut scheduler = self.lock();
        let keys: Vec<JobKey> = scheduler
            .jobs_for_reservation(reservation)
            .into_iter()
            .map(|job| job.key)
            .collect();
        keys.iter().filter(|key| scheduler.cancel(key)).count()
    }

    pub fn is_scheduled(&self, key: &JobKey) -> bool {
        self.lock().is_scheduled(key)
    }

    pub fn run_at(&self, key: &JobKey) -> Option<NaiveDateTime> {
        self.lock().run_at(key)
    }

    pub fn pending(&self) -> Vec<Job> {
        self.lock().pending()
    }

    pub fn jobs_for_reservation(&self, reservation: &ReservationId) -> Vec<Job> {
        self.lock().jobs_for_reservation(reservation)
    }

    pub fn jobs_for_device(&self, device: &DeviceId) -> Vec<Job> {
        self.lock().jobs_for_device(device)
    }

    pub fn catch_up_len(&self) -> usize {
        self.lock().catch_up_len()
    }

    /// Spawn every timer job that is due; each runs as its own task
    pub fn fire_due<H: JobHandler>(&self, handler: &Arc<H>) -> Vec<JoinHandle<()>> {
        let due = self.lock().poll(self.clock.now());
        due.into_iter()
            .map(|job| {
                let handler = Arc::clone(handler);
                tokio::spawn(async move { fire(handler.as_ref(), job).await })
            })
            .collect()
    }

    /// Run queued catch-up jobs one at a time until the queue is empty
    ///
    /// Each job runs in its own task so a panicking handler cannot stop the
    /// drain. Returns the number of jobs run.
    pub async fn drain_catch_up<H: JobHandler>(&self, handler: &Arc<H>) -> usize {
        let mut ran = 0;
        loop {
            let next = self.lock().pop_catch_up();
            let Some(job) = next else {
                return ran;
            };
            let key = job.key.clone();
            let handler = Arc::clone(handler);
            if let Err(e) = tokio::spawn(async move { fire(handler.as_ref(), job).await }).await {
                tracing::error!(%key, error = %e, "catch-up job aborted");
            }
            ran += 1;
            tokio::time::sleep(self.stagger).await;
        }
    }

    /// Start the timer loop and the catch-up worker
    pub fn spawn<H: JobHandler>(&self, handler: Arc<H>) -> Vec<JoinHandle<()>> {
        let timers = {
            let runner = self.clone();
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(runner.tick);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    runner.fire_due(&handler);
                }
            })
        };

        let catch_up = {
            let runner = self.clone();
            tokio::spawn(async move {
                loop {
                    let ran = runner.drain_catch_up(&handler).await;
                    if ran > 0 {
                        tracing::info!(ran, "catch-up queue drained");
                    }
                    runner.catch_up.notified().await;
                }
            })
        };

        vec![timers, catch_up]
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
