// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drives each (device, slot) toward its target code
//!
//! Sets and clears are issued directly; a periodic sweep recovers operations
//! that stay unconfirmed past the timeout and escalates slots whose retry
//! budget is spent. Every state change is persisted.

use crate::error::RuntimeError;
use kw_adapters::DeviceAdapter;
use kw_core::{
    Clock, DeviceId, Operation, ReservationId, SlotKey, SlotSync, SweepAction, SyncPolicy,
    SyncState,
};
use kw_storage::Store;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A slot that exhausted its retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub device: DeviceId,
    pub slot: u8,
    pub code: Option<String>,
    pub reservation: Option<ReservationId>,
    pub error: String,
}

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub recovered: usize,
    pub escalated: usize,
}

struct SyncInner<D, C> {
    device: D,
    clock: C,
    store: Store,
    policy: SyncPolicy,
    recovery_pause: Duration,
    slots: Mutex<HashMap<SlotKey, SlotSync>>,
    decisions: Arc<tokio::sync::Mutex<()>>,
    failures: mpsc::UnboundedSender<SyncFailure>,
}

/// Synchronization manager, one state machine per slot
pub struct SyncManager<D, C> {
    inner: Arc<SyncInner<D, C>>,
}

impl<D, C> Clone for SyncManager<D, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: DeviceAdapter, C: Clock> SyncManager<D, C> {
    /// `decisions` is held while a slot is recovered, so recovery never
    /// interleaves with an activation or deactivation of the same slot.
    pub fn new(
        device: D,
        clock: C,
        store: Store,
        policy: SyncPolicy,
        recovery_pause: Duration,
        decisions: Arc<tokio::sync::Mutex<()>>,
        failures: mpsc::UnboundedSender<SyncFailure>,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                device,
                clock,
                store,
                policy,
                recovery_pause,
                slots: Mutex::new(HashMap::new()),
                decisions,
                failures,
            }),
        }
    }

    /// Load persisted slot records; used once at startup
    ///
    /// A recovery cut short by a restart goes back in flight so the sweep
    /// picks it up again.
    pub fn restore(&self, records: impl IntoIterator<Item = SlotSync>) {
        let now = self.inner.clock.now();
        let mut slots = self.lock_slots();
        for mut record in records {
            if record.state == SyncState::Retrying {
                record.defer_retry("interrupted by restart", now);
            }
            slots.insert(record.key(), record);
        }
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<SlotKey, SlotSync>> {
        self.inner.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mutate a slot (created on first use) and persist the result
    fn update(
        &self,
        key: &SlotKey,
        f: impl FnOnce(&mut SlotSync),
    ) -> Result<SlotSync, RuntimeError> {
        let sync = {
            let mut slots = self.lock_slots();
            let sync = slots
                .entry(key.clone())
                .or_insert_with(|| SlotSync::new(key.clone()));
            f(sync);
            sync.clone()
        };
        self.inner
            .store
            .persist(Operation::SlotSynced { sync: sync.clone() })?;
        Ok(sync)
    }

    pub fn slot(&self, key: &SlotKey) -> Option<SlotSync> {
        self.lock_slots().get(key).cloned()
    }

    /// Records for every slot of a device
    pub fn slots_on(&self, device: &DeviceId) -> Vec<SlotSync> {
        let mut on: Vec<SlotSync> = self
            .lock_slots()
            .values()
            .filter(|s| &s.device == device)
            .cloned()
            .collect();
        on.sort_by_key(|s| s.slot);
        on
    }

    fn matching(&self, pred: impl Fn(&SlotSync) -> bool) -> Vec<SlotSync> {
        let mut found: Vec<SlotSync> = self
            .lock_slots()
            .values()
            .filter(|s| pred(s))
            .cloned()
            .collect();
        found.sort_by_key(SlotSync::key);
        found
    }

    pub fn failed_slots(&self) -> Vec<SlotSync> {
        self.matching(|s| s.state == SyncState::Failed)
    }

    pub fn in_progress_slots(&self) -> Vec<SlotSync> {
        self.matching(|s| s.state.is_syncing())
    }

    /// Write a code; the slot then waits for confirmation
    ///
    /// A failed write is returned immediately. The slot stays in flight so
    /// the sweep picks it up if nobody retries sooner.
    pub async fn set(
        &self,
        device: &DeviceId,
        slot: u8,
        code: &str,
        reservation: Option<&ReservationId>,
    ) -> Result<(), RuntimeError> {
        let key = SlotKey::new(device.clone(), slot);
        let now = self.inner.clock.now();
        self.update(&key, |s| s.begin_set(code, reservation.cloned(), now))?;

        match self.inner.device.write_code(device, slot, code).await {
            Ok(()) => {
                self.update(&key, SlotSync::write_accepted)?;
                tracing::info!(%key, "code written, awaiting confirmation");
                Ok(())
            }
            Err(e) => {
                self.update(&key, |s| s.record_error(e.to_string()))?;
                tracing::warn!(%key, error = %e, "code write failed");
                Err(e.into())
            }
        }
    }

    /// Remove a code; clears are authoritative once the device accepts them
    pub async fn clear(
        &self,
        device: &DeviceId,
        slot: u8,
        reservation: Option<&ReservationId>,
    ) -> Result<(), RuntimeError> {
        let key = SlotKey::new(device.clone(), slot);
        let now = self.inner.clock.now();
        self.update(&key, |s| s.begin_clear(reservation.cloned(), now))?;

        match self.inner.device.clear_code(device, slot).await {
            Ok(()) => {
                self.update(&key, SlotSync::cleared)?;
                tracing::info!(%key, "code cleared");
                Ok(())
            }
            Err(e) => {
                self.update(&key, |s| s.record_error(e.to_string()))?;
                tracing::warn!(%key, error = %e, "code clear failed");
                Err(e.into())
            }
        }
    }

    /// External signal that the device holds the target code
    pub fn confirm(&self, device: &DeviceId, slot: u8) -> Result<bool, RuntimeError> {
        let key = SlotKey::new(device.clone(), slot);
        let Some(mut sync) = self.slot(&key) else {
            return Ok(false);
        };
        if !sync.confirm() {
            tracing::debug!(%key, state = %sync.state, "confirmation ignored");
            return Ok(false);
        }
        self.update(&key, |s| {
            s.confirm();
        })?;
        tracing::info!(%key, "code confirmed");
        Ok(true)
    }

    /// Re-issue the last operation of a failed slot with a fresh budget
    pub async fn retry_failed(&self, key: &SlotKey) -> Result<(), RuntimeError> {
        let sync = match self.slot(key) {
            Some(sync) if sync.state == SyncState::Failed => sync,
            _ => return Err(RuntimeError::SlotNotFailed(key.clone())),
        };
        tracing::info!(%key, "retrying failed slot");
        match sync.target_code {
            Some(code) => {
                self.set(&key.device, key.slot, &code, sync.reservation.as_ref())
                    .await
            }
            None => {
                self.clear(&key.device, key.slot, sync.reservation.as_ref())
                    .await
            }
        }
    }

    /// Operator gave up on a failed slot
    pub fn dismiss_failed(&self, key: &SlotKey) -> Result<(), RuntimeError> {
        match self.slot(key) {
            Some(sync) if sync.state == SyncState::Failed => {}
            _ => return Err(RuntimeError::SlotNotFailed(key.clone())),
        }
        self.update(key, SlotSync::reset)?;
        tracing::info!(%key, "failed slot dismissed");
        Ok(())
    }

    /// Recover or escalate every slot stuck past the timeout
    pub async fn sweep(&self) -> Result<SweepSummary, RuntimeError> {
        let now = self.inner.clock.now();
        let policy = self.inner.policy;
        let due: Vec<SlotKey> = self
            .matching(|s| s.sweep_action(&policy, now) != SweepAction::None)
            .into_iter()
            .map(|s| s.key())
            .collect();

        let mut summary = SweepSummary::default();
        for key in due {
            let _decision = self.inner.decisions.lock().await;

            // Re-check: the slot may have moved on while waiting for the lock
            let action = self
                .slot(&key)
                .map(|s| s.sweep_action(&policy, self.inner.clock.now()))
                .unwrap_or(SweepAction::None);
            match action {
                SweepAction::None => {}
                SweepAction::Escalate => {
                    self.escalate(&key)?;
                    summary.escalated += 1;
                }
                SweepAction::Recover => {
                    self.recover(&key).await?;
                    summary.recovered += 1;
                }
            }
        }
        Ok(summary)
    }

    fn escalate(&self, key: &SlotKey) -> Result<(), RuntimeError> {
        let max_retries = self.inner.policy.max_retries;
        let sync = self.update(key, |s| s.fail(max_retries))?;
        let failure = SyncFailure {
            device: sync.device.clone(),
            slot: sync.slot,
            code: sync.target_code.clone(),
            reservation: sync.reservation.clone(),
            error: sync.last_error.clone().unwrap_or_default(),
        };
        tracing::error!(%key, error = %failure.error, "slot sync failed permanently");
        if self.inner.failures.send(failure).is_err() {
            tracing::warn!(%key, "no listener for sync failures");
        }
        Ok(())
    }

    async fn recover(&self, key: &SlotKey) -> Result<(), RuntimeError> {
        let sync = self.update(key, SlotSync::begin_retry)?;
        tracing::warn!(
            %key,
            retry = sync.retry_count,
            op = if sync.target_code.is_some() { "set" } else { "clear" },
            "recovering stuck slot"
        );
        let device = &key.device;

        if !self.inner.device.ping(device).await {
            let now = self.inner.clock.now();
            self.update(key, |s| s.defer_retry("device unreachable", now))?;
            tracing::warn!(%key, "device unreachable, will retry");
            return Ok(());
        }

        if let Err(e) = self.inner.device.clear_code(device, key.slot).await {
            let now = self.inner.clock.now();
            self.update(key, |s| s.defer_retry(e.to_string(), now))?;
            return Ok(());
        }

        tokio::time::sleep(self.inner.recovery_pause).await;

        let Some(code) = sync.target_code else {
            self.update(key, SlotSync::settled_idle)?;
            tracing::info!(%key, "recovered to idle");
            return Ok(());
        };

        let now = self.inner.clock.now();
        self.update(key, |s| s.reissued(now))?;
        match self.inner.device.write_code(device, key.slot, &code).await {
            Ok(()) => {
                self.update(key, SlotSync::write_accepted)?;
                tracing::info!(%key, "code re-issued");
            }
            Err(e) => {
                let now = self.inner.clock.now();
                self.update(key, |s| s.defer_retry(e.to_string(), now))?;
            }
        }
        Ok(())
    }

    /// Run the sweep forever on a fixed interval
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match manager.sweep().await {
                    Ok(summary) if summary != SweepSummary::default() => {
                        tracing::info!(
                            recovered = summary.recovered,
                            escalated = summary.escalated,
                            "sweep finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
