// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared handle over the WAL and the state it materializes

use crate::snapshot::{self, StorableState};
use crate::state::MaterializedState;
use crate::wal::{Wal, WalError};
use kw_core::Operation;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// WAL entries written before the state is snapshotted and the log truncated
pub const DEFAULT_COMPACT_AFTER: u64 = 10_000;

/// Durable store: every change is appended to the WAL, then applied
///
/// Lock order is WAL then state; `persist` holds both so memory applies
/// operations in exactly the order the log records them.
#[derive(Clone)]
pub struct Store {
    wal: Arc<Mutex<Wal>>,
    state: Arc<Mutex<MaterializedState>>,
    snapshot_path: PathBuf,
    compact_after: u64,
}

impl Store {
    /// Load the latest snapshot, replay the WAL at `path` on top of it and
    /// open the log for appending
    pub fn open(path: &Path) -> Result<Self, WalError> {
        let snapshot_path = snapshot::path_for(path);
        let (mut state, base) = match snapshot::load(&snapshot_path)? {
            Some(snapshot) => {
                let base = snapshot.sequence_at_snapshot;
                (snapshot.into_materialized(), base)
            }
            None => (MaterializedState::default(), 0),
        };
        let ops = Wal::replay_after(path, base)?;
        for op in &ops {
            state.apply(op);
        }
        let mut wal = Wal::open(path)?;
        wal.advance_to(base);
        tracing::info!(
            snapshot_sequence = base,
            operations = ops.len(),
            reservations = state.reservations.len(),
            assignments = state.assignments.len(),
            "state replayed"
        );

        Ok(Self {
            wal: Arc::new(Mutex::new(wal)),
            state: Arc::new(Mutex::new(state)),
            snapshot_path,
            compact_after: DEFAULT_COMPACT_AFTER,
        })
    }

    /// Compact once the log holds this many entries
    pub fn compact_after(mut self, entries: u64) -> Self {
        self.compact_after = entries.max(1);
        self
    }

    fn lock_wal(&self) -> MutexGuard<'_, Wal> {
        self.wal.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, MaterializedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Durably record an operation and apply it
    pub fn persist(&self, op: Operation) -> Result<(), WalError> {
        let mut wal = self.lock_wal();
        wal.append(&op)?;
        let mut state = self.lock_state();
        state.apply(&op);

        if wal.entries() >= self.compact_after {
            // The operation is already durable
            if let Err(e) = self.write_snapshot(&mut wal, &state) {
                tracing::warn!(error = %e, "compaction failed, WAL kept");
            }
        }
        Ok(())
    }

    /// Persist several operations in order, stopping at the first failure
    pub fn persist_all(&self, ops: impl IntoIterator<Item = Operation>) -> Result<(), WalError> {
        for op in ops {
            self.persist(op)?;
        }
        Ok(())
    }

    /// Snapshot the state and truncate the log; returns the snapshot sequence
    pub fn compact(&self) -> Result<u64, WalError> {
        let mut wal = self.lock_wal();
        let state = self.lock_state();
        self.write_snapshot(&mut wal, &state)
    }

    fn write_snapshot(&self, wal: &mut Wal, state: &MaterializedState) -> Result<u64, WalError> {
        let sequence = wal.sequence();
        let entries = wal.entries();
        snapshot::write(
            &self.snapshot_path,
            &StorableState::from_materialized(state, sequence),
        )?;
        wal.truncate()?;
        tracing::info!(sequence, entries, "state snapshot written, WAL truncated");
        Ok(sequence)
    }

    /// Read from the materialized state
    pub fn read<T>(&self, f: impl FnOnce(&MaterializedState) -> T) -> T {
        let state = self.lock_state();
        f(&state)
    }

    pub fn sequence(&self) -> u64 {
        self.lock_wal().sequence()
    }

    /// Entries in the log since the last compaction
    pub fn wal_entries(&self) -> u64 {
        self.lock_wal().entries()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
