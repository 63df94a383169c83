// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshots for WAL compaction
//!
//! A snapshot captures the materialized state at a WAL sequence number so
//! the log can be truncated; startup loads it and replays only the entries
//! sequenced after it.

use crate::state::MaterializedState;
use chrono::{DateTime, Utc};
use kw_core::{Assignment, AuditEntry, DeviceId, Reservation, SlotSync, TimeOverride};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid snapshot format: {0}")]
    InvalidFormat(String),
}

/// Serializable version of the materialized state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorableState {
    pub version: u32,
    pub sequence_at_snapshot: u64,
    pub timestamp: DateTime<Utc>,
    pub reservations: Vec<Reservation>,
    pub assignments: Vec<Assignment>,
    pub overrides: Vec<TimeOverride>,
    pub slots: Vec<SlotSync>,
    pub master_codes: BTreeMap<DeviceId, String>,
    pub emergency_codes: BTreeMap<DeviceId, String>,
    pub audit: Vec<AuditEntry>,
}

impl StorableState {
    /// Current version of the snapshot format
    pub const CURRENT_VERSION: u32 = 1;

    pub fn from_materialized(state: &MaterializedState, sequence: u64) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            sequence_at_snapshot: sequence,
            timestamp: Utc::now(),
            reservations: state.reservations.values().cloned().collect(),
            assignments: state.assignments.values().cloned().collect(),
            overrides: state.overrides.values().cloned().collect(),
            slots: state.slots.values().cloned().collect(),
            master_codes: state
                .master_codes
                .iter()
                .map(|(device, code)| (device.clone(), code.clone()))
                .collect(),
            emergency_codes: state
                .emergency_codes
                .iter()
                .map(|(device, code)| (device.clone(), code.clone()))
                .collect(),
            audit: state.audit.clone(),
        }
    }

    pub fn into_materialized(self) -> MaterializedState {
        MaterializedState {
            reservations: self
                .reservations
                .into_iter()
                .map(|r| (r.id.clone(), r))
                .collect(),
            assignments: self
                .assignments
                .into_iter()
                .map(|a| ((a.key(), a.reservation.clone()), a))
                .collect(),
            overrides: self
                .overrides
                .into_iter()
                .map(|o| ((o.reservation.clone(), o.device.clone()), o))
                .collect(),
            slots: self.slots.into_iter().map(|s| (s.key(), s)).collect(),
            master_codes: self.master_codes.into_iter().collect(),
            emergency_codes: self.emergency_codes.into_iter().collect(),
            audit: self.audit,
        }
    }
}

/// Snapshot file kept beside a WAL
pub fn path_for(wal_path: &Path) -> PathBuf {
    wal_path.with_extension("snapshot")
}

/// Write a snapshot; the previous one is replaced only once the new one is
/// fully on disk
pub fn write(path: &Path, state: &StorableState) -> Result<(), SnapshotError> {
    let tmp = path.with_extension("snapshot.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut writer, state)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Load the snapshot at `path`, if one was ever written
pub fn load(path: &Path) -> Result<Option<StorableState>, SnapshotError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let state: StorableState = serde_json::from_reader(BufReader::new(file))?;
    if state.version != StorableState::CURRENT_VERSION {
        return Err(SnapshotError::InvalidFormat(format!(
            "unsupported version: {} (expected {})",
            state.version,
            StorableState::CURRENT_VERSION
        )));
    }
    Ok(Some(state))
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
