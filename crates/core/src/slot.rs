// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Physical code slots and the fixed guest slot pools

use crate::id::DeviceId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of code slots on every device
pub const SLOT_COUNT: u8 = 20;

/// Slot holding the operator master credential
pub const MASTER_SLOT: u8 = 1;

/// Slot holding the rotating emergency credential
pub const EMERGENCY_SLOT: u8 = 20;

/// Returns true for the slots outside every guest pool
pub fn is_reserved(slot: u8) -> bool {
    slot == MASTER_SLOT || slot == EMERGENCY_SLOT
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("slot pool ({0}, {1}) is not one of the fixed guest pairs")]
    NotAPair(u8, u8),
}

/// One of the fixed two-slot guest pools: (2, 3), (4, 5) ... (18, 19)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[u8; 2]", into = "[u8; 2]")]
pub struct SlotPool {
    lower: u8,
    upper: u8,
}

impl SlotPool {
    pub fn new(lower: u8, upper: u8) -> Result<Self, PoolError> {
        let valid = lower % 2 == 0
            && upper == lower + 1
            && lower > MASTER_SLOT
            && upper < EMERGENCY_SLOT;
        if !valid {
            return Err(PoolError::NotAPair(lower, upper));
        }
        Ok(Self { lower, upper })
    }

    /// Every guest pool on a device, lowest first
    pub fn all() -> impl Iterator<Item = SlotPool> {
        (MASTER_SLOT + 1..EMERGENCY_SLOT)
            .step_by(2)
            .map(|lower| SlotPool {
                lower,
                upper: lower + 1,
            })
    }

    pub fn lower(&self) -> u8 {
        self.lower
    }

    pub fn upper(&self) -> u8 {
        self.upper
    }

    /// Slots in preference order
    pub fn slots(&self) -> [u8; 2] {
        [self.lower, self.upper]
    }

    pub fn contains(&self, slot: u8) -> bool {
        slot == self.lower || slot == self.upper
    }
}

impl TryFrom<[u8; 2]> for SlotPool {
    type Error = PoolError;

    fn try_from(pair: [u8; 2]) -> Result<Self, Self::Error> {
        Self::new(pair[0], pair[1])
    }
}

impl From<SlotPool> for [u8; 2] {
    fn from(pool: SlotPool) -> Self {
        pool.slots()
    }
}

impl std::fmt::Display for SlotPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.lower, self.upper)
    }
}

/// A single (device, slot) position
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub device: DeviceId,
    pub slot: u8,
}

impl SlotKey {
    pub fn new(device: impl Into<DeviceId>, slot: u8) -> Self {
        Self {
            device: device.into(),
            slot,
        }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.device, self.slot)
    }
}

#[cfg(test)]
#[path = "slot_tests.rs"]
mod tests;
