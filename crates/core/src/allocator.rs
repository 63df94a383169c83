// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Slot allocation within a group's two-slot pool
//!
//! The allocator remembers which reservations were placed on every
//! (device, slot). The caller supplies the live set: the other reservations
//! whose windows overlap the requested window on that pool. A holder outside
//! the live set no longer blocks its slot, so a finished stay's slot is
//! reused even before its record is removed.

use crate::id::{DeviceId, ReservationId};
use crate::slot::{SlotKey, SlotPool};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("no free slot in pool {pool} on {device}: held by {}", join(.occupants))]
    Capacity {
        device: DeviceId,
        pool: SlotPool,
        occupants: Vec<ReservationId>,
    },
}

fn join(ids: &[ReservationId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Bookkeeping of which reservations hold each guest slot
#[derive(Debug, Clone, Default)]
pub struct SlotAllocator {
    holders: HashMap<SlotKey, Vec<ReservationId>>,
}

impl SlotAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick a slot from `pool` on `device` for `reservation`
    pub fn allocate(
        &mut self,
        device: &DeviceId,
        pool: SlotPool,
        reservation: &ReservationId,
        live: &HashSet<ReservationId>,
    ) -> Result<u8, AllocationError> {
        if let Some(slot) = self.held_by(device, pool, reservation) {
            return Ok(slot);
        }

        // Two overlapping stays already exhaust a two-slot pool
        let mut contenders: Vec<ReservationId> =
            live.iter().filter(|r| *r != reservation).cloned().collect();
        if contenders.len() >= pool.slots().len() {
            contenders.sort();
            return Err(AllocationError::Capacity {
                device: device.clone(),
                pool,
                occupants: contenders,
            });
        }

        for slot in pool.slots() {
            let key = SlotKey::new(device.clone(), slot);
            let holders = self.holders.entry(key).or_default();
            if !holders.iter().any(|holder| live.contains(holder)) {
                holders.push(reservation.clone());
                return Ok(slot);
            }
        }

        contenders.sort();
        Err(AllocationError::Capacity {
            device: device.clone(),
            pool,
            occupants: contenders,
        })
    }

    /// Slot in `pool` currently recorded for `reservation`
    pub fn held_by(
        &self,
        device: &DeviceId,
        pool: SlotPool,
        reservation: &ReservationId,
    ) -> Option<u8> {
        pool.slots()
            .into_iter()
            .find(|slot| self.occupants(&SlotKey::new(device.clone(), *slot)).contains(reservation))
    }

    /// Record a holder without allocation checks (startup seeding)
    pub fn occupy(&mut self, key: SlotKey, reservation: ReservationId) {
        let holders = self.holders.entry(key).or_default();
        if !holders.contains(&reservation) {
            holders.push(reservation);
        }
    }

    /// Reservations recorded on a slot, oldest first
    pub fn occupants(&self, key: &SlotKey) -> &[ReservationId] {
        self.holders.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Release a slot held by `reservation`
    pub fn release(&mut self, key: &SlotKey, reservation: &ReservationId) -> bool {
        let Some(holders) = self.holders.get_mut(key) else {
            return false;
        };
        let before = holders.len();
        holders.retain(|holder| holder != reservation);
        let released = holders.len() < before;
        if holders.is_empty() {
            self.holders.remove(key);
        }
        released
    }

    /// Release every slot held by a reservation
    pub fn release_all(&mut self, reservation: &ReservationId) -> usize {
        let mut released = 0;
        self.holders.retain(|_, holders| {
            let before = holders.len();
            holders.retain(|holder| holder != reservation);
            released += before - holders.len();
            !holders.is_empty()
        });
        released
    }

    pub fn clear(&mut self) {
        self.holders.clear();
    }
}

#[cfg(test)]
#[path = "allocator_tests.rs"]
mod tests;
