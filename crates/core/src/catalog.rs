// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device fleet and reservation-group catalog

use crate::id::{DeviceId, GroupId};
use crate::slot::SlotPool;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Device category, which selects default credential timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    Room,
    Bathroom,
    SharedArea,
    Entry,
    Service,
    Storage,
}

impl DeviceCategory {
    /// Interior doors toggled by whole-property check-in and check-out
    pub fn is_internal(self) -> bool {
        matches!(
            self,
            DeviceCategory::Room
                | DeviceCategory::Bathroom
                | DeviceCategory::SharedArea
                | DeviceCategory::Storage
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceCategory::Room => "room",
            DeviceCategory::Bathroom => "bathroom",
            DeviceCategory::SharedArea => "shared_area",
            DeviceCategory::Entry => "entry",
            DeviceCategory::Service => "service",
            DeviceCategory::Storage => "storage",
        }
    }
}

impl std::fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physical lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub category: DeviceCategory,
    /// Minutes added to computed times to spread commands across the fleet
    #[serde(default)]
    pub stagger_minutes: i64,
    /// Reservation-groups granted access through this device
    #[serde(default)]
    pub groups: Vec<GroupId>,
}

impl Device {
    pub fn new(id: impl Into<DeviceId>, category: DeviceCategory) -> Self {
        Self {
            id: id.into(),
            category,
            stagger_minutes: 0,
            groups: Vec::new(),
        }
    }

    pub fn with_stagger(mut self, minutes: i64) -> Self {
        self.stagger_minutes = minutes;
        self
    }

    pub fn with_group(mut self, group: impl Into<GroupId>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn serves(&self, group: &GroupId) -> bool {
        self.groups.contains(group)
    }
}

/// What kind of booking a group represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Room,
    Suite,
    WholeProperty,
}

/// A booking calendar and the slot pool its reservations draw from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationGroup {
    pub id: GroupId,
    pub kind: GroupKind,
    pub pool: SlotPool,
    /// Reference handed to the reservation source when polling
    #[serde(default)]
    pub source: Option<String>,
}

impl ReservationGroup {
    pub fn new(id: impl Into<GroupId>, kind: GroupKind, pool: SlotPool) -> Self {
        Self {
            id: id.into(),
            kind,
            pool,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn is_whole_property(&self) -> bool {
        self.kind == GroupKind::WholeProperty
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("duplicate device id: {0}")]
    DuplicateDevice(DeviceId),
    #[error("duplicate group id: {0}")]
    DuplicateGroup(GroupId),
    #[error("device {device} references unknown group {group}")]
    UnknownGroup { device: DeviceId, group: GroupId },
}

/// The fleet: every device and every reservation-group
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    devices: Vec<Device>,
    groups: Vec<ReservationGroup>,
}

impl Catalog {
    pub fn new(devices: Vec<Device>, groups: Vec<ReservationGroup>) -> Result<Self, CatalogError> {
        let mut group_ids = HashSet::new();
        for group in &groups {
            if !group_ids.insert(&group.id) {
                return Err(CatalogError::DuplicateGroup(group.id.clone()));
            }
        }

        let mut device_ids = HashSet::new();
        for device in &devices {
            if !device_ids.insert(&device.id) {
                return Err(CatalogError::DuplicateDevice(device.id.clone()));
            }
            if let Some(group) = device.groups.iter().find(|g| !group_ids.contains(g)) {
                return Err(CatalogError::UnknownGroup {
                    device: device.id.clone(),
                    group: group.clone(),
                });
            }
        }

        Ok(Self { devices, groups })
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn groups(&self) -> &[ReservationGroup] {
        &self.groups
    }

    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| &d.id == id)
    }

    pub fn group(&self, id: &GroupId) -> Option<&ReservationGroup> {
        self.groups.iter().find(|g| &g.id == id)
    }

    /// Devices a reservation of the given group gets a code on
    pub fn devices_serving<'a>(&'a self, group: &'a GroupId) -> impl Iterator<Item = &'a Device> {
        self.devices.iter().filter(move |d| d.serves(group))
    }

    /// Pools on a device that some group may allocate from
    pub fn pools_on(&self, device: &Device) -> Vec<SlotPool> {
        let mut pools: Vec<SlotPool> = Vec::new();
        for group in device.groups.iter().filter_map(|g| self.group(g)) {
            if !pools.contains(&group.pool) {
                pools.push(group.pool);
            }
        }
        pools.sort_by_key(|p| p.lower());
        pools
    }
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
