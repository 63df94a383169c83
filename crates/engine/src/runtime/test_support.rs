// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixture for runtime tests: a small property on fake adapters

use super::{Runtime, RuntimeDeps};
use crate::sync::SyncFailure;
use chrono::{NaiveDate, NaiveDateTime};
use kw_adapters::{FakeDeviceAdapter, FakeNotifyAdapter, FakeReservationSource};
use kw_core::{
    Assignment, AuditAction, AuditEntry, Catalog, Device, DeviceCategory, DeviceId,
    EngineConfig, FakeClock, GroupKind, Reservation, ReservationGroup, ReservationId, SlotKey,
    SlotPool, SlotSync, SourceReservation,
};
use kw_storage::Store;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub(crate) type TestRuntime =
    Runtime<FakeDeviceAdapter, FakeReservationSource, FakeNotifyAdapter, FakeClock>;

pub(crate) const ROOM_GROUP: &str = "room-1";
pub(crate) const HOUSE_GROUP: &str = "house";
pub(crate) const ROOM_SOURCE: &str = "room-1";
pub(crate) const HOUSE_SOURCE: &str = "house";

pub(crate) fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, day).unwrap()
}

pub(crate) fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    date(day).and_hms_opt(hour, minute, 0).unwrap()
}

pub(crate) fn room() -> DeviceId {
    DeviceId::from("lock.room1")
}

pub(crate) fn bath() -> DeviceId {
    DeviceId::from("lock.bath1")
}

pub(crate) fn front() -> DeviceId {
    DeviceId::from("lock.front")
}

pub(crate) fn kitchen() -> DeviceId {
    DeviceId::from("lock.kitchen")
}

/// One guest room with its bathroom, a shared front door (staggered by two
/// minutes) and a kitchen only whole-property stays can open
pub(crate) fn catalog() -> Catalog {
    Catalog::new(
        vec![
            Device::new("lock.room1", DeviceCategory::Room).with_group(ROOM_GROUP),
            Device::new("lock.bath1", DeviceCategory::Bathroom).with_group(ROOM_GROUP),
            Device::new("lock.front", DeviceCategory::Entry)
                .with_stagger(2)
                .with_group(ROOM_GROUP)
                .with_group(HOUSE_GROUP),
            Device::new("lock.kitchen", DeviceCategory::SharedArea).with_group(HOUSE_GROUP),
        ],
        vec![
            ReservationGroup::new(ROOM_GROUP, GroupKind::Room, SlotPool::new(2, 3).unwrap())
                .with_source(ROOM_SOURCE),
            ReservationGroup::new(
                HOUSE_GROUP,
                GroupKind::WholeProperty,
                SlotPool::new(4, 5).unwrap(),
            )
            .with_source(HOUSE_SOURCE),
        ],
    )
    .unwrap()
}

pub(crate) fn stay(id: &str, check_in: u32, check_out: u32, phone: &str) -> Reservation {
    Reservation::new(id, ROOM_GROUP, format!("Guest {id}"), date(check_in), date(check_out))
        .with_phone(phone)
}

pub(crate) fn record(id: &str, check_in: u32, check_out: u32, phone: &str) -> SourceReservation {
    SourceReservation {
        id: ReservationId::from(id),
        guest_name: format!("Guest {id}"),
        phone: Some(phone.to_string()),
        check_in: date(check_in),
        check_out: date(check_out),
        is_blocked: false,
    }
}

pub(crate) struct Harness {
    pub dir: TempDir,
    pub devices: FakeDeviceAdapter,
    pub source: FakeReservationSource,
    pub notify: FakeNotifyAdapter,
    pub clock: FakeClock,
    pub runtime: Arc<TestRuntime>,
    pub failures: mpsc::UnboundedReceiver<SyncFailure>,
}

impl Harness {
    /// Fresh state, clock on the morning before the first test stay
    pub fn new() -> Self {
        Self::starting_at(at(19, 9, 0))
    }

    pub fn starting_at(now: NaiveDateTime) -> Self {
        Self::build(
            TempDir::new().unwrap(),
            FakeDeviceAdapter::new(),
            FakeReservationSource::new(),
            FakeNotifyAdapter::new(),
            FakeClock::at(now),
        )
    }

    fn build(
        dir: TempDir,
        devices: FakeDeviceAdapter,
        source: FakeReservationSource,
        notify: FakeNotifyAdapter,
        clock: FakeClock,
    ) -> Self {
        let store = Store::open(&dir.path().join("state.wal")).unwrap();
        let (runtime, failures) = Runtime::new(
            RuntimeDeps {
                devices: devices.clone(),
                source: source.clone(),
                notify: notify.clone(),
                store,
            },
            catalog(),
            EngineConfig::default(),
            clock.clone(),
        );
        Self {
            dir,
            devices,
            source,
            notify,
            clock,
            runtime: Arc::new(runtime),
            failures,
        }
    }

    /// Simulate a process restart at `now`: state comes back from the log,
    /// the physical locks keep whatever they hold
    pub fn restart_at(self, now: NaiveDateTime) -> Self {
        let Harness {
            dir,
            devices,
            source,
            notify,
            clock,
            runtime,
            ..
        } = self;
        drop(runtime);
        clock.set(now);
        Self::build(dir, devices, source, notify, clock)
    }

    pub fn assignment(&self, device: &DeviceId, reservation: &str) -> Option<Assignment> {
        let reservation = ReservationId::from(reservation);
        self.runtime.store().read(|s| {
            s.assignments_for(&reservation)
                .into_iter()
                .find(|a| &a.device == device)
                .cloned()
        })
    }

    pub fn reservation(&self, id: &str) -> Option<Reservation> {
        self.runtime
            .store()
            .read(|s| s.reservation(&ReservationId::from(id)).cloned())
    }

    pub fn slot(&self, device: &DeviceId, slot: u8) -> Option<SlotSync> {
        self.runtime
            .sync()
            .slot(&SlotKey::new(device.clone(), slot))
    }

    pub fn audit(&self, action: AuditAction) -> Vec<AuditEntry> {
        self.runtime.store().read(|s| {
            s.audit
                .iter()
                .filter(|e| e.action == action)
                .cloned()
                .collect()
        })
    }

    /// Run everything waiting in the catch-up queue
    pub async fn drain(&self) -> usize {
        self.runtime.jobs().drain_catch_up(&self.runtime).await
    }
}
