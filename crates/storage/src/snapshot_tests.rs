// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::{NaiveDate, NaiveDateTime};
use kw_core::{Operation, ReservationId, SlotKey, Window};

fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn populated() -> MaterializedState {
    let mut state = MaterializedState::default();
    let reservation = Reservation::new(
        "r1",
        "cabin",
        "Ada",
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
        NaiveDate::from_ymd_opt(2026, 3, 12).unwrap(),
    );
    let assignment = Assignment::new(
        DeviceId::from("lock.room"),
        2,
        ReservationId::from("r1"),
        "4821",
        Window::new(at(10, 12), at(12, 11)),
    );
    let time_override = TimeOverride::new(ReservationId::from("r1"), DeviceId::from("lock.room"))
        .merged(None, Some(at(12, 13)), Some("late checkout".to_string()));
    for op in [
        Operation::ReservationUpserted { reservation },
        Operation::AssignmentUpserted { assignment },
        Operation::OverrideSet { time_override },
        Operation::EmergencyCodeSet {
            device: DeviceId::from("lock.room"),
            code: "31415926".to_string(),
        },
    ] {
        state.apply(&op);
    }
    state
}

#[test]
fn snapshot_restores_the_indexed_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = path_for(&dir.path().join("state.wal"));
    assert_eq!(path.file_name().unwrap(), "state.snapshot");

    write(&path, &StorableState::from_materialized(&populated(), 7)).unwrap();
    let loaded = load(&path).unwrap().unwrap();
    assert_eq!(loaded.sequence_at_snapshot, 7);

    let state = loaded.into_materialized();
    let key = SlotKey::new(DeviceId::from("lock.room"), 2);
    let r1 = ReservationId::from("r1");
    assert!(state.reservation(&r1).is_some());
    assert_eq!(state.assignment(&key, &r1).unwrap().code, "4821");
    assert_eq!(
        state
            .override_for(&r1, &DeviceId::from("lock.room"))
            .and_then(|o| o.deactivate_at),
        Some(at(12, 13))
    );
    assert_eq!(
        state.emergency_codes.get(&DeviceId::from("lock.room")).map(String::as_str),
        Some("31415926")
    );
}

#[test]
fn missing_snapshot_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load(&dir.path().join("state.snapshot")).unwrap().is_none());
}

#[test]
fn unknown_snapshot_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.snapshot");
    let mut storable = StorableState::from_materialized(&populated(), 1);
    storable.version = 99;
    write(&path, &storable).unwrap();

    assert!(matches!(load(&path), Err(SnapshotError::InvalidFormat(_))));
}
