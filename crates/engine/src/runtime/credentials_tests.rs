// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::super::test_support::*;
use super::*;
use kw_core::{JobKey, JobKind, Reservation};
use std::collections::HashSet;
use std::time::Duration;

fn all_devices() -> [DeviceId; 4] {
    [room(), bath(), front(), kitchen()]
}

fn house_stay(h: &Harness) -> ReservationId {
    let reservation = Reservation::new("h1", HOUSE_GROUP, "Family", date(20), date(24))
        .with_phone("5550106060");
    h.runtime.schedule_reservation(&reservation).unwrap();
    reservation.id
}

#[tokio::test(start_paused = true)]
async fn master_code_goes_to_slot_one_everywhere() {
    let h = Harness::new();

    let summary = h.runtime.set_master_code("1234").await.unwrap();

    assert_eq!(summary.succeeded, 4);
    assert!(summary.failed.is_empty());
    for device in all_devices() {
        assert_eq!(h.devices.code_at(&device, MASTER_SLOT).as_deref(), Some("1234"));
    }
    assert_eq!(h.runtime.store().read(|s| s.master_codes.len()), 4);
    assert_eq!(h.audit(AuditAction::MasterCodeSet).len(), 4);
    assert!(h.notify.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_backoff() {
    let h = Harness::new();
    h.devices.fail_next(&kitchen(), 2);
    let started = tokio::time::Instant::now();

    let summary = h.runtime.set_master_code("1234").await.unwrap();

    assert_eq!(summary.succeeded, 4);
    assert_eq!(h.devices.code_at(&kitchen(), MASTER_SLOT).as_deref(), Some("1234"));
    // 5s then 10s of backoff on top of command spacing
    assert!(started.elapsed() >= Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn exhausted_master_code_is_stored_and_reported() {
    let h = Harness::new();
    h.devices.fail_next(&kitchen(), 4);

    let summary = h.runtime.set_master_code("1234").await.unwrap();

    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, kitchen());
    assert_eq!(
        h.runtime
            .store()
            .read(|s| s.master_codes.get(&kitchen()).cloned())
            .as_deref(),
        Some("1234")
    );
    let calls = h.notify.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].channel, "credentials");
    assert!(calls[0].message.contains("lock.kitchen"));
    assert!(!calls[0].message.contains("1234"));
}

#[tokio::test(start_paused = true)]
async fn malformed_master_code_sends_nothing() {
    let h = Harness::new();

    let err = h.runtime.set_master_code("12").await.unwrap_err();

    assert!(matches!(err, RuntimeError::InvalidCode(_)));
    assert!(h.devices.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rotation_gives_every_device_its_own_four_digit_code() {
    let h = Harness::new();

    let summary = h.runtime.rotate_emergency_codes().await.unwrap();

    assert_eq!(summary.succeeded, 4);
    let stored = h.runtime.store().read(|s| s.emergency_codes.clone());
    for device in all_devices() {
        let code = h.devices.code_at(&device, EMERGENCY_SLOT).unwrap();
        let value: u32 = code.parse().unwrap();
        assert!((1000..=9999).contains(&value));
        assert_eq!(stored.get(&device), Some(&code));
    }
}

#[test]
fn drawing_skips_codes_already_on_the_device() {
    let taken: HashSet<String> = ["4821", "1111"].into_iter().map(String::from).collect();
    let mut draws = ["4821", "1111", "4821", "2718"].into_iter();

    let code = draw_free_code(&taken, || draws.next().unwrap().to_string());

    assert_eq!(code, "2718");
    assert!(draws.next().is_none());
}

#[tokio::test(start_paused = true)]
async fn rotation_avoids_guest_and_master_codes() {
    let h = Harness::starting_at(at(20, 13, 0));
    h.runtime
        .schedule_reservation(&stay("r1", 20, 22, "5550104821"))
        .unwrap();
    h.runtime
        .schedule_reservation(&stay("r2", 22, 24, "5550102222"))
        .unwrap();
    h.drain().await;
    h.runtime.set_master_code("9911").await.unwrap();

    let taken = h.runtime.codes_in_use(&room());
    for code in ["4821", "2222", "9911"] {
        assert!(taken.contains(code), "{code} missing");
    }
    assert!(!h.runtime.codes_in_use(&kitchen()).contains("4821"));

    h.runtime.rotate_emergency_codes().await.unwrap();
    let rotated = h.devices.code_at(&room(), EMERGENCY_SLOT).unwrap();
    assert!(!taken.contains(&rotated));
}

#[tokio::test(start_paused = true)]
async fn emergency_code_for_one_device() {
    let h = Harness::new();

    h.runtime.set_emergency_code(&front(), "90210").await.unwrap();
    assert_eq!(h.devices.code_at(&front(), EMERGENCY_SLOT).as_deref(), Some("90210"));

    let err = h
        .runtime
        .set_emergency_code(&DeviceId::from("lock.garage"), "90210")
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::DeviceNotFound(_)));

    h.devices.set_unreachable(&room(), true);
    let err = h
        .runtime
        .set_emergency_code(&room(), "90210")
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Device(DeviceError::Unreachable(_))));
    assert_eq!(h.notify.calls().len(), 1);
    assert_eq!(h.audit(AuditAction::EmergencyCodeSet).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn whole_property_stay_arms_lock_routines() {
    let h = Harness::new();
    let id = house_stay(&h);

    assert_eq!(
        h.runtime
            .jobs()
            .run_at(&JobKey::for_reservation(JobKind::PropertyCheckIn, &id)),
        Some(at(20, 14, 30))
    );
    assert_eq!(
        h.runtime
            .jobs()
            .run_at(&JobKey::for_reservation(JobKind::PropertyCheckOut, &id)),
        Some(at(24, 11, 30))
    );
}

#[tokio::test(start_paused = true)]
async fn check_in_unlocks_and_check_out_locks_internal_doors() {
    let h = Harness::new();
    let id = house_stay(&h);

    let summary = h.runtime.property_check_in(&id).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(h.devices.auto_relock(&kitchen()), Some(false));
    assert_eq!(h.devices.is_locked(&kitchen()), Some(false));
    // The entry door is never toggled
    assert_eq!(h.devices.is_locked(&front()), None);

    h.runtime.property_check_out(&id).await.unwrap();
    assert_eq!(h.devices.auto_relock(&kitchen()), Some(true));
    assert_eq!(h.devices.is_locked(&kitchen()), Some(true));
    assert_eq!(h.audit(AuditAction::PropertyUnlock).len(), 1);
    assert_eq!(h.audit(AuditAction::PropertyLock).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_lock_routine_is_reported() {
    let h = Harness::new();
    let id = house_stay(&h);
    h.devices.set_unreachable(&kitchen(), true);

    let summary = h.runtime.property_check_out(&id).await.unwrap();

    assert_eq!(summary.failed.len(), 1);
    assert!(!h.audit(AuditAction::PropertyLock)[0].success);
    let calls = h.notify.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].channel, "property");
}
