// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::test_support::*;
use super::*;
use kw_core::{AllocationError, JobKind};
use std::time::Duration;

fn r(id: &str) -> ReservationId {
    ReservationId::from(id)
}

#[test]
fn codes_must_be_four_to_eight_digits() {
    assert!(validate_code("4821").is_ok());
    assert!(validate_code("12345678").is_ok());
    assert!(matches!(validate_code("482"), Err(RuntimeError::InvalidCode(_))));
    assert!(matches!(validate_code("123456789"), Err(RuntimeError::InvalidCode(_))));
    assert!(matches!(validate_code("48a1"), Err(RuntimeError::InvalidCode(_))));
}

#[tokio::test(start_paused = true)]
async fn room_stay_gets_default_windows_on_every_device() {
    let h = Harness::new();

    let assignments = h
        .runtime
        .schedule_reservation(&stay("r1", 20, 22, "+1 555 010 4821"))
        .unwrap();
    assert_eq!(assignments.len(), 3);

    let room_assignment = h.assignment(&room(), "r1").unwrap();
    assert_eq!(room_assignment.slot, 2);
    assert_eq!(room_assignment.code, "4821");
    assert_eq!(room_assignment.window, Window::new(at(20, 12, 0), at(22, 11, 0)));
    assert_eq!(
        h.assignment(&bath(), "r1").unwrap().window,
        Window::new(at(20, 15, 0), at(22, 11, 0))
    );
    // Front door carries a two minute stagger
    assert_eq!(
        h.assignment(&front(), "r1").unwrap().window,
        Window::new(at(20, 11, 2), at(22, 14, 2))
    );

    assert_eq!(
        h.runtime.activation_at(&room_assignment.key(), &r("r1")),
        Some(at(20, 12, 0))
    );
    assert!(h
        .runtime
        .jobs()
        .is_scheduled(&JobKey::for_reservation(JobKind::Finalize, &r("r1"))));
    assert!(h.devices.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disjoint_stays_share_a_slot_and_a_third_overlap_is_refused() {
    let h = Harness::new();
    h.runtime
        .schedule_reservation(&stay("r1", 20, 22, "5550101111"))
        .unwrap();
    h.runtime
        .schedule_reservation(&stay("r2", 22, 24, "5550102222"))
        .unwrap();

    assert_eq!(h.assignment(&room(), "r1").unwrap().slot, 2);
    assert_eq!(h.assignment(&room(), "r2").unwrap().slot, 2);
    // Staggered entry windows overlap on the changeover day
    assert_eq!(h.assignment(&front(), "r2").unwrap().slot, 3);

    let err = h
        .runtime
        .schedule_reservation(&stay("r3", 21, 23, "5550103333"))
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Capacity(AllocationError::Capacity { .. })
    ));
    for device in [room(), bath(), front()] {
        assert!(h.assignment(&device, "r3").is_none());
    }
    assert!(h.reservation("r3").is_none());
    assert!(h.runtime.jobs().jobs_for_reservation(&r("r3")).is_empty());
}

#[tokio::test(start_paused = true)]
async fn refused_allocation_on_a_later_device_leaves_nothing_behind() {
    let h = Harness::new();
    h.runtime
        .schedule_reservation(&stay("r1", 20, 22, "5550101111"))
        .unwrap();
    h.runtime
        .schedule_reservation(&stay("r2", 22, 24, "5550102222"))
        .unwrap();

    // Room and bathroom have space, the front door does not
    let err = h
        .runtime
        .schedule_reservation(&stay("r3", 22, 23, "5550103333"))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Capacity(_)));
    assert!(h.assignment(&room(), "r3").is_none());
    assert!(h.assignment(&bath(), "r3").is_none());

    h.runtime.cancel_reservation(&r("r1")).await.unwrap();
    h.runtime
        .schedule_reservation(&stay("r3", 22, 23, "5550103333"))
        .unwrap();
    assert_eq!(h.assignment(&room(), "r3").unwrap().slot, 3);
    assert_eq!(h.assignment(&front(), "r3").unwrap().slot, 2);
}

#[tokio::test(start_paused = true)]
async fn scheduling_again_changes_nothing() {
    let h = Harness::new();
    let reservation = stay("r1", 20, 22, "5550104821");

    let first = h.runtime.schedule_reservation(&reservation).unwrap();
    let pending = h.runtime.jobs().pending();
    let second = h.runtime.schedule_reservation(&reservation).unwrap();

    assert_eq!(first, second);
    assert_eq!(pending, h.runtime.jobs().pending());
}

#[tokio::test(start_paused = true)]
async fn new_code_reuses_the_slot_and_rearms_activation() {
    let h = Harness::new();
    let reservation = stay("r1", 20, 22, "5550104821");
    h.runtime.schedule_reservation(&reservation).unwrap();

    h.runtime
        .schedule_for_reservation(&reservation, "7777")
        .unwrap();

    let assignment = h.assignment(&room(), "r1").unwrap();
    assert_eq!((assignment.slot, assignment.code.as_str()), (2, "7777"));
    let activation = h
        .runtime
        .jobs()
        .pending()
        .into_iter()
        .find(|j| j.key == JobKey::activate(&room(), 2, &r("r1")))
        .unwrap();
    assert!(matches!(activation.payload, JobPayload::Activate { ref code, .. } if code == "7777"));
}

#[tokio::test(start_paused = true)]
async fn new_code_for_a_live_stay_is_written_to_the_lock() {
    let h = Harness::starting_at(at(20, 13, 0));
    let reservation = stay("r1", 20, 22, "5550104821");
    h.runtime.schedule_reservation(&reservation).unwrap();
    h.drain().await;
    assert_eq!(h.devices.code_at(&room(), 2).as_deref(), Some("4821"));

    h.runtime
        .schedule_for_reservation(&reservation, "7777")
        .unwrap();
    assert!(!h.assignment(&room(), "r1").unwrap().is_live);
    h.drain().await;

    assert_eq!(h.devices.code_at(&room(), 2).as_deref(), Some("7777"));
    assert_eq!(h.devices.code_at(&front(), 2).as_deref(), Some("7777"));
    assert!(h.assignment(&room(), "r1").unwrap().is_live);
}

#[tokio::test(start_paused = true)]
async fn blocked_stays_are_stored_without_codes() {
    let h = Harness::new();
    let blocked = stay("owner", 20, 22, "5550101111").blocked();

    assert!(h.runtime.schedule_reservation(&blocked).unwrap().is_empty());
    assert!(h.reservation("owner").is_some());
    assert!(h.runtime.jobs().pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reservation_without_phone_is_stored_but_has_no_codes() {
    let h = Harness::new();
    let mut reservation = stay("r1", 20, 22, "5550101111");
    reservation.phone = None;

    let err = h.runtime.schedule_reservation(&reservation).unwrap_err();
    assert!(matches!(err, RuntimeError::MissingCode(_)));
    assert!(h.reservation("r1").is_some());
    assert!(h.assignment(&room(), "r1").is_none());
    // Finalization may still find a number later
    assert!(h
        .runtime
        .jobs()
        .is_scheduled(&JobKey::for_reservation(JobKind::Finalize, &r("r1"))));
}

#[tokio::test(start_paused = true)]
async fn unknown_group_and_bad_code_are_rejected() {
    let h = Harness::new();
    let mut reservation = stay("r1", 20, 22, "5550101111");

    assert!(matches!(
        h.runtime.schedule_for_reservation(&reservation, "12ab"),
        Err(RuntimeError::InvalidCode(_))
    ));

    reservation.group = "annex".into();
    assert!(matches!(
        h.runtime.schedule_for_reservation(&reservation, "1111"),
        Err(RuntimeError::GroupNotFound(_))
    ));
    assert!(h.reservation("r1").is_none());
}

#[tokio::test(start_paused = true)]
async fn room_override_is_pegged_to_bathrooms() {
    let h = Harness::new();
    h.runtime
        .schedule_reservation(&stay("r1", 20, 22, "5550104821"))
        .unwrap();

    let window = h
        .runtime
        .set_time_override(
            &r("r1"),
            &room(),
            Some(at(20, 9, 30)),
            None,
            Some("early arrival".to_string()),
        )
        .unwrap();

    let expected = Window::new(at(20, 9, 30), at(22, 11, 0));
    assert_eq!(window, expected);
    assert_eq!(h.assignment(&room(), "r1").unwrap().window, expected);
    assert_eq!(h.assignment(&bath(), "r1").unwrap().window, expected);
    assert_eq!(
        h.assignment(&front(), "r1").unwrap().window,
        Window::new(at(20, 11, 2), at(22, 14, 2))
    );

    let pegged = h
        .runtime
        .store()
        .read(|s| s.override_for(&r("r1"), &bath()).cloned())
        .unwrap();
    assert_eq!(pegged.activate_at, Some(at(20, 9, 30)));
    assert_eq!(pegged.notes.as_deref(), Some("early arrival"));
    assert_eq!(
        h.runtime
            .activation_at(&SlotKey::new(bath(), 2), &r("r1")),
        Some(at(20, 9, 30))
    );
    assert_eq!(h.audit(AuditAction::OverrideSet).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn later_override_keeps_the_side_it_does_not_name() {
    let h = Harness::new();
    h.runtime
        .schedule_reservation(&stay("r1", 20, 22, "5550104821"))
        .unwrap();

    h.runtime
        .set_time_override(&r("r1"), &front(), Some(at(20, 8, 0)), None, None)
        .unwrap();
    let window = h
        .runtime
        .set_time_override(&r("r1"), &front(), None, Some(at(22, 16, 0)), None)
        .unwrap();

    assert_eq!(window, Window::new(at(20, 8, 0), at(22, 16, 0)));
    // Entry overrides do not touch bathrooms
    assert_eq!(
        h.assignment(&bath(), "r1").unwrap().window,
        Window::new(at(20, 15, 0), at(22, 11, 0))
    );
}

#[tokio::test(start_paused = true)]
async fn early_arrival_moves_to_the_free_slot_instead_of_sharing() {
    let h = Harness::starting_at(at(20, 13, 0));
    h.runtime
        .schedule_reservation(&stay("r1", 20, 22, "5550101111"))
        .unwrap();
    h.runtime
        .schedule_reservation(&stay("r2", 22, 24, "5550102222"))
        .unwrap();
    h.drain().await;
    assert_eq!(h.assignment(&room(), "r2").unwrap().slot, 2);

    h.runtime
        .set_time_override(&r("r2"), &room(), Some(at(21, 12, 0)), None, None)
        .unwrap();

    for device in [room(), bath()] {
        let moved = h.assignment(&device, "r2").unwrap();
        assert_eq!(moved.slot, 3);
        assert_eq!(moved.window.activate_at, at(21, 12, 0));
        assert!(!h
            .runtime
            .jobs()
            .is_scheduled(&JobKey::activate(&device, 2, &r("r2"))));
        assert_eq!(
            h.runtime.activation_at(&SlotKey::new(device.clone(), 3), &r("r2")),
            Some(at(21, 12, 0))
        );
    }
    assert_eq!(h.assignment(&room(), "r1").unwrap().slot, 2);

    h.clock.set(at(21, 12, 30));
    for handle in h.runtime.jobs().fire_due(&h.runtime) {
        handle.await.unwrap();
    }
    assert_eq!(h.devices.code_at(&room(), 2).as_deref(), Some("1111"));
    assert_eq!(h.devices.code_at(&room(), 3).as_deref(), Some("2222"));
}

#[tokio::test(start_paused = true)]
async fn override_that_no_slot_can_hold_is_refused() {
    let h = Harness::new();
    h.runtime
        .schedule_reservation(&stay("r1", 20, 22, "5550101111"))
        .unwrap();
    h.runtime
        .schedule_reservation(&stay("r2", 21, 23, "5550102222"))
        .unwrap();
    h.runtime
        .schedule_reservation(&stay("r3", 23, 25, "5550103333"))
        .unwrap();
    assert_eq!(h.assignment(&room(), "r3").unwrap().slot, 2);

    let err = h
        .runtime
        .set_time_override(&r("r3"), &room(), Some(at(21, 12, 0)), None, None)
        .unwrap_err();

    match err {
        RuntimeError::Capacity(AllocationError::Capacity { occupants, .. }) => {
            assert_eq!(occupants, vec![r("r1"), r("r2")]);
        }
        other => panic!("unexpected error: {other}"),
    }
    let overrides = h.runtime.store().read(|s| {
        (
            s.override_for(&r("r3"), &room()).cloned(),
            s.override_for(&r("r3"), &bath()).cloned(),
        )
    });
    assert_eq!(overrides, (None, None));
    let kept = h.assignment(&room(), "r3").unwrap();
    assert_eq!((kept.slot, kept.window.activate_at), (2, at(23, 12, 0)));
    assert_eq!(
        h.runtime.activation_at(&SlotKey::new(room(), 2), &r("r3")),
        Some(at(23, 12, 0))
    );
    assert!(h.audit(AuditAction::OverrideSet).is_empty());
}

#[tokio::test(start_paused = true)]
async fn live_code_is_not_moved_to_make_room_for_a_later_checkout() {
    let h = Harness::starting_at(at(20, 13, 0));
    h.runtime
        .schedule_reservation(&stay("r1", 20, 22, "5550101111"))
        .unwrap();
    h.runtime
        .schedule_reservation(&stay("r2", 21, 23, "5550102222"))
        .unwrap();
    h.runtime
        .schedule_reservation(&stay("r3", 23, 25, "5550103333"))
        .unwrap();
    h.drain().await;

    // r1 is on the lock in slot 2; r2 holds slot 3 and r3 follows r1 on 2
    let err = h
        .runtime
        .set_time_override(&r("r1"), &room(), None, Some(at(23, 18, 0)), None)
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Capacity(_)));
    assert_eq!(h.assignment(&room(), "r1").unwrap().slot, 2);
    assert_eq!(h.devices.code_at(&room(), 2).as_deref(), Some("1111"));
}

#[tokio::test(start_paused = true)]
async fn override_on_a_device_outside_the_group_is_refused() {
    let h = Harness::new();
    h.runtime
        .schedule_reservation(&stay("r1", 20, 22, "5550104821"))
        .unwrap();

    let err = h
        .runtime
        .set_time_override(&r("r1"), &kitchen(), Some(at(20, 8, 0)), None, None)
        .unwrap_err();
    assert!(matches!(err, RuntimeError::NotServed { .. }));

    let err = h
        .runtime
        .set_time_override(&r("nobody"), &room(), Some(at(20, 8, 0)), None, None)
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ReservationNotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn cancel_clears_live_codes_before_forgetting_the_stay() {
    let h = Harness::starting_at(at(20, 13, 0));
    h.runtime
        .schedule_reservation(&stay("r1", 20, 22, "5550104821"))
        .unwrap();
    // Room and front activations plus the overdue finalization
    assert_eq!(h.drain().await, 3);
    assert_eq!(h.devices.code_at(&room(), 2).as_deref(), Some("4821"));
    assert_eq!(h.devices.code_at(&front(), 2).as_deref(), Some("4821"));

    h.runtime.cancel_reservation(&r("r1")).await.unwrap();

    assert_eq!(h.devices.code_at(&room(), 2), None);
    assert_eq!(h.devices.code_at(&front(), 2), None);
    assert!(h.reservation("r1").is_none());
    assert!(h.assignment(&room(), "r1").is_none());
    assert!(h.runtime.jobs().jobs_for_reservation(&r("r1")).is_empty());
    assert_eq!(h.audit(AuditAction::ReservationCancelled).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn disable_revokes_codes_and_enable_restores_them() {
    let h = Harness::starting_at(at(20, 13, 0));
    h.runtime
        .schedule_reservation(&stay("r1", 20, 22, "5550104821"))
        .unwrap();
    h.drain().await;

    assert_eq!(h.runtime.disable(&r("r1")).await.unwrap(), 2);
    assert_eq!(h.devices.code_at(&room(), 2), None);
    assert!(!h.assignment(&room(), "r1").unwrap().is_live);
    assert!(h.reservation("r1").unwrap().disabled);
    // Timers stay armed while disabled
    assert!(h
        .runtime
        .jobs()
        .is_scheduled(&JobKey::deactivate(&room(), 2, &r("r1"))));

    assert_eq!(h.runtime.enable(&r("r1")).unwrap(), 2);
    h.drain().await;
    assert_eq!(h.devices.code_at(&room(), 2).as_deref(), Some("4821"));
    assert_eq!(h.devices.code_at(&front(), 2).as_deref(), Some("4821"));
    assert_eq!(h.devices.code_at(&bath(), 2), None);
}

#[tokio::test(start_paused = true)]
async fn resync_forces_every_pool_slot_to_its_expected_state() {
    let h = Harness::starting_at(at(20, 13, 0));
    h.runtime
        .schedule_reservation(&stay("r1", 20, 22, "5550104821"))
        .unwrap();
    h.devices.preload_code(&room(), 3, "9999");

    let summary = h.runtime.resync_all().await.unwrap();

    // room 2 + bath 2 + front 4 + kitchen 2 pool slots
    assert_eq!(
        summary,
        ResyncSummary {
            set: 2,
            cleared: 8,
            failed: 0
        }
    );
    assert_eq!(h.devices.code_at(&room(), 2).as_deref(), Some("4821"));
    assert_eq!(h.devices.code_at(&room(), 3), None);
    assert_eq!(h.devices.code_at(&bath(), 2), None);
    assert!(h.assignment(&room(), "r1").unwrap().is_live);
    assert_eq!(h.audit(AuditAction::Resync).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn sync_status_tracks_unconfirmed_writes() {
    let h = Harness::starting_at(at(20, 13, 0));
    h.runtime
        .schedule_reservation(&stay("r1", 20, 22, "5550104821"))
        .unwrap();
    h.drain().await;

    let status = h.runtime.get_sync_status();
    assert!(status.failed_slots.is_empty());
    assert_eq!(status.in_progress_slots.len(), 2);

    assert!(h.runtime.confirm_code(&room(), 2).unwrap());
    assert_eq!(h.runtime.get_sync_status().in_progress_slots.len(), 1);
    assert_eq!(h.runtime.slot_state(&room(), 2), Some(SyncState::Active));

    assert!(matches!(
        h.runtime.retry_failed_slot(&room(), 2).await,
        Err(RuntimeError::SlotNotFailed(_))
    ));
    assert!(matches!(
        h.runtime.dismiss_failed_slot(&room(), 2),
        Err(RuntimeError::SlotNotFailed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_slots_survive_restart_and_can_be_retried() {
    let h = Harness::new();
    let key = SlotKey::new(room(), 2);
    let mut failed = SlotSync::new(key.clone());
    failed.state = SyncState::Failed;
    failed.target_code = Some("4821".to_string());
    failed.reservation = Some(r("r1"));
    failed.retry_count = 3;
    failed.last_error = Some("device unreachable: lock.room1".to_string());
    h.runtime
        .store()
        .persist(Operation::SlotSynced { sync: failed })
        .unwrap();

    let h = h.restart_at(at(20, 13, 0));
    h.runtime.rehydrate();
    assert_eq!(h.runtime.get_sync_status().failed_slots.len(), 1);

    assert_eq!(h.runtime.retry_all_failed().await, 1);
    assert_eq!(h.devices.code_at(&room(), 2).as_deref(), Some("4821"));
    assert!(h.runtime.get_sync_status().failed_slots.is_empty());
}

#[tokio::test(start_paused = true)]
async fn permanent_sync_failure_is_audited_and_announced() {
    let h = Harness::new();

    h.runtime
        .handle_sync_failure(SyncFailure {
            device: room(),
            slot: 2,
            code: Some("4821".to_string()),
            reservation: Some(r("r1")),
            error: "device unreachable: lock.room1".to_string(),
        })
        .await;

    let entries = h.audit(AuditAction::CodeSyncFailed);
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].success);
    assert_eq!(entries[0].reservation, Some(r("r1")));

    let calls = h.notify.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].channel, "code_sync");
    assert!(calls[0].message.contains("lock.room1 slot 2"));
    assert!(!calls[0].message.contains("4821"));
}

#[tokio::test(start_paused = true)]
async fn undeliverable_alert_still_leaves_an_audit_entry() {
    let h = Harness::new();
    h.notify.set_undeliverable(true);

    h.runtime
        .handle_sync_failure(SyncFailure {
            device: front(),
            slot: 3,
            code: None,
            reservation: None,
            error: "max retries (3) exceeded".to_string(),
        })
        .await;

    assert_eq!(h.audit(AuditAction::CodeSyncFailed).len(), 1);
    assert_eq!(h.notify.messages_on("code_sync").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn started_runtime_polls_then_activates_on_time() {
    let h = Harness::new();
    h.source
        .set(ROOM_SOURCE, vec![record("r1", 20, 22, "5550104821")]);

    let tasks = h.runtime.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.reservation("r1").is_some());
    assert!(h.devices.commands().is_empty());

    h.clock.set(at(20, 12, 0));
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(h.devices.code_at(&room(), 2).as_deref(), Some("4821"));
    assert_eq!(h.devices.code_at(&front(), 2).as_deref(), Some("4821"));
    assert_eq!(h.devices.code_at(&bath(), 2), None);
    assert!(h.reservation("r1").unwrap().locked_code.is_some());

    for task in tasks {
        task.abort();
    }
}
