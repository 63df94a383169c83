// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::NaiveDate;
use kw_adapters::{DeviceCall, FakeDeviceAdapter};
use kw_core::{EngineConfig, FakeClock};
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    device: FakeDeviceAdapter,
    clock: FakeClock,
    store: Store,
    manager: SyncManager<FakeDeviceAdapter, FakeClock>,
    failures: mpsc::UnboundedReceiver<SyncFailure>,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Store::open(&dir.path().join("state.wal")).unwrap();
    let device = FakeDeviceAdapter::new();
    let clock = FakeClock::at(
        NaiveDate::from_ymd_opt(2026, 2, 20)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap(),
    );
    let config = EngineConfig::default();
    let (tx, failures) = mpsc::unbounded_channel();
    let manager = SyncManager::new(
        device.clone(),
        clock.clone(),
        store.clone(),
        config.sync_policy(),
        config.recovery_pause,
        Arc::new(tokio::sync::Mutex::new(())),
        tx,
    );
    Harness {
        _dir: dir,
        device,
        clock,
        store,
        manager,
        failures,
    }
}

fn front() -> DeviceId {
    DeviceId::from("lock.front")
}

fn key() -> SlotKey {
    SlotKey::new("lock.front", 4)
}

fn past_timeout(clock: &FakeClock) {
    clock.advance(chrono::Duration::seconds(121));
}

#[tokio::test]
async fn set_awaits_confirmation_then_goes_active() {
    let h = harness();
    let r1 = ReservationId::from("r1");

    h.manager.set(&front(), 4, "4821", Some(&r1)).await.unwrap();
    let sync = h.manager.slot(&key()).unwrap();
    assert_eq!(sync.state, SyncState::Confirming);
    assert_eq!(sync.target_code.as_deref(), Some("4821"));
    assert_eq!(sync.current_code, None);
    assert_eq!(h.manager.in_progress_slots().len(), 1);

    assert!(h.manager.confirm(&front(), 4).unwrap());
    let sync = h.manager.slot(&key()).unwrap();
    assert_eq!(sync.state, SyncState::Active);
    assert_eq!(sync.current_code.as_deref(), Some("4821"));
    assert!(h.manager.in_progress_slots().is_empty());

    // Persisted
    assert_eq!(h.store.read(|s| s.slot(&key()).cloned()), Some(sync));
}

#[tokio::test]
async fn confirm_of_idle_slot_is_ignored() {
    let h = harness();
    assert!(!h.manager.confirm(&front(), 4).unwrap());
    h.manager.clear(&front(), 4, None).await.unwrap();
    assert!(!h.manager.confirm(&front(), 4).unwrap());
}

#[tokio::test]
async fn initial_write_failure_is_returned_immediately() {
    let h = harness();
    h.device.fail_next(&front(), 1);

    let result = h.manager.set(&front(), 4, "4821", None).await;

    assert!(matches!(result, Err(RuntimeError::Device(_))));
    let sync = h.manager.slot(&key()).unwrap();
    assert_eq!(sync.state, SyncState::Setting);
    assert!(sync.last_error.unwrap().contains("injected failure"));
}

#[tokio::test]
async fn clear_is_authoritative() {
    let h = harness();
    h.manager.set(&front(), 4, "4821", None).await.unwrap();
    h.manager.confirm(&front(), 4).unwrap();

    h.manager.clear(&front(), 4, None).await.unwrap();

    let sync = h.manager.slot(&key()).unwrap();
    assert_eq!(sync.state, SyncState::Idle);
    assert_eq!(sync.current_code, None);
    assert_eq!(h.device.code_at(&front(), 4), None);
}

#[tokio::test(start_paused = true)]
async fn stuck_confirming_slot_is_cleared_and_reset() {
    let h = harness();
    h.manager.set(&front(), 4, "4821", None).await.unwrap();
    h.device.clear_calls();

    // Not yet past the timeout
    h.clock.advance(chrono::Duration::seconds(120));
    assert_eq!(h.manager.sweep().await.unwrap(), SweepSummary::default());

    h.clock.advance(chrono::Duration::seconds(1));
    let summary = h.manager.sweep().await.unwrap();

    assert_eq!(summary.recovered, 1);
    assert_eq!(
        h.device.calls(),
        vec![
            DeviceCall::Ping { device: front() },
            DeviceCall::ClearCode {
                device: front(),
                slot: 4
            },
            DeviceCall::WriteCode {
                device: front(),
                slot: 4,
                code: "4821".to_string()
            },
        ]
    );
    let sync = h.manager.slot(&key()).unwrap();
    assert_eq!(sync.retry_count, 1);
    assert_eq!(sync.state, SyncState::Confirming);
    assert_eq!(sync.started_at, Some(h.clock.now()));
}

#[tokio::test(start_paused = true)]
async fn stuck_clear_recovers_to_idle() {
    let h = harness();
    h.device.fail_next(&front(), 1);
    assert!(h.manager.clear(&front(), 4, None).await.is_err());

    past_timeout(&h.clock);
    h.manager.sweep().await.unwrap();

    let sync = h.manager.slot(&key()).unwrap();
    assert_eq!(sync.state, SyncState::Idle);
    assert_eq!(sync.retry_count, 1);
}

#[tokio::test(start_paused = true)]
async fn unreachable_device_defers_recovery() {
    let h = harness();
    h.manager.set(&front(), 4, "4821", None).await.unwrap();
    h.device.set_unreachable(&front(), true);

    past_timeout(&h.clock);
    h.manager.sweep().await.unwrap();

    let sync = h.manager.slot(&key()).unwrap();
    assert_eq!(sync.state, SyncState::Setting);
    assert_eq!(sync.retry_count, 1);
    assert_eq!(sync.started_at, Some(h.clock.now()));
    assert_eq!(sync.last_error.as_deref(), Some("device unreachable"));

    // Still swept again after the next timeout
    past_timeout(&h.clock);
    assert_eq!(h.manager.sweep().await.unwrap().recovered, 1);
    assert_eq!(h.manager.slot(&key()).unwrap().retry_count, 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_slot_escalates_exactly_once() {
    let mut h = harness();
    h.manager
        .set(&front(), 4, "4821", Some(&ReservationId::from("r1")))
        .await
        .unwrap();

    for expected in 1..=3 {
        past_timeout(&h.clock);
        assert_eq!(h.manager.sweep().await.unwrap().recovered, 1);
        assert_eq!(h.manager.slot(&key()).unwrap().retry_count, expected);
    }

    past_timeout(&h.clock);
    assert_eq!(h.manager.sweep().await.unwrap().escalated, 1);

    // Terminal: later sweeps leave it alone
    for _ in 0..3 {
        past_timeout(&h.clock);
        assert_eq!(h.manager.sweep().await.unwrap(), SweepSummary::default());
    }

    let failure = h.failures.try_recv().unwrap();
    assert_eq!(failure.device, front());
    assert_eq!(failure.slot, 4);
    assert_eq!(failure.code.as_deref(), Some("4821"));
    assert_eq!(failure.reservation, Some(ReservationId::from("r1")));
    assert!(failure.error.starts_with("max retries (3) exceeded"));
    assert!(h.failures.try_recv().is_err(), "escalated more than once");

    let failed = h.manager.failed_slots();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].state, SyncState::Failed);
}

#[tokio::test(start_paused = true)]
async fn failed_slot_can_be_retried_or_dismissed() {
    let h = harness();
    h.manager.set(&front(), 4, "4821", None).await.unwrap();
    for _ in 0..4 {
        past_timeout(&h.clock);
        h.manager.sweep().await.unwrap();
    }
    assert_eq!(h.manager.failed_slots().len(), 1);

    h.manager.retry_failed(&key()).await.unwrap();
    let sync = h.manager.slot(&key()).unwrap();
    assert_eq!(sync.state, SyncState::Confirming);
    assert_eq!(sync.retry_count, 0);

    assert!(matches!(
        h.manager.retry_failed(&key()).await,
        Err(RuntimeError::SlotNotFailed(_))
    ));
    assert!(matches!(
        h.manager.dismiss_failed(&key()),
        Err(RuntimeError::SlotNotFailed(_))
    ));

    for _ in 0..4 {
        past_timeout(&h.clock);
        h.manager.sweep().await.unwrap();
    }
    h.manager.dismiss_failed(&key()).unwrap();
    assert_eq!(h.manager.slot(&key()).unwrap().state, SyncState::Idle);
}

#[tokio::test]
async fn restore_puts_interrupted_recovery_back_in_flight() {
    let h = harness();
    let mut record = SlotSync::new(key());
    record.begin_set("4821", None, h.clock.now());
    record.begin_retry();

    h.manager.restore([record]);

    let sync = h.manager.slot(&key()).unwrap();
    assert_eq!(sync.state, SyncState::Setting);
    assert_eq!(sync.retry_count, 1);
}
