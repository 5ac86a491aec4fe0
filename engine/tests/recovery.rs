//! Storage failures, restart recovery and settlement reconciliation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use boxoffice_core::error::ErrorKind;
use boxoffice_core::gateway::SettlementOutcome;
use boxoffice_core::payment::PaymentStatus;
use boxoffice_core::repository::{Repository, WriteBatch};
use boxoffice_core::reservation::ReservationStatus;
use boxoffice_engine::repository::InMemoryRepository;
use boxoffice_testing::fixtures;
use common::{test_config, Harness};
use std::sync::Arc;

#[tokio::test]
async fn failed_commit_leaves_no_trace() {
    let h = Harness::new();
    let event = h.published_event(10).await;
    h.repository.fail_next(h.engine.config().retry.max_retries + 1);

    let err = h
        .engine
        .create_reservation(&fixtures::attendee(), event.id, 4)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransientInfrastructureFailure);
    assert_eq!(h.available(&event).await, 10);
    assert_eq!(h.engine.capacity_snapshot(event.id).await.unwrap().held, 0);
}

#[tokio::test]
async fn commits_are_retried_transparently() {
    let h = Harness::new();
    let event = h.published_event(10).await;
    h.repository.fail_next(2);

    let reservation = h.hold(&fixtures::attendee(), &event, 4).await;

    assert_eq!(reservation.status, ReservationStatus::Pending);
    assert_eq!(h.repository.rejected(), 2);
    assert_eq!(h.available(&event).await, 6);
}

#[tokio::test]
async fn failed_release_keeps_the_hold_for_the_next_sweep() {
    let h = Harness::new();
    let event = h.published_event(10).await;
    let alice = fixtures::attendee();
    let reservation = h.hold(&alice, &event, 3).await;
    h.elapse_hold();

    h.repository.fail_next(h.engine.config().retry.max_retries + 1);
    let report = h.engine.sweep_once().await;
    assert_eq!((report.due, report.failed), (1, 1));
    assert_eq!(h.available(&event).await, 7);

    let report = h.engine.sweep_once().await;
    assert_eq!(report.expired, 1);
    assert_eq!(h.available(&event).await, 10);
    let reservation = h.engine.get_reservation(&alice, reservation.id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Expired);
}

#[tokio::test]
async fn restart_rebuilds_state_from_storage() {
    let storage = Arc::new(InMemoryRepository::new());
    let first = Harness::on_storage(test_config(), storage.clone());
    let event = first.published_event(10).await;
    let alice = fixtures::attendee();
    let confirmed = first.hold(&alice, &event, 3).await;
    first.pay(&alice, &confirmed).await;
    let pending = first.hold(&alice, &event, 2).await;
    drop(first);

    let second = Harness::on_storage(test_config(), storage);
    let report = second.engine.recover().await.unwrap();

    assert_eq!(report.events, 1);
    assert_eq!(report.reservations, 2);
    assert_eq!(report.payments, 2);
    assert_eq!(report.drift_corrected, 0);
    assert_eq!(second.available(&event).await, 5);
    let snapshot = second.engine.capacity_snapshot(event.id).await.unwrap();
    assert_eq!((snapshot.held, snapshot.sold), (2, 3));

    // The restored hold still behaves like one.
    let cancelled = second.engine.cancel_reservation(&alice, pending.id).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert_eq!(second.available(&event).await, 7);
}

#[tokio::test]
async fn recovery_corrects_capacity_drift() {
    let storage = Arc::new(InMemoryRepository::new());
    let first = Harness::on_storage(test_config(), storage.clone());
    let event = first.published_event(10).await;
    first.hold(&fixtures::attendee(), &event, 4).await;

    // Simulate a lost credit: the stored event claims fewer seats than it has.
    let mut drifted = first.engine.get_event(event.id).await.unwrap();
    drifted.available_capacity = 1;
    let mut batch = WriteBatch::new();
    batch.put_event(drifted);
    storage.commit(batch).await.unwrap();
    drop(first);

    let second = Harness::on_storage(test_config(), storage.clone());
    let report = second.engine.recover().await.unwrap();

    assert_eq!(report.drift_corrected, 1);
    assert_eq!(second.available(&event).await, 6);
    let stored = storage.load_snapshot().await.unwrap();
    assert_eq!(stored.events[0].available_capacity, 6);
}

#[tokio::test]
async fn reconciliation_replays_an_interrupted_settlement() {
    let storage = Arc::new(InMemoryRepository::new());
    let first = Harness::on_storage(test_config(), storage.clone());
    let event = first.published_event(10).await;
    let alice = fixtures::attendee();
    let reservation = first.hold(&alice, &event, 2).await;
    let payment = first.open(&alice, &reservation).await;

    // The payment reached Completed but the process died before confirming.
    let mut completed = first.engine.get_payment(&alice, payment.id).await.unwrap();
    completed.complete("crash_txn".to_string(), first.clock_now()).unwrap();
    let mut batch = WriteBatch::new();
    batch.put_payment(completed);
    storage.commit(batch).await.unwrap();
    drop(first);

    let second = Harness::on_storage(test_config(), storage);
    let report = second.engine.recover().await.unwrap();

    assert_eq!(report.reconciled.repaired, 1);
    let reservation = second.engine.get_reservation(&alice, reservation.id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Confirmed);
    let payment = second.engine.get_payment(&alice, payment.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);

    // A second pass finds nothing left to do.
    assert_eq!(second.engine.reconcile().await.repaired, 0);
}

#[tokio::test]
async fn reconciliation_finishes_a_settlement_whose_confirm_failed() {
    let h = Harness::new();
    let event = h.published_event(10).await;
    let alice = fixtures::attendee();
    let reservation = h.hold(&alice, &event, 2).await;
    let payment = h.open(&alice, &reservation).await;

    // The payment commit lands; every attempt to commit the confirm fails.
    h.repository
        .fail_after(1, h.engine.config().retry.max_retries + 1);
    let err = h
        .engine
        .settle_payment(payment.id, SettlementOutcome::success("txn_ok"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let payment = h.engine.get_payment(&alice, payment.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    let pending = h.engine.get_reservation(&alice, reservation.id).await.unwrap();
    assert_eq!(pending.status, ReservationStatus::Pending);

    let report = h.engine.reconcile().await;
    assert_eq!(report.repaired, 1);
    let confirmed = h.engine.get_reservation(&alice, reservation.id).await.unwrap();
    assert_eq!(confirmed.status, ReservationStatus::Confirmed);
    assert_eq!(h.available(&event).await, 8);
}

#[tokio::test]
async fn unreadable_storage_fails_recovery() {
    let h = Harness::new();
    h.repository.fail_loads(true);
    let err = h.engine.recover().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientInfrastructureFailure);
}

#[tokio::test]
async fn sweeper_leaves_a_paid_hold_for_reconciliation() {
    let h = Harness::new();
    let event = h.published_event(10).await;
    let alice = fixtures::attendee();
    let reservation = h.hold(&alice, &event, 2).await;
    let payment = h.open(&alice, &reservation).await;

    h.repository
        .fail_after(1, h.engine.config().retry.max_retries + 1);
    let err = h
        .engine
        .settle_payment(payment.id, SettlementOutcome::success("txn_paid"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    h.elapse_hold();

    let sweep = h.engine.sweep_once().await;
    assert_eq!((sweep.due, sweep.expired), (0, 0));
    assert_eq!(h.available(&event).await, 8);

    let report = h.engine.reconcile().await;
    assert_eq!(report.repaired, 1);
    let confirmed = h.engine.get_reservation(&alice, reservation.id).await.unwrap();
    assert_eq!(confirmed.status, ReservationStatus::Confirmed);
    assert_eq!(h.available(&event).await, 8);
}

#[tokio::test]
async fn background_tick_confirms_a_paid_hold_past_its_window() {
    let h = Harness::new();
    let event = h.published_event(10).await;
    let alice = fixtures::attendee();
    let reservation = h.hold(&alice, &event, 2).await;
    let payment = h.open(&alice, &reservation).await;

    h.repository
        .fail_after(1, h.engine.config().retry.max_retries + 1);
    h.engine
        .settle_payment(payment.id, SettlementOutcome::success("txn_paid"))
        .await
        .unwrap_err();
    h.elapse_hold();

    let background = h.engine.start_background();
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(3);
    loop {
        let current = h.engine.get_reservation(&alice, reservation.id).await.unwrap();
        if current.status == ReservationStatus::Confirmed {
            break;
        }
        assert_eq!(current.status, ReservationStatus::Pending);
        assert!(tokio::time::Instant::now() < deadline, "paid hold never confirmed");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    background.shutdown().await;

    assert_eq!(h.available(&event).await, 8);
}

#[tokio::test]
async fn paid_hold_cannot_be_released_before_its_confirm() {
    let h = Harness::new();
    let event = h.published_event(10).await;
    let alice = fixtures::attendee();
    let reservation = h.hold(&alice, &event, 3).await;
    let payment = h.open(&alice, &reservation).await;

    h.repository
        .fail_after(1, h.engine.config().retry.max_retries + 1);
    h.engine
        .settle_payment(payment.id, SettlementOutcome::success("txn_paid"))
        .await
        .unwrap_err();

    let err = h
        .engine
        .cancel_reservation(&alice, reservation.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    let err = h
        .engine
        .expire_reservation(reservation.id, boxoffice_core::reservation::ExpiryReason::EventCancelled)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(h.available(&event).await, 7);
}

#[tokio::test]
async fn encoding_failures_are_not_retried() {
    let h = Harness::new();
    let event = h.published_event(10).await;
    h.repository.fail_encoding_next(1);

    let err = h
        .engine
        .create_reservation(&fixtures::attendee(), event.id, 2)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransientInfrastructureFailure);
    assert_eq!(h.repository.rejected(), 1);
    assert_eq!(h.available(&event).await, 10);
}
