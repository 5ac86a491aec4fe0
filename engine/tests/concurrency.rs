//! Concurrency stress tests.
//!
//! Run on the multi-thread runtime so debits, releases and settlements on
//! one event genuinely interleave.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use boxoffice_core::error::EngineError;
use boxoffice_core::gateway::SettlementOutcome;
use boxoffice_core::reservation::{ExpiryReason, ReservationStatus};
use boxoffice_testing::fixtures;
use common::Harness;
use futures::future::join_all;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn hundred_buyers_race_for_the_last_unit() {
    let h = Arc::new(Harness::new());
    let event = h.published_event(100).await;
    h.hold(&fixtures::attendee(), &event, 99).await;

    let attempts = (0..100).map(|_| {
        let h = Arc::clone(&h);
        let event_id = event.id;
        tokio::spawn(async move {
            h.engine
                .create_reservation(&fixtures::attendee(), event_id, 1)
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let sold_out = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::InsufficientCapacity { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(sold_out, 99);
    assert_eq!(h.available(&event).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_debits_never_oversell() {
    let h = Arc::new(Harness::new());
    let event = h.published_event(50).await;

    let attempts = (0..40u32).map(|i| {
        let h = Arc::clone(&h);
        let event_id = event.id;
        tokio::spawn(async move {
            h.engine
                .create_reservation(&fixtures::attendee(), event_id, 1 + i % 4)
                .await
        })
    });
    let granted: u32 = join_all(attempts)
        .await
        .into_iter()
        .filter_map(|joined| joined.unwrap().ok())
        .map(|r| r.quantity)
        .sum();

    let snapshot = h.engine.capacity_snapshot(event.id).await.unwrap();
    assert!(granted <= 50);
    assert_eq!(snapshot.held, granted);
    assert_eq!(snapshot.available + snapshot.held + snapshot.sold, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn confirm_and_expire_race_has_exactly_one_winner() {
    for _ in 0..20 {
        let h = Arc::new(Harness::new());
        let event = h.published_event(10).await;
        let alice = fixtures::attendee();
        let reservation = h.hold(&alice, &event, 4).await;
        let payment_id = h.open(&alice, &reservation).await.id;
        h.elapse_hold();

        let settle = {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                h.engine
                    .settle_payment(payment_id, SettlementOutcome::success("race_txn"))
                    .await
            })
        };
        let expire = {
            let h = Arc::clone(&h);
            let id = reservation.id;
            tokio::spawn(async move {
                h.engine
                    .expire_reservation(id, ExpiryReason::HoldElapsed)
                    .await
            })
        };
        let settled = settle.await.unwrap();
        let expired = expire.await.unwrap();

        let after = h.engine.get_reservation(&alice, reservation.id).await.unwrap();
        match after.status {
            ReservationStatus::Confirmed => {
                assert!(settled.is_ok());
                assert!(expired.unwrap_err().is_state_conflict());
                assert_eq!(h.available(&event).await, 6);
            }
            ReservationStatus::Expired => {
                assert!(expired.is_ok());
                assert!(settled.unwrap_err().is_state_conflict());
                assert_eq!(h.available(&event).await, 10);
            }
            other => panic!("unexpected terminal state {other:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_settlements_apply_once() {
    let h = Arc::new(Harness::new());
    let event = h.published_event(10).await;
    let alice = fixtures::attendee();
    let reservation = h.hold(&alice, &event, 2).await;
    let payment_id = h.open(&alice, &reservation).await.id;

    let callbacks = (0..10).map(|_| {
        let h = Arc::clone(&h);
        tokio::spawn(async move {
            h.engine
                .settle_payment(payment_id, SettlementOutcome::success("dup_txn"))
                .await
        })
    });
    for joined in join_all(callbacks).await {
        joined.unwrap().unwrap();
    }

    let after = h.engine.get_reservation(&alice, reservation.id).await.unwrap();
    assert_eq!(after.status, ReservationStatus::Confirmed);
    assert_eq!(h.available(&event).await, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancel_and_sweep_credit_once() {
    let h = Arc::new(Harness::new());
    let event = h.published_event(20).await;
    let holders: Vec<_> = (0..10).map(|_| fixtures::attendee()).collect();
    let mut held = Vec::new();
    for holder in &holders {
        held.push(h.hold(holder, &event, 2).await);
    }
    h.elapse_hold();

    let cancels = holders.iter().cloned().zip(held.iter().map(|r| r.id)).map(|(holder, id)| {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.engine.cancel_reservation(&holder, id).await })
    });
    let sweep = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.engine.sweep_once().await })
    };
    join_all(cancels).await;
    sweep.await.unwrap();
    h.engine.sweep_once().await;

    assert_eq!(h.available(&event).await, 20);
    for (holder, reservation) in holders.iter().zip(&held) {
        let r = h.engine.get_reservation(holder, reservation.id).await.unwrap();
        assert!(matches!(
            r.status,
            ReservationStatus::Cancelled | ReservationStatus::Expired
        ));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_events_do_not_block_each_other() {
    let h = Arc::new(Harness::new());
    let first = h.published_event(30).await;
    let second = h.published_event(30).await;

    let tasks = (0..60).map(|i| {
        let h = Arc::clone(&h);
        let event_id = if i % 2 == 0 { first.id } else { second.id };
        tokio::spawn(async move {
            h.engine
                .create_reservation(&fixtures::attendee(), event_id, 1)
                .await
        })
    });
    for joined in join_all(tasks).await {
        joined.unwrap().unwrap();
    }

    assert_eq!(h.available(&first).await, 0);
    assert_eq!(h.available(&second).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_sweeper_reclaims_elapsed_holds() {
    let h = Harness::new();
    let event = h.published_event(10).await;
    h.hold(&fixtures::attendee(), &event, 6).await;
    h.elapse_hold();

    let background = h.engine.start_background();
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(3);
    while h.available(&event).await != 10 {
        assert!(tokio::time::Instant::now() < deadline, "sweeper never ran");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    background.shutdown().await;

    assert_eq!(h.engine.capacity_snapshot(event.id).await.unwrap().held, 0);
}
