//! Event lifecycle through the facade.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use boxoffice_core::error::EngineError;
use boxoffice_core::event::{EventPatch, EventStatus};
use boxoffice_core::gateway::SettlementOutcome;
use boxoffice_core::payment::PaymentStatus;
use boxoffice_core::types::Money;
use boxoffice_testing::fixtures;
use common::Harness;

#[tokio::test]
async fn publication_fee_drives_draft_to_published() {
    let h = Harness::new();
    let event = h
        .engine
        .create_event(&h.organizer, fixtures::concert_draft(h.clock_now(), 10))
        .await
        .unwrap();
    assert_eq!(event.status, EventStatus::Draft);
    assert_eq!(event.available_capacity, 10);

    let fee = h
        .engine
        .open_publication_payment(&h.organizer, event.id, fixtures::PUBLICATION_FEE, fixtures::card())
        .await
        .unwrap();
    assert_eq!(fee.concept, "publication fee for Spring Concert");
    assert_eq!(h.engine.get_event(event.id).await.unwrap().status, EventStatus::PendingPayment);

    h.engine
        .settle_payment(fee.id, SettlementOutcome::success("fee_txn"))
        .await
        .unwrap();
    assert_eq!(h.engine.get_event(event.id).await.unwrap().status, EventStatus::Published);

    // A duplicate callback is harmless.
    let again = h
        .engine
        .settle_payment(fee.id, SettlementOutcome::success("fee_txn"))
        .await
        .unwrap();
    assert_eq!(again.status, PaymentStatus::Completed);
    assert_eq!(h.engine.get_event(event.id).await.unwrap().status, EventStatus::Published);
}

#[tokio::test]
async fn failed_fee_leaves_event_awaiting_payment() {
    let h = Harness::new();
    let event = h
        .engine
        .create_event(&h.organizer, fixtures::concert_draft(h.clock_now(), 10))
        .await
        .unwrap();
    let fee = h
        .engine
        .open_publication_payment(&h.organizer, event.id, fixtures::PUBLICATION_FEE, fixtures::card())
        .await
        .unwrap();
    h.engine
        .settle_payment(fee.id, SettlementOutcome::failure("insufficient funds"))
        .await
        .unwrap();
    assert_eq!(h.engine.get_event(event.id).await.unwrap().status, EventStatus::PendingPayment);

    let retry = h
        .engine
        .open_publication_payment(&h.organizer, event.id, fixtures::PUBLICATION_FEE, fixtures::card())
        .await
        .unwrap();
    h.engine
        .settle_payment(retry.id, SettlementOutcome::success("fee_txn_2"))
        .await
        .unwrap();
    assert_eq!(h.engine.get_event(event.id).await.unwrap().status, EventStatus::Published);
}

#[tokio::test]
async fn wrong_fee_amount_is_rejected() {
    let h = Harness::new();
    let event = h
        .engine
        .create_event(&h.organizer, fixtures::concert_draft(h.clock_now(), 10))
        .await
        .unwrap();
    let err = h
        .engine
        .open_publication_payment(&h.organizer, event.id, Money::from_cents(1), fixtures::card())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AmountMismatch { .. }));
    assert_eq!(h.engine.get_event(event.id).await.unwrap().status, EventStatus::Draft);
}

#[tokio::test]
async fn transitions_follow_the_lifecycle_table() {
    let h = Harness::new();
    let event = h.published_event(10).await;

    let err = h.engine.finish_event(&h.organizer, event.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    let started = h.engine.start_event(&h.organizer, event.id).await.unwrap();
    assert_eq!(started.status, EventStatus::InProgress);

    let err = h
        .engine
        .create_reservation(&fixtures::attendee(), event.id, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));

    let finished = h.engine.finish_event(&h.organizer, event.id).await.unwrap();
    assert_eq!(finished.status, EventStatus::Finished);

    let err = h.engine.cancel_event(&h.organizer, event.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn request_publication_payment_is_only_legal_from_draft() {
    let h = Harness::new();
    let event = h
        .engine
        .create_event(&h.organizer, fixtures::concert_draft(h.clock_now(), 10))
        .await
        .unwrap();
    let pending = h
        .engine
        .request_publication_payment(&h.organizer, event.id)
        .await
        .unwrap();
    assert_eq!(pending.status, EventStatus::PendingPayment);

    let err = h
        .engine
        .request_publication_payment(&h.organizer, event.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn drafts_are_editable_until_payment_is_requested() {
    let h = Harness::new();
    let event = h
        .engine
        .create_event(&h.organizer, fixtures::concert_draft(h.clock_now(), 10))
        .await
        .unwrap();

    let edited = h
        .engine
        .edit_event(
            &h.organizer,
            event.id,
            EventPatch {
                name: Some("Autumn Concert".to_string()),
                total_capacity: Some(25),
                ..EventPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.name, "Autumn Concert");
    assert_eq!((edited.total_capacity, edited.available_capacity), (25, 25));

    let past = EventPatch {
        date: Some(h.clock_now() - chrono::Duration::days(1)),
        ..EventPatch::default()
    };
    let err = h.engine.edit_event(&h.organizer, event.id, past).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    h.engine
        .request_publication_payment(&h.organizer, event.id)
        .await
        .unwrap();
    let err = h
        .engine
        .edit_event(&h.organizer, event.id, EventPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));
}

#[tokio::test]
async fn invalid_drafts_are_rejected() {
    let h = Harness::new();

    let mut draft = fixtures::concert_draft(h.clock_now(), 10);
    draft.name = "   ".to_string();
    let err = h.engine.create_event(&h.organizer, draft).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let draft = fixtures::concert_draft(h.clock_now(), 0);
    let err = h.engine.create_event(&h.organizer, draft).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let mut draft = fixtures::concert_draft(h.clock_now(), 10);
    draft.date = h.clock_now();
    let err = h.engine.create_event(&h.organizer, draft).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn cancelling_a_draft_needs_no_cascade() {
    let h = Harness::new();
    let event = h
        .engine
        .create_event(&h.organizer, fixtures::concert_draft(h.clock_now(), 10))
        .await
        .unwrap();
    let cancellation = h.engine.cancel_event(&h.organizer, event.id).await.unwrap();
    assert_eq!(cancellation.event.status, EventStatus::Cancelled);
    assert_eq!(cancellation.expired, 0);
}

#[tokio::test]
async fn listings_and_occupancy() {
    let h = Harness::new();
    let published = h.published_event(10).await;
    let draft = h
        .engine
        .create_event(&h.organizer, fixtures::concert_draft(h.clock_now(), 5))
        .await
        .unwrap();
    h.hold(&fixtures::attendee(), &published, 4).await;

    let all = h.engine.list_events(false).await;
    assert_eq!(all.len(), 2);
    let on_sale = h.engine.list_events(true).await;
    assert_eq!(on_sale.iter().map(|e| e.id).collect::<Vec<_>>(), vec![published.id]);

    let mine = h.engine.list_organizer_events(h.organizer.id).await;
    assert_eq!(mine.len(), 2);
    assert!(mine.iter().any(|e| e.id == draft.id));

    let occupancy = h.engine.occupancy(published.id).await.unwrap();
    assert!((occupancy - 40.0).abs() < f64::EPSILON);
}
