//! Event Lifecycle Controller.
//!
//! Gates event transitions and cascades cancellation onto Pending holds.

use crate::context::EngineContext;
use crate::metrics;
use crate::reservations::ReservationMachine;
use boxoffice_core::error::{EngineError, EngineResult};
use boxoffice_core::event::{Event, EventDraft, EventPatch, EventStatus};
use boxoffice_core::notification::{NotificationKind, Subject};
use boxoffice_core::repository::WriteBatch;
use boxoffice_core::reservation::ExpiryReason;
use boxoffice_core::types::{EventId, UserId};
use std::sync::Arc;

/// Outcome of an event cancellation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cancellation {
    /// The cancelled event
    pub event: Event,
    /// Pending reservations expired by the cascade
    pub expired: usize,
    /// Reservations the cascade could not expire; the sweeper retries them
    pub failed: usize,
}

pub(crate) const fn status_label(status: EventStatus) -> &'static str {
    match status {
        EventStatus::Draft => "draft",
        EventStatus::PendingPayment => "pending_payment",
        EventStatus::Published => "published",
        EventStatus::InProgress => "in_progress",
        EventStatus::Finished => "finished",
        EventStatus::Cancelled => "cancelled",
    }
}

/// Event Lifecycle Controller
#[derive(Clone)]
pub struct EventLifecycle {
    ctx: Arc<EngineContext>,
    reservations: ReservationMachine,
}

impl EventLifecycle {
    /// Creates the controller.
    #[must_use]
    pub const fn new(ctx: Arc<EngineContext>, reservations: ReservationMachine) -> Self {
        Self { ctx, reservations }
    }

    /// Creates a Draft event owned by `organizer_id`.
    ///
    /// # Errors
    ///
    /// `Validation` for bad input, or a transient storage failure.
    pub async fn create(&self, organizer_id: UserId, draft: EventDraft) -> EngineResult<Event> {
        let now = self.ctx.now();
        draft.validate(now)?;
        let event = Event::draft(draft, organizer_id, now);

        let mut batch = WriteBatch::new();
        batch.put_event(event.clone());
        self.ctx.commit(batch).await?;
        self.ctx.store.insert_event(event.clone());

        metrics::record_event(status_label(EventStatus::Draft));
        metrics::update_capacity(&event);
        tracing::info!(
            event_id = %event.id,
            %organizer_id,
            capacity = event.total_capacity,
            price = %event.price,
            "Event created"
        );
        Ok(event)
    }

    /// Edits a Draft event.
    ///
    /// # Errors
    ///
    /// `InvalidState` outside Draft, `Validation`, `NotFound`, or a transient
    /// storage failure.
    pub async fn edit(&self, event_id: EventId, patch: EventPatch) -> EngineResult<Event> {
        if let Some(date) = patch.date {
            if date <= self.ctx.now() {
                return Err(EngineError::Validation(
                    "event date must be in the future".to_string(),
                ));
            }
        }
        let handle = self.ctx.store.event(event_id)?;
        let mut guard = handle.lock().await;
        let mut next = guard.clone();
        next.apply_patch(patch, self.ctx.now())?;

        let mut batch = WriteBatch::new();
        batch.put_event(next.clone());
        self.ctx.commit(batch).await?;
        *guard = next.clone();
        drop(guard);

        metrics::update_capacity(&next);
        tracing::info!(%event_id, "Event edited");
        Ok(next)
    }

    /// Draft → PendingPayment.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless Draft, `NotFound`, or a transient storage
    /// failure.
    pub async fn request_publication_payment(&self, event_id: EventId) -> EngineResult<Event> {
        self.transition(event_id, EventStatus::PendingPayment).await
    }

    /// PendingPayment → Published, driven by a settled publication fee.
    /// Outside PendingPayment this is a no-op returning the event as is.
    ///
    /// # Errors
    ///
    /// `NotFound` or a transient storage failure.
    pub async fn on_publication_fee_settled(&self, event_id: EventId) -> EngineResult<Event> {
        let handle = self.ctx.store.event(event_id)?;
        let mut guard = handle.lock().await;
        if guard.status != EventStatus::PendingPayment {
            tracing::debug!(%event_id, status = ?guard.status, "Publication fee already applied");
            return Ok(guard.clone());
        }
        let mut next = guard.clone();
        next.transition(EventStatus::Published, self.ctx.now())?;

        let mut batch = WriteBatch::new();
        batch.put_event(next.clone());
        self.ctx.commit(batch).await?;
        *guard = next.clone();
        drop(guard);

        self.published(&next);
        Ok(next)
    }

    /// Published → InProgress.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless Published, `NotFound`, or a transient
    /// storage failure.
    pub async fn start(&self, event_id: EventId) -> EngineResult<Event> {
        self.transition(event_id, EventStatus::InProgress).await
    }

    /// InProgress → Finished.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless InProgress, `NotFound`, or a transient
    /// storage failure.
    pub async fn finish(&self, event_id: EventId) -> EngineResult<Event> {
        self.transition(event_id, EventStatus::Finished).await
    }

    /// Cancels a non-terminal event, then expires each of its Pending
    /// reservations. Confirmed reservations are left alone.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` from a terminal status, `NotFound`, or a transient
    /// storage failure on the event itself. Cascade failures are counted, not
    /// returned.
    pub async fn cancel(&self, event_id: EventId) -> EngineResult<Cancellation> {
        self.transition(event_id, EventStatus::Cancelled).await?;

        // The event lock is released; cascade takes reservation then event.
        let mut expired = 0;
        let mut failed = 0;
        for reservation_id in self.ctx.store.reservations_of(event_id) {
            match self
                .reservations
                .expire(reservation_id, ExpiryReason::EventCancelled)
                .await
            {
                Ok(_) => expired += 1,
                Err(err) if err.is_state_conflict() => {}
                Err(err) => {
                    failed += 1;
                    tracing::warn!(%event_id, %reservation_id, error = %err, "Cascade expiry failed");
                }
            }
        }

        let event = self.get(event_id).await?;
        tracing::info!(
            %event_id,
            expired,
            failed,
            available = event.available_capacity,
            "Event cancellation cascaded"
        );
        Ok(Cancellation {
            event,
            expired,
            failed,
        })
    }

    /// Snapshot of one event.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub async fn get(&self, event_id: EventId) -> EngineResult<Event> {
        let handle = self.ctx.store.event(event_id)?;
        let event = handle.lock().await.clone();
        Ok(event)
    }

    /// Snapshots of every event matching `filter`, soonest first.
    pub async fn filtered<F>(&self, filter: F) -> Vec<Event>
    where
        F: Fn(&Event) -> bool,
    {
        let mut out = Vec::new();
        for (_, handle) in self.ctx.store.event_handles() {
            let event = handle.lock().await.clone();
            if filter(&event) {
                out.push(event);
            }
        }
        out.sort_by_key(|e| e.date);
        out
    }

    async fn transition(&self, event_id: EventId, next_status: EventStatus) -> EngineResult<Event> {
        let handle = self.ctx.store.event(event_id)?;
        let mut guard = handle.lock().await;
        let mut next = guard.clone();
        next.transition(next_status, self.ctx.now())?;

        let mut batch = WriteBatch::new();
        batch.put_event(next.clone());
        self.ctx.commit(batch).await?;
        let from = guard.status;
        *guard = next.clone();
        drop(guard);

        metrics::record_event(status_label(next_status));
        tracing::info!(%event_id, ?from, to = ?next_status, "Event transitioned");
        if next_status == EventStatus::Cancelled {
            self.ctx.notify(
                NotificationKind::EventCancelled,
                Subject::Event(event_id),
                format!("{} has been cancelled", next.name),
            );
        }
        Ok(next)
    }

    fn published(&self, event: &Event) {
        metrics::record_event(status_label(EventStatus::Published));
        metrics::update_capacity(event);
        tracing::info!(event_id = %event.id, "Event published");
        self.ctx.notify(
            NotificationKind::EventPublished,
            Subject::Event(event.id),
            format!("{} is now on sale at {}", event.name, event.venue),
        );
    }
}
