//! Capacity Ledger.
//!
//! Owns every change to an event's available capacity. The per-event mutex is
//! the unit of synchronization: two debits on one event are serialized, debits
//! on different events never wait for each other.
//!
//! Two entry styles. The reservation state machine already holds the
//! reservation and event locks and writes one batch with both records, so it
//! calls [`CapacityLedger::debit`] and [`CapacityLedger::credit`] on its working
//! copy. [`CapacityLedger::try_debit`] and [`CapacityLedger::credit_event`] are
//! the standalone API: they take the event lock and commit on their own, for
//! callers adjusting capacity outside a reservation (operator tooling, tests).

use crate::context::EngineContext;
use crate::metrics;
use boxoffice_core::error::EngineResult;
use boxoffice_core::event::Event;
use boxoffice_core::repository::WriteBatch;
use boxoffice_core::types::EventId;
use std::sync::Arc;

/// Capacity Ledger
#[derive(Clone)]
pub struct CapacityLedger {
    ctx: Arc<EngineContext>,
}

impl CapacityLedger {
    /// Creates the ledger.
    #[must_use]
    pub const fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Debits `quantity` from a working copy of a locked event.
    ///
    /// # Errors
    ///
    /// [`boxoffice_core::error::EngineError::InsufficientCapacity`], leaving
    /// `event` unchanged.
    pub fn debit(&self, event: &mut Event, quantity: u32) -> EngineResult<()> {
        if let Err(err) = event.try_debit(quantity) {
            tracing::debug!(
                event_id = %event.id,
                quantity,
                available = event.available_capacity,
                "Insufficient capacity"
            );
            return Err(err);
        }
        tracing::debug!(
            event_id = %event.id,
            quantity,
            available = event.available_capacity,
            "Capacity debited"
        );
        Ok(())
    }

    /// Credits `quantity` back onto a working copy of a locked event, capped at
    /// the total.
    pub fn credit(&self, event: &mut Event, quantity: u32) {
        let credit = event.credit(quantity);
        if credit.capped {
            tracing::warn!(
                event_id = %event.id,
                quantity,
                applied = credit.applied,
                total = event.total_capacity,
                "Capacity credit capped at total"
            );
        } else {
            tracing::debug!(
                event_id = %event.id,
                quantity,
                available = event.available_capacity,
                "Capacity credited"
            );
        }
    }

    /// Publishes a committed event's capacity to the metrics gauge.
    pub fn publish(&self, event: &Event) {
        metrics::update_capacity(event);
    }

    /// Atomically checks and debits capacity on `event_id`, committing the
    /// event by itself. Must not be called while holding the event's lock.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InsufficientCapacity` (no side effects), or a transient
    /// storage failure.
    pub async fn try_debit(&self, event_id: EventId, quantity: u32) -> EngineResult<Event> {
        let handle = self.ctx.store.event(event_id)?;
        let mut guard = handle.lock().await;
        let mut next = guard.clone();
        self.debit(&mut next, quantity)?;
        self.commit(&next).await?;
        *guard = next.clone();
        self.publish(&next);
        Ok(next)
    }

    /// Credits capacity on `event_id`, capped at its total, committing the
    /// event by itself. Must not be called while holding the event's lock.
    ///
    /// # Errors
    ///
    /// `NotFound` or a transient storage failure.
    pub async fn credit_event(&self, event_id: EventId, quantity: u32) -> EngineResult<Event> {
        let handle = self.ctx.store.event(event_id)?;
        let mut guard = handle.lock().await;
        let mut next = guard.clone();
        self.credit(&mut next, quantity);
        if next != *guard {
            self.commit(&next).await?;
            *guard = next.clone();
            self.publish(&next);
        }
        Ok(next)
    }

    async fn commit(&self, event: &Event) -> EngineResult<()> {
        let mut batch = WriteBatch::new();
        batch.put_event(event.clone());
        self.ctx.commit(batch).await
    }
}
