//! Reservation State Machine.
//!
//! Every transition runs while holding the reservation's mutex, which makes the
//! state check and the write one step. A `confirm` and an `expire` racing on
//! the same reservation are serialized there; the loser sees the winner's
//! terminal state and touches no capacity.
//!
//! A Pending reservation whose payment already completed is never released:
//! its confirm is owed and reconciliation finishes it.

use crate::context::EngineContext;
use crate::ledger::CapacityLedger;
use crate::metrics;
use boxoffice_core::error::{EngineError, EngineResult, EntityKind};
use boxoffice_core::notification::{NotificationKind, Subject};
use boxoffice_core::payment::{PaymentStatus, PaymentTarget};
use boxoffice_core::repository::WriteBatch;
use boxoffice_core::reservation::{ConfirmationCode, ExpiryReason, Reservation, ReservationStatus};
use boxoffice_core::types::{EventId, PaymentId, ReservationId, UserId};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::HashSet;
use std::sync::Arc;

const CODE_LENGTH: usize = 10;

fn generate_code() -> ConfirmationCode {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LENGTH)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    ConfirmationCode::new(format!("{}{suffix}", ConfirmationCode::PREFIX))
}

/// How a Pending reservation is released.
#[derive(Clone, Copy, Debug)]
enum Release {
    Cancel,
    Expire(ExpiryReason),
}

/// Reservation State Machine
#[derive(Clone)]
pub struct ReservationMachine {
    ctx: Arc<EngineContext>,
    ledger: CapacityLedger,
}

impl ReservationMachine {
    /// Creates the state machine.
    #[must_use]
    pub const fn new(ctx: Arc<EngineContext>, ledger: CapacityLedger) -> Self {
        Self { ctx, ledger }
    }

    /// Holds `quantity` units of a Published event for `holder_id`.
    ///
    /// Debit, amount, code and the Pending record are committed as one batch;
    /// on any failure nothing is created and capacity is unchanged.
    ///
    /// # Errors
    ///
    /// - `Validation`: zero quantity or above the configured maximum
    /// - `InvalidState`: the event is not Published
    /// - `InsufficientCapacity`: not enough capacity left
    /// - `NotFound`, `TransientInfrastructureFailure`
    #[tracing::instrument(skip(self), fields(reservation_id))]
    pub async fn create(
        &self,
        event_id: EventId,
        holder_id: UserId,
        quantity: u32,
    ) -> EngineResult<Reservation> {
        if quantity == 0 {
            return Err(EngineError::Validation("quantity must be at least 1".to_string()));
        }
        let max = self.ctx.config.holds.max_quantity;
        if max > 0 && quantity > max {
            return Err(EngineError::Validation(format!(
                "quantity {quantity} exceeds the limit of {max} per reservation"
            )));
        }

        let handle = self.ctx.store.event(event_id)?;
        let mut guard = handle.lock().await;
        if !guard.status.accepts_reservations() {
            return Err(EngineError::invalid_state(
                EntityKind::Event,
                event_id,
                guard.status,
                "reservations require a Published event",
            ));
        }

        let mut event = guard.clone();
        self.ledger.debit(&mut event, quantity)?;
        let amount = event.charge_for(quantity)?;

        let now = self.ctx.now();
        let reservation = loop {
            let candidate = Reservation::pending(
                event_id,
                holder_id,
                quantity,
                amount,
                generate_code(),
                now,
                self.ctx.config.hold_window(),
            );
            if self
                .ctx
                .store
                .claim_code(&candidate.confirmation_code, candidate.id)
            {
                break candidate;
            }
        };
        tracing::Span::current().record("reservation_id", tracing::field::display(reservation.id));

        let mut batch = WriteBatch::new();
        batch
            .put_event(event.clone())
            .put_reservation(reservation.clone());
        if let Err(err) = self.ctx.commit(batch).await {
            self.ctx.store.release_code(&reservation.confirmation_code);
            return Err(err);
        }

        *guard = event;
        self.ctx.store.insert_reservation(reservation.clone());
        self.ledger.publish(&guard);
        drop(guard);

        metrics::record_reservation(ReservationStatus::Pending.as_str());
        tracing::info!(
            %event_id,
            quantity,
            amount = %reservation.total_amount,
            code = %reservation.confirmation_code,
            expires_at = %reservation.expires_at,
            "Reservation held"
        );
        Ok(reservation)
    }

    /// Pending → Confirmed. The capacity debit becomes permanent; the ledger is
    /// not touched. Confirming a Confirmed reservation returns it unchanged.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition`: the reservation is Cancelled or Expired
    /// - `NotFound`, `TransientInfrastructureFailure`
    pub async fn confirm(&self, reservation_id: ReservationId) -> EngineResult<Reservation> {
        let handle = self.ctx.store.reservation(reservation_id)?;
        let mut guard = handle.lock().await;
        let mut next = guard.clone();
        if !next.confirm(self.ctx.now())? {
            tracing::debug!(%reservation_id, "Reservation already confirmed");
            return Ok(next);
        }

        let mut batch = WriteBatch::new();
        batch.put_reservation(next.clone());
        self.ctx.commit(batch).await?;
        *guard = next.clone();
        drop(guard);
        self.ctx.store.hold_closed(reservation_id);

        metrics::record_reservation(ReservationStatus::Confirmed.as_str());
        tracing::info!(
            %reservation_id,
            event_id = %next.event_id,
            quantity = next.quantity,
            "Reservation confirmed"
        );
        self.ctx.notify(
            NotificationKind::ReservationConfirmed,
            Subject::Reservation(reservation_id),
            format!(
                "Reservation {} confirmed: {} units for {}",
                next.confirmation_code, next.quantity, next.total_amount
            ),
        );
        Ok(next)
    }

    /// Pending → Cancelled, crediting the capacity back exactly once.
    ///
    /// # Errors
    ///
    /// - `InvalidState`: the reservation is already terminal
    /// - `NotFound`, `TransientInfrastructureFailure`
    pub async fn cancel(&self, reservation_id: ReservationId) -> EngineResult<Reservation> {
        self.release(reservation_id, Release::Cancel).await
    }

    /// Pending → Expired, crediting the capacity back exactly once. System use
    /// only.
    ///
    /// # Errors
    ///
    /// - `InvalidState`: already terminal, or the hold window has not elapsed
    ///   for [`ExpiryReason::HoldElapsed`]
    /// - `NotFound`, `TransientInfrastructureFailure`
    pub async fn expire(
        &self,
        reservation_id: ReservationId,
        reason: ExpiryReason,
    ) -> EngineResult<Reservation> {
        self.release(reservation_id, Release::Expire(reason)).await
    }

    async fn release(&self, reservation_id: ReservationId, how: Release) -> EngineResult<Reservation> {
        let handle = self.ctx.store.reservation(reservation_id)?;
        let mut guard = handle.lock().await;

        if guard.status == ReservationStatus::Pending {
            if let Some(payment_id) = self.completed_payment(reservation_id).await? {
                tracing::warn!(
                    %reservation_id,
                    %payment_id,
                    "Hold already paid; release refused until its confirm lands"
                );
                return Err(EngineError::invalid_state(
                    EntityKind::Reservation,
                    reservation_id,
                    guard.status,
                    format!("payment {payment_id} completed; awaiting confirmation"),
                ));
            }
        }

        let now = self.ctx.now();
        let mut next = guard.clone();
        match how {
            Release::Cancel => next.cancel(now)?,
            Release::Expire(reason) => next.expire(reason, now)?,
        }

        let event_handle = self.ctx.store.event(next.event_id)?;
        let mut event_guard = event_handle.lock().await;
        let mut event = event_guard.clone();
        self.ledger.credit(&mut event, next.quantity);

        let mut batch = WriteBatch::new();
        batch.put_reservation(next.clone()).put_event(event.clone());
        self.ctx.commit(batch).await?;

        *event_guard = event;
        self.ledger.publish(&event_guard);
        drop(event_guard);
        *guard = next.clone();
        drop(guard);
        self.ctx.store.hold_closed(reservation_id);

        metrics::record_reservation(next.status.as_str());
        match how {
            Release::Cancel => tracing::info!(
                %reservation_id,
                event_id = %next.event_id,
                quantity = next.quantity,
                "Reservation cancelled"
            ),
            Release::Expire(reason) => tracing::info!(
                %reservation_id,
                event_id = %next.event_id,
                quantity = next.quantity,
                %reason,
                "Reservation expired"
            ),
        }
        Ok(next)
    }

    /// Snapshot of one reservation.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub async fn get(&self, reservation_id: ReservationId) -> EngineResult<Reservation> {
        let handle = self.ctx.store.reservation(reservation_id)?;
        let reservation = handle.lock().await.clone();
        Ok(reservation)
    }

    /// Snapshots of the reservations of `event_id`.
    pub async fn of_event(&self, event_id: EventId) -> Vec<Reservation> {
        let mut out = Vec::new();
        for id in self.ctx.store.reservations_of(event_id) {
            if let Ok(reservation) = self.get(id).await {
                out.push(reservation);
            }
        }
        out
    }

    /// Snapshots of every reservation matching `filter`, oldest first.
    pub async fn filtered<F>(&self, filter: F) -> Vec<Reservation>
    where
        F: Fn(&Reservation) -> bool,
    {
        let mut out = Vec::new();
        for (_, handle) in self.ctx.store.reservation_handles() {
            let reservation = handle.lock().await.clone();
            if filter(&reservation) {
                out.push(reservation);
            }
        }
        out.sort_by_key(|r| r.created_at);
        out
    }

    /// Pending reservations due for expiry at `now`, plus those whose event is
    /// in `cancelled_events`. Holds with a Completed payment are left out.
    ///
    /// # Errors
    ///
    /// `NotFound` if the payment index points at a payment that is gone.
    pub async fn expirable(
        &self,
        now: DateTime<Utc>,
        cancelled_events: &HashSet<EventId>,
    ) -> EngineResult<Vec<(ReservationId, ExpiryReason)>> {
        let mut due = Vec::new();
        for (id, event_id) in self.ctx.store.pending_holds() {
            let Ok(handle) = self.ctx.store.reservation(id) else {
                continue;
            };
            let guard = handle.lock().await;
            if guard.status != ReservationStatus::Pending {
                continue;
            }
            let reason = if guard.is_past_hold(now) {
                ExpiryReason::HoldElapsed
            } else if cancelled_events.contains(&event_id) {
                ExpiryReason::EventCancelled
            } else {
                continue;
            };
            if let Some(payment_id) = self.completed_payment(id).await? {
                tracing::debug!(reservation_id = %id, %payment_id, "Paid hold left for reconciliation");
                continue;
            }
            due.push((id, reason));
        }
        Ok(due)
    }

    /// A Completed payment against `reservation_id`, if any. Caller holds the
    /// reservation lock; payment locks come after it.
    async fn completed_payment(
        &self,
        reservation_id: ReservationId,
    ) -> EngineResult<Option<PaymentId>> {
        for payment_id in self.ctx.store.payments_for(PaymentTarget::Reservation(reservation_id)) {
            let status = self.ctx.store.payment(payment_id)?.lock().await.status;
            if status == PaymentStatus::Completed {
                return Ok(Some(payment_id));
            }
        }
        Ok(None)
    }
}
