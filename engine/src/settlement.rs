//! Payment Settlement Coordinator.
//!
//! A settled payment is committed before the dependent reservation or event
//! transition is attempted, and the payment lock is released first. If the
//! process dies in between, [`SettlementCoordinator::reconcile`] finds
//! "Completed but target still pending" and replays the second step, which is
//! idempotent.

use crate::context::EngineContext;
use crate::lifecycle::{EventLifecycle, status_label};
use crate::metrics;
use crate::reservations::ReservationMachine;
use crate::retry::retry;
use boxoffice_core::error::{EngineError, EngineResult, EntityKind};
use boxoffice_core::event::EventStatus;
use boxoffice_core::gateway::{GatewayError, PaymentGateway, SettlementOutcome};
use boxoffice_core::notification::{NotificationKind, Subject};
use boxoffice_core::payment::{Payment, PaymentMethod, PaymentStatus, PaymentTarget};
use boxoffice_core::repository::WriteBatch;
use boxoffice_core::reservation::ReservationStatus;
use boxoffice_core::types::{EventId, Money, PaymentId, ReservationId, UserId};
use std::sync::Arc;

/// Result of one reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Completed payments inspected
    pub examined: usize,
    /// Payments whose target transition was replayed
    pub repaired: usize,
    /// Replays that failed; retried on the next pass
    pub failed: usize,
}

/// Payment Settlement Coordinator
#[derive(Clone)]
pub struct SettlementCoordinator {
    ctx: Arc<EngineContext>,
    reservations: ReservationMachine,
    lifecycle: EventLifecycle,
    gateway: Arc<dyn PaymentGateway>,
}

impl SettlementCoordinator {
    /// Creates the coordinator.
    #[must_use]
    pub fn new(
        ctx: Arc<EngineContext>,
        reservations: ReservationMachine,
        lifecycle: EventLifecycle,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            ctx,
            reservations,
            lifecycle,
            gateway,
        }
    }

    /// Opens a Pending payment against a reservation or a publication fee.
    ///
    /// Opening a publication fee on a Draft event moves it to PendingPayment in
    /// the same batch. A PendingPayment event whose previous fee payment failed
    /// accepts a new one.
    ///
    /// # Errors
    ///
    /// - `Validation`: unusable payment method
    /// - `AmountMismatch`: amount differs from the expected charge
    /// - `InvalidState`: the reservation is not Pending, the event does not
    ///   accept a fee, or another payment is already active on the target
    /// - `NotFound`, `TransientInfrastructureFailure`
    pub async fn open(
        &self,
        target: PaymentTarget,
        payer_id: UserId,
        amount: Money,
        method: PaymentMethod,
    ) -> EngineResult<Payment> {
        method.validate()?;
        let payment = match target {
            PaymentTarget::Reservation(id) => {
                self.open_for_reservation(id, payer_id, amount, method).await?
            }
            PaymentTarget::PublicationFee(id) => {
                self.open_for_fee(id, payer_id, amount, method).await?
            }
        };
        metrics::record_payment(PaymentStatus::Pending.as_str(), 0);
        tracing::info!(
            payment_id = %payment.id,
            %target,
            amount = %payment.amount,
            method = %payment.method,
            "Payment opened"
        );
        Ok(payment)
    }

    async fn open_for_reservation(
        &self,
        reservation_id: ReservationId,
        payer_id: UserId,
        amount: Money,
        method: PaymentMethod,
    ) -> EngineResult<Payment> {
        let target = PaymentTarget::Reservation(reservation_id);
        let handle = self.ctx.store.reservation(reservation_id)?;
        let guard = handle.lock().await;
        if guard.status != ReservationStatus::Pending {
            return Err(EngineError::invalid_state(
                EntityKind::Reservation,
                reservation_id,
                guard.status,
                "payments require a Pending reservation",
            ));
        }
        if amount != guard.total_amount {
            return Err(EngineError::AmountMismatch {
                expected: guard.total_amount,
                actual: amount,
            });
        }
        self.ensure_no_active_payment(target).await?;

        let event_name = self.ctx.store.event(guard.event_id)?.lock().await.name.clone();
        let concept = format!("{} tickets for {event_name}", guard.quantity);
        let payment = Payment::pending(target, payer_id, amount, method, concept, self.ctx.now());

        let mut batch = WriteBatch::new();
        batch.put_payment(payment.clone());
        self.ctx.commit(batch).await?;
        self.ctx.store.insert_payment(payment.clone());
        drop(guard);
        Ok(payment)
    }

    async fn open_for_fee(
        &self,
        event_id: EventId,
        payer_id: UserId,
        amount: Money,
        method: PaymentMethod,
    ) -> EngineResult<Payment> {
        let target = PaymentTarget::PublicationFee(event_id);
        let handle = self.ctx.store.event(event_id)?;
        let mut guard = handle.lock().await;
        if !matches!(guard.status, EventStatus::Draft | EventStatus::PendingPayment) {
            return Err(EngineError::invalid_state(
                EntityKind::Event,
                event_id,
                guard.status,
                "publication fees are paid on Draft events",
            ));
        }
        if amount != guard.publication_fee {
            return Err(EngineError::AmountMismatch {
                expected: guard.publication_fee,
                actual: amount,
            });
        }
        self.ensure_no_active_payment(target).await?;

        let now = self.ctx.now();
        let mut event = guard.clone();
        let requested = event.status == EventStatus::Draft;
        if requested {
            event.transition(EventStatus::PendingPayment, now)?;
        }
        let concept = format!("publication fee for {}", event.name);
        let payment = Payment::pending(target, payer_id, amount, method, concept, now);

        let mut batch = WriteBatch::new();
        batch.put_payment(payment.clone());
        if requested {
            batch.put_event(event.clone());
        }
        self.ctx.commit(batch).await?;
        *guard = event;
        self.ctx.store.insert_payment(payment.clone());
        drop(guard);

        if requested {
            metrics::record_event(status_label(EventStatus::PendingPayment));
            tracing::info!(%event_id, "Event awaiting publication fee");
        }
        Ok(payment)
    }

    async fn ensure_no_active_payment(&self, target: PaymentTarget) -> EngineResult<()> {
        for payment_id in self.ctx.store.payments_for(target) {
            let handle = self.ctx.store.payment(payment_id)?;
            let status = handle.lock().await.status;
            if status.is_active() {
                return Err(EngineError::invalid_state(
                    EntityKind::Payment,
                    payment_id,
                    status,
                    format!("an active payment already exists for {target}"),
                ));
            }
        }
        Ok(())
    }

    /// Applies a gateway-reported outcome.
    ///
    /// Success marks the payment Completed, then confirms the reservation or
    /// publishes the event. Failure marks it Failed and leaves the target
    /// alone. Re-settling with the same outcome re-drives the target step and
    /// applies nothing twice.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition`: the outcome contradicts the recorded one
    /// - `InvalidState`: the reservation was released before the payment
    ///   settled; the payment stays Completed and needs a refund
    /// - `NotFound`, `TransientInfrastructureFailure`
    pub async fn settle(
        &self,
        payment_id: PaymentId,
        outcome: SettlementOutcome,
    ) -> EngineResult<Payment> {
        let handle = self.ctx.store.payment(payment_id)?;
        let mut guard = handle.lock().await;
        let payment = self.apply_outcome(&mut guard, outcome).await?;
        drop(guard);

        self.drive_target(&payment).await?;
        Ok(payment)
    }

    /// Charges a Pending payment through the gateway and settles it.
    ///
    /// Each gateway call is bounded by the configured timeout; an elapsed
    /// timeout settles as a Failure. Unreachable-gateway errors are retried.
    /// The payment lock is not held while the gateway works, so a settlement
    /// callback for the same payment is applied at once; the charge result
    /// then lands as a duplicate. One charge per payment is in flight at a
    /// time.
    ///
    /// # Errors
    ///
    /// - `InvalidState`: the payment is not Pending, a charge is already in
    ///   flight, or its target no longer accepts it
    /// - `InvalidTransition`: a concurrent settlement recorded the opposite
    ///   outcome
    /// - `TransientInfrastructureFailure`: the gateway stayed unavailable or
    ///   timed out on its side; the payment is still Pending
    /// - anything [`Self::settle`] returns
    pub async fn process(&self, payment_id: PaymentId) -> EngineResult<Payment> {
        let Some(_claim) = self.ctx.store.claim_charge(payment_id) else {
            return Err(EngineError::invalid_state(
                EntityKind::Payment,
                payment_id,
                PaymentStatus::Pending,
                "a charge is already in flight",
            ));
        };
        let snapshot = self.get(payment_id).await?;
        if snapshot.status != PaymentStatus::Pending {
            return Err(EngineError::invalid_state(
                EntityKind::Payment,
                payment_id,
                snapshot.status,
                "only Pending payments can be processed",
            ));
        }
        self.ensure_target_open(&snapshot).await?;

        let outcome = self.charge(&snapshot).await?;

        let handle = self.ctx.store.payment(payment_id)?;
        let mut guard = handle.lock().await;
        if guard.status != PaymentStatus::Pending {
            tracing::debug!(%payment_id, status = ?guard.status, "Payment settled while the charge was in flight");
        }
        let payment = self.apply_outcome(&mut guard, outcome).await?;
        drop(guard);

        self.drive_target(&payment).await?;
        Ok(payment)
    }

    /// Refunds a Completed payment through the gateway. The reservation it paid
    /// for is not cancelled. A gateway timeout is not retried, since the refund
    /// may have gone through.
    ///
    /// # Errors
    ///
    /// - `InvalidState`: the payment is not Completed
    /// - `NotFound`, `TransientInfrastructureFailure`
    pub async fn refund(&self, payment_id: PaymentId) -> EngineResult<Payment> {
        let handle = self.ctx.store.payment(payment_id)?;
        let mut guard = handle.lock().await;
        guard.ensure_refundable()?;
        let transaction_id = guard.transaction_id.clone().ok_or_else(|| {
            EngineError::invalid_state(
                EntityKind::Payment,
                payment_id,
                guard.status,
                "no gateway transaction to refund",
            )
        })?;

        let amount = guard.amount;
        let timeout = self.ctx.config.gateway_timeout();
        let timeout_ms = self.ctx.config.gateway.timeout_ms;
        let refund_id = retry(
            self.ctx.retry_policy(),
            "gateway.refund",
            || {
                let call = self.gateway.refund(&transaction_id, amount);
                async move {
                    tokio::time::timeout(timeout, call)
                        .await
                        .unwrap_or(Err(GatewayError::Timeout(timeout_ms)))
                }
            },
            GatewayError::is_retryable,
        )
        .await?;

        let mut next = guard.clone();
        next.refund(refund_id, self.ctx.now())?;
        let mut batch = WriteBatch::new();
        batch.put_payment(next.clone());
        self.ctx.commit(batch).await?;
        *guard = next.clone();
        drop(guard);

        metrics::record_payment(PaymentStatus::Refunded.as_str(), 0);
        tracing::info!(%payment_id, amount = %amount, target = %next.target, "Payment refunded");
        Ok(next)
    }

    /// Replays the target step of every Completed payment whose reservation is
    /// still Pending or whose event is still PendingPayment.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for (payment_id, handle) in self.ctx.store.payment_handles() {
            let payment = handle.lock().await.clone();
            if payment.status != PaymentStatus::Completed {
                continue;
            }
            report.examined += 1;
            if !self.target_still_pending(payment.target).await {
                continue;
            }
            match self.drive_target(&payment).await {
                Ok(()) => {
                    report.repaired += 1;
                    tracing::info!(%payment_id, target = %payment.target, "Settlement replayed");
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(%payment_id, error = %err, "Settlement replay failed");
                }
            }
        }
        if report.repaired > 0 {
            metrics::record_reconciled(report.repaired as u64);
        }
        tracing::debug!(?report, "Reconciliation pass finished");
        report
    }

    /// Snapshot of one payment.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub async fn get(&self, payment_id: PaymentId) -> EngineResult<Payment> {
        let handle = self.ctx.store.payment(payment_id)?;
        let payment = handle.lock().await.clone();
        Ok(payment)
    }

    /// Snapshots of every payment matching `filter`, oldest first.
    pub async fn filtered<F>(&self, filter: F) -> Vec<Payment>
    where
        F: Fn(&Payment) -> bool,
    {
        let mut out = Vec::new();
        for (_, handle) in self.ctx.store.payment_handles() {
            let payment = handle.lock().await.clone();
            if filter(&payment) {
                out.push(payment);
            }
        }
        out.sort_by_key(|p| p.created_at);
        out
    }

    async fn apply_outcome(
        &self,
        current: &mut Payment,
        outcome: SettlementOutcome,
    ) -> EngineResult<Payment> {
        let now = self.ctx.now();
        let mut next = current.clone();
        let changed = match outcome {
            SettlementOutcome::Success { transaction_id } => next.complete(transaction_id, now)?,
            SettlementOutcome::Failure { reason } => next.fail(reason, now)?,
        };
        if !changed {
            tracing::debug!(payment_id = %next.id, status = ?next.status, "Duplicate settlement");
            return Ok(next);
        }

        let mut batch = WriteBatch::new();
        batch.put_payment(next.clone());
        self.ctx.commit(batch).await?;
        *current = next.clone();

        metrics::record_payment(next.status.as_str(), next.amount.cents());
        match next.status {
            PaymentStatus::Completed => {
                tracing::info!(
                    payment_id = %next.id,
                    transaction_id = next.transaction_id.as_deref().unwrap_or_default(),
                    amount = %next.amount,
                    "Payment completed"
                );
                self.ctx.notify(
                    NotificationKind::PaymentCompleted,
                    Subject::Payment(next.id),
                    format!("Payment of {} received: {}", next.amount, next.concept),
                );
            }
            _ => {
                let reason = next.failure_reason.as_deref().unwrap_or_default();
                tracing::warn!(payment_id = %next.id, reason, "Payment failed");
                self.ctx.notify(
                    NotificationKind::PaymentFailed,
                    Subject::Payment(next.id),
                    format!("Payment of {} failed: {reason}", next.amount),
                );
            }
        }
        Ok(next)
    }

    async fn drive_target(&self, payment: &Payment) -> EngineResult<()> {
        if payment.status != PaymentStatus::Completed {
            return Ok(());
        }
        match payment.target {
            PaymentTarget::Reservation(reservation_id) => {
                match self.reservations.confirm(reservation_id).await {
                    Ok(_) => Ok(()),
                    Err(EngineError::InvalidTransition { .. }) => {
                        let state = self.reservations.get(reservation_id).await?.status;
                        tracing::warn!(
                            payment_id = %payment.id,
                            %reservation_id,
                            ?state,
                            "Payment completed for a released reservation; refund required"
                        );
                        Err(EngineError::invalid_state(
                            EntityKind::Reservation,
                            reservation_id,
                            state,
                            format!("released before payment {} settled; refund required", payment.id),
                        ))
                    }
                    Err(err) => Err(err),
                }
            }
            PaymentTarget::PublicationFee(event_id) => {
                let event = self.lifecycle.on_publication_fee_settled(event_id).await?;
                if event.status == EventStatus::Cancelled {
                    tracing::warn!(
                        payment_id = %payment.id,
                        %event_id,
                        "Publication fee completed for a cancelled event; refund required"
                    );
                }
                Ok(())
            }
        }
    }

    async fn ensure_target_open(&self, payment: &Payment) -> EngineResult<()> {
        match payment.target {
            PaymentTarget::Reservation(id) => {
                let status = self.ctx.store.reservation(id)?.lock().await.status;
                if status != ReservationStatus::Pending {
                    return Err(EngineError::invalid_state(
                        EntityKind::Reservation,
                        id,
                        status,
                        "the hold is no longer Pending",
                    ));
                }
            }
            PaymentTarget::PublicationFee(id) => {
                let status = self.ctx.store.event(id)?.lock().await.status;
                if status != EventStatus::PendingPayment {
                    return Err(EngineError::invalid_state(
                        EntityKind::Event,
                        id,
                        status,
                        "the event is not awaiting its publication fee",
                    ));
                }
            }
        }
        Ok(())
    }

    async fn target_still_pending(&self, target: PaymentTarget) -> bool {
        match target {
            PaymentTarget::Reservation(id) => match self.ctx.store.reservation(id) {
                Ok(handle) => handle.lock().await.status == ReservationStatus::Pending,
                Err(_) => false,
            },
            PaymentTarget::PublicationFee(id) => match self.ctx.store.event(id) {
                Ok(handle) => handle.lock().await.status == EventStatus::PendingPayment,
                Err(_) => false,
            },
        }
    }

    async fn charge(&self, payment: &Payment) -> EngineResult<SettlementOutcome> {
        let timeout = self.ctx.config.gateway_timeout();
        let timeout_ms = self.ctx.config.gateway.timeout_ms;
        let outcome = retry(
            self.ctx.retry_policy(),
            "gateway.charge",
            || {
                let call = self
                    .gateway
                    .charge(payment.id, payment.amount, payment.method.clone());
                async move {
                    match tokio::time::timeout(timeout, call).await {
                        Ok(result) => result,
                        Err(_) => Ok(SettlementOutcome::failure(format!(
                            "gateway did not answer within {timeout_ms} ms"
                        ))),
                    }
                }
            },
            GatewayError::is_retryable,
        )
        .await?;
        Ok(outcome)
    }
}
