//! The `BoxOffice` facade: the API surface other layers call.
//!
//! Wires the components together, checks caller authorization, serves
//! queries, recovers state on startup and owns the background tasks.

use crate::config::Config;
use crate::context::EngineContext;
use crate::gateway::SimulatedGateway;
use crate::ledger::CapacityLedger;
use crate::lifecycle::{Cancellation, EventLifecycle};
use crate::metrics;
use crate::outbox::{self, LogSink, Outbox};
use crate::repository::InMemoryRepository;
use crate::reservations::ReservationMachine;
use crate::settlement::{ReconcileReport, SettlementCoordinator};
use crate::sweeper::{SweepReport, Sweeper};
use boxoffice_core::environment::{Clock, SystemClock};
use boxoffice_core::error::{EngineError, EngineResult, EntityKind};
use boxoffice_core::event::{Event, EventDraft, EventPatch, EventStatus};
use boxoffice_core::gateway::{PaymentGateway, SettlementOutcome};
use boxoffice_core::identity::{CallerIdentity, IdentityProvider, Role};
use boxoffice_core::notification::{Notification, NotificationSink};
use boxoffice_core::payment::{Payment, PaymentMethod, PaymentTarget};
use boxoffice_core::repository::{Repository, WriteBatch};
use boxoffice_core::reservation::{ConfirmationCode, ExpiryReason, Reservation, ReservationStatus};
use boxoffice_core::types::{EventId, Money, PaymentId, ReservationId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Capacity breakdown of one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    /// Event
    pub event_id: EventId,
    /// Total capacity
    pub total: u32,
    /// Neither held nor sold
    pub available: u32,
    /// Soft-debited by Pending reservations
    pub held: u32,
    /// Permanently debited by Confirmed reservations
    pub sold: u32,
}

/// Result of [`BoxOffice::recover`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Events loaded
    pub events: usize,
    /// Reservations loaded
    pub reservations: usize,
    /// Payments loaded
    pub payments: usize,
    /// Events whose available capacity had drifted and was corrected
    pub drift_corrected: usize,
    /// Settlement replay results
    pub reconciled: ReconcileReport,
}

/// Handles to the sweeper and notification dispatcher.
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Signals shutdown and waits for every task to stop.
    pub async fn shutdown(self) {
        if self.shutdown.send(true).is_err() {
            tracing::debug!("Background tasks already stopped");
        }
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "Background task ended abnormally");
            }
        }
        tracing::info!("Background tasks stopped");
    }
}

/// Builder for [`BoxOffice`].
#[derive(Default)]
pub struct BoxOfficeBuilder {
    config: Option<Config>,
    clock: Option<Arc<dyn Clock>>,
    repository: Option<Arc<dyn Repository>>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    sink: Option<Arc<dyn NotificationSink>>,
    identity: Option<Arc<dyn IdentityProvider>>,
}

impl BoxOfficeBuilder {
    /// Engine settings; defaults to [`Config::default`].
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Time source; defaults to the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Durable storage; defaults to an [`InMemoryRepository`].
    #[must_use]
    pub fn repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Payment gateway; defaults to a [`SimulatedGateway`] using the
    /// configured success rate.
    #[must_use]
    pub fn gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Notification sink; defaults to [`LogSink`].
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Identity provider used by [`BoxOffice::authenticate`].
    #[must_use]
    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Wires the engine.
    #[must_use]
    pub fn build(self) -> BoxOffice {
        let config = self.config.unwrap_or_default();
        let gateway = self
            .gateway
            .unwrap_or_else(|| SimulatedGateway::shared(config.gateway.simulated_success_rate));
        let (outbox, notifications) = Outbox::channel(config.notifications.buffer);
        let ctx = Arc::new(EngineContext::new(
            config,
            self.repository
                .unwrap_or_else(|| Arc::new(InMemoryRepository::new())),
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            outbox,
        ));

        let ledger = CapacityLedger::new(Arc::clone(&ctx));
        let reservations = ReservationMachine::new(Arc::clone(&ctx), ledger.clone());
        let lifecycle = EventLifecycle::new(Arc::clone(&ctx), reservations.clone());
        let settlement = SettlementCoordinator::new(
            Arc::clone(&ctx),
            reservations.clone(),
            lifecycle.clone(),
            gateway,
        );
        let sweeper = Sweeper::new(Arc::clone(&ctx), reservations.clone(), settlement.clone());

        BoxOffice {
            ctx,
            ledger,
            reservations,
            lifecycle,
            settlement,
            sweeper,
            identity: self.identity,
            sink: self.sink.unwrap_or_else(|| Arc::new(LogSink)),
            notifications: Mutex::new(Some(notifications)),
        }
    }
}

/// Reservation-inventory engine facade.
pub struct BoxOffice {
    ctx: Arc<EngineContext>,
    ledger: CapacityLedger,
    reservations: ReservationMachine,
    lifecycle: EventLifecycle,
    settlement: SettlementCoordinator,
    sweeper: Sweeper,
    identity: Option<Arc<dyn IdentityProvider>>,
    sink: Arc<dyn NotificationSink>,
    notifications: Mutex<Option<mpsc::Receiver<Notification>>>,
}

fn forbidden(caller: &CallerIdentity, operation: &str) -> EngineError {
    tracing::debug!(caller = %caller.id, operation, "Forbidden");
    EngineError::Forbidden {
        caller: caller.id.to_string(),
        operation: operation.to_string(),
    }
}

impl BoxOffice {
    /// Starts building an engine.
    #[must_use]
    pub fn builder() -> BoxOfficeBuilder {
        BoxOfficeBuilder::default()
    }

    /// Engine settings.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    /// The Capacity Ledger.
    #[must_use]
    pub const fn ledger(&self) -> &CapacityLedger {
        &self.ledger
    }

    /// Resolves a bearer token through the identity provider.
    ///
    /// # Errors
    ///
    /// `Forbidden` for an unknown token or when no provider is configured,
    /// `TransientInfrastructureFailure` if the provider is down.
    pub async fn authenticate(&self, token: &str) -> EngineResult<CallerIdentity> {
        let Some(identity) = &self.identity else {
            return Err(EngineError::Forbidden {
                caller: "anonymous".to_string(),
                operation: "authenticate without an identity provider".to_string(),
            });
        };
        Ok(identity.caller_identity(token).await?)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Creates a Draft event owned by the caller.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless Organizer or Admin, plus
    /// [`EventLifecycle::create`] errors.
    pub async fn create_event(&self, caller: &CallerIdentity, draft: EventDraft) -> EngineResult<Event> {
        if !(caller.has_role(Role::Organizer) || caller.is_admin()) {
            return Err(forbidden(caller, "create events"));
        }
        self.lifecycle.create(caller.id, draft).await
    }

    /// Edits a Draft event.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the organizer or an Admin, plus
    /// [`EventLifecycle::edit`] errors.
    pub async fn edit_event(
        &self,
        caller: &CallerIdentity,
        event_id: EventId,
        patch: EventPatch,
    ) -> EngineResult<Event> {
        self.require_organizer(caller, event_id, "edit this event").await?;
        self.lifecycle.edit(event_id, patch).await
    }

    /// Draft → PendingPayment without opening a payment yet.
    ///
    /// # Errors
    ///
    /// `Forbidden`, plus [`EventLifecycle::request_publication_payment`] errors.
    pub async fn request_publication_payment(
        &self,
        caller: &CallerIdentity,
        event_id: EventId,
    ) -> EngineResult<Event> {
        self.require_organizer(caller, event_id, "publish this event").await?;
        self.lifecycle.request_publication_payment(event_id).await
    }

    /// Opens the publication-fee payment of an event, paid by the caller.
    ///
    /// # Errors
    ///
    /// `Forbidden`, plus [`SettlementCoordinator::open`] errors.
    pub async fn open_publication_payment(
        &self,
        caller: &CallerIdentity,
        event_id: EventId,
        amount: Money,
        method: PaymentMethod,
    ) -> EngineResult<Payment> {
        self.require_organizer(caller, event_id, "pay the publication fee").await?;
        self.settlement
            .open(PaymentTarget::PublicationFee(event_id), caller.id, amount, method)
            .await
    }

    /// Published → InProgress.
    ///
    /// # Errors
    ///
    /// `Forbidden`, plus [`EventLifecycle::start`] errors.
    pub async fn start_event(&self, caller: &CallerIdentity, event_id: EventId) -> EngineResult<Event> {
        self.require_organizer(caller, event_id, "start this event").await?;
        self.lifecycle.start(event_id).await
    }

    /// InProgress → Finished.
    ///
    /// # Errors
    ///
    /// `Forbidden`, plus [`EventLifecycle::finish`] errors.
    pub async fn finish_event(&self, caller: &CallerIdentity, event_id: EventId) -> EngineResult<Event> {
        self.require_organizer(caller, event_id, "finish this event").await?;
        self.lifecycle.finish(event_id).await
    }

    /// Cancels an event and expires its Pending reservations.
    ///
    /// # Errors
    ///
    /// `Forbidden`, plus [`EventLifecycle::cancel`] errors.
    pub async fn cancel_event(
        &self,
        caller: &CallerIdentity,
        event_id: EventId,
    ) -> EngineResult<Cancellation> {
        self.require_organizer(caller, event_id, "cancel this event").await?;
        self.lifecycle.cancel(event_id).await
    }

    // ------------------------------------------------------------------
    // Reservations
    // ------------------------------------------------------------------

    /// Holds capacity for the caller.
    ///
    /// # Errors
    ///
    /// [`ReservationMachine::create`] errors.
    pub async fn create_reservation(
        &self,
        caller: &CallerIdentity,
        event_id: EventId,
        quantity: u32,
    ) -> EngineResult<Reservation> {
        self.reservations.create(event_id, caller.id, quantity).await
    }

    /// Confirms a reservation. Normally driven by settlement.
    ///
    /// # Errors
    ///
    /// [`ReservationMachine::confirm`] errors.
    pub async fn confirm_reservation(&self, reservation_id: ReservationId) -> EngineResult<Reservation> {
        self.reservations.confirm(reservation_id).await
    }

    /// Cancels one of the caller's Pending reservations.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the holder or an Admin, plus
    /// [`ReservationMachine::cancel`] errors.
    pub async fn cancel_reservation(
        &self,
        caller: &CallerIdentity,
        reservation_id: ReservationId,
    ) -> EngineResult<Reservation> {
        self.require_holder(caller, reservation_id, "cancel this reservation")
            .await?;
        self.reservations.cancel(reservation_id).await
    }

    /// Expires a reservation. System use only.
    ///
    /// # Errors
    ///
    /// [`ReservationMachine::expire`] errors.
    pub async fn expire_reservation(
        &self,
        reservation_id: ReservationId,
        reason: ExpiryReason,
    ) -> EngineResult<Reservation> {
        self.reservations.expire(reservation_id, reason).await
    }

    // ------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------

    /// Opens a payment for one of the caller's reservations.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the holder or an Admin, plus
    /// [`SettlementCoordinator::open`] errors.
    pub async fn open_payment(
        &self,
        caller: &CallerIdentity,
        reservation_id: ReservationId,
        amount: Money,
        method: PaymentMethod,
    ) -> EngineResult<Payment> {
        self.require_holder(caller, reservation_id, "pay for this reservation")
            .await?;
        self.settlement
            .open(PaymentTarget::Reservation(reservation_id), caller.id, amount, method)
            .await
    }

    /// Charges a Pending payment through the gateway and settles it.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the payer or an Admin, plus
    /// [`SettlementCoordinator::process`] errors.
    pub async fn process_payment(
        &self,
        caller: &CallerIdentity,
        payment_id: PaymentId,
    ) -> EngineResult<Payment> {
        self.require_payer(caller, payment_id, "process this payment").await?;
        self.settlement.process(payment_id).await
    }

    /// Applies an externally reported settlement outcome.
    ///
    /// # Errors
    ///
    /// [`SettlementCoordinator::settle`] errors.
    pub async fn settle_payment(
        &self,
        payment_id: PaymentId,
        outcome: SettlementOutcome,
    ) -> EngineResult<Payment> {
        self.settlement.settle(payment_id, outcome).await
    }

    /// Refunds a Completed payment.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless Admin, plus [`SettlementCoordinator::refund`] errors.
    pub async fn refund_payment(
        &self,
        caller: &CallerIdentity,
        payment_id: PaymentId,
    ) -> EngineResult<Payment> {
        if !caller.is_admin() {
            return Err(forbidden(caller, "refund payments"));
        }
        self.settlement.refund(payment_id).await
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// One event.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub async fn get_event(&self, event_id: EventId) -> EngineResult<Event> {
        self.lifecycle.get(event_id).await
    }

    /// All events, or only Published ones, soonest first.
    pub async fn list_events(&self, published_only: bool) -> Vec<Event> {
        self.lifecycle
            .filtered(|e| !published_only || e.status == EventStatus::Published)
            .await
    }

    /// Events owned by `organizer_id`.
    pub async fn list_organizer_events(&self, organizer_id: UserId) -> Vec<Event> {
        self.lifecycle
            .filtered(|e| e.organizer_id == organizer_id)
            .await
    }

    /// One reservation, visible to its holder and Admins.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Forbidden`.
    pub async fn get_reservation(
        &self,
        caller: &CallerIdentity,
        reservation_id: ReservationId,
    ) -> EngineResult<Reservation> {
        self.require_holder(caller, reservation_id, "view this reservation")
            .await
    }

    /// Looks a reservation up by its confirmation code. Holder or Admin only.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown code, `Forbidden` for anyone else's.
    pub async fn find_reservation_by_code(
        &self,
        caller: &CallerIdentity,
        code: &ConfirmationCode,
    ) -> EngineResult<Reservation> {
        let reservation_id = self
            .ctx
            .store
            .reservation_by_code(code)
            .ok_or_else(|| EngineError::NotFound {
                entity: EntityKind::Reservation,
                id: code.to_string(),
            })?;
        self.require_holder(caller, reservation_id, "view this reservation")
            .await
    }

    /// The caller's reservations, oldest first.
    pub async fn list_holder_reservations(&self, caller: &CallerIdentity) -> Vec<Reservation> {
        let holder = caller.id;
        self.reservations.filtered(|r| r.holder_id == holder).await
    }

    /// One payment, visible to its payer and Admins.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Forbidden`.
    pub async fn get_payment(&self, caller: &CallerIdentity, payment_id: PaymentId) -> EngineResult<Payment> {
        self.require_payer(caller, payment_id, "view this payment").await
    }

    /// The caller's payments, oldest first.
    pub async fn list_payer_payments(&self, caller: &CallerIdentity) -> Vec<Payment> {
        let payer = caller.id;
        self.settlement.filtered(|p| p.payer_id == payer).await
    }

    /// Total, available, held and sold capacity of an event.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub async fn capacity_snapshot(&self, event_id: EventId) -> EngineResult<CapacitySnapshot> {
        // Reservations first: the lock order forbids taking them under the event lock.
        let reservations = self.reservations.of_event(event_id).await;
        let event = self.lifecycle.get(event_id).await?;
        let sum = |status: ReservationStatus| {
            reservations
                .iter()
                .filter(|r| r.status == status)
                .map(|r| r.quantity)
                .sum()
        };
        Ok(CapacitySnapshot {
            event_id,
            total: event.total_capacity,
            available: event.available_capacity,
            held: sum(ReservationStatus::Pending),
            sold: sum(ReservationStatus::Confirmed),
        })
    }

    /// Percentage of an event's capacity held or sold.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub async fn occupancy(&self, event_id: EventId) -> EngineResult<f64> {
        Ok(self.lifecycle.get(event_id).await?.occupancy_percent())
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Runs one expiration sweep.
    pub async fn sweep_once(&self) -> SweepReport {
        self.sweeper.sweep_once().await
    }

    /// Replays settlements interrupted between payment and target.
    pub async fn reconcile(&self) -> ReconcileReport {
        self.settlement.reconcile().await
    }

    /// Rebuilds the working set from the repository, re-derives every event's
    /// available capacity from its Pending and Confirmed reservations, then
    /// reconciles settlements. Call before serving traffic.
    ///
    /// # Errors
    ///
    /// `TransientInfrastructureFailure` if the repository cannot be read or a
    /// correction cannot be written.
    pub async fn recover(&self) -> EngineResult<RecoveryReport> {
        let snapshot = self.ctx.repository.load_snapshot().await?;

        let mut committed: HashMap<EventId, u32> = HashMap::new();
        for reservation in &snapshot.reservations {
            if reservation.status.holds_capacity() {
                *committed.entry(reservation.event_id).or_default() += reservation.quantity;
            }
        }
        self.ctx.store.load(snapshot);
        let (events, reservations, payments) = self.ctx.store.counts();

        let mut drift_corrected = 0;
        for (event_id, handle) in self.ctx.store.event_handles() {
            let mut guard = handle.lock().await;
            let held = committed.get(&event_id).copied().unwrap_or(0);
            let expected = guard.total_capacity.saturating_sub(held);
            if guard.available_capacity != expected {
                tracing::warn!(
                    %event_id,
                    stored = guard.available_capacity,
                    derived = expected,
                    "Available capacity drifted; correcting"
                );
                let mut next = guard.clone();
                next.available_capacity = expected;
                let mut batch = WriteBatch::new();
                batch.put_event(next.clone());
                self.ctx.commit(batch).await?;
                *guard = next;
                drift_corrected += 1;
            }
            metrics::update_capacity(&guard);
        }
        metrics::set_active_holds(self.ctx.store.pending_holds().len());

        let reconciled = self.settlement.reconcile().await;
        let report = RecoveryReport {
            events,
            reservations,
            payments,
            drift_corrected,
            reconciled,
        };
        tracing::info!(?report, "Recovery finished");
        Ok(report)
    }

    /// Spawns the expiration sweeper and the notification dispatcher.
    ///
    /// The dispatcher is spawned by the first call only.
    pub fn start_background(&self) -> BackgroundTasks {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        let receiver = self
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match receiver {
            Some(rx) => handles.push(tokio::spawn(outbox::dispatch(
                rx,
                Arc::clone(&self.sink),
                shutdown_rx.clone(),
            ))),
            None => tracing::warn!("Notification dispatcher already running"),
        }
        handles.push(tokio::spawn(self.sweeper.clone().run(shutdown_rx)));

        BackgroundTasks { shutdown, handles }
    }

    async fn require_organizer(
        &self,
        caller: &CallerIdentity,
        event_id: EventId,
        operation: &str,
    ) -> EngineResult<Event> {
        let event = self.lifecycle.get(event_id).await?;
        if caller.owns_or_admin(event.organizer_id) {
            Ok(event)
        } else {
            Err(forbidden(caller, operation))
        }
    }

    async fn require_holder(
        &self,
        caller: &CallerIdentity,
        reservation_id: ReservationId,
        operation: &str,
    ) -> EngineResult<Reservation> {
        let reservation = self.reservations.get(reservation_id).await?;
        if caller.owns_or_admin(reservation.holder_id) {
            Ok(reservation)
        } else {
            Err(forbidden(caller, operation))
        }
    }

    async fn require_payer(
        &self,
        caller: &CallerIdentity,
        payment_id: PaymentId,
        operation: &str,
    ) -> EngineResult<Payment> {
        let payment = self.settlement.get(payment_id).await?;
        if caller.owns_or_admin(payment.payer_id) {
            Ok(payment)
        } else {
            Err(forbidden(caller, operation))
        }
    }
}
