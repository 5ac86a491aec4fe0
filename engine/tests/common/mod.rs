//! Shared harness for the engine integration tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
#![allow(dead_code)] // Not every test file uses every helper

use boxoffice_core::environment::Clock;
use boxoffice_core::event::{Event, EventStatus};
use boxoffice_core::gateway::SettlementOutcome;
use boxoffice_core::identity::CallerIdentity;
use boxoffice_core::payment::Payment;
use boxoffice_core::repository::Repository;
use boxoffice_core::reservation::Reservation;
use boxoffice_engine::repository::InMemoryRepository;
use boxoffice_engine::{BoxOffice, Config};
use boxoffice_testing::{fixtures, test_clock, FlakyRepository, ManualClock, RecordingSink, ScriptedGateway};
use std::sync::Arc;

/// Config with fast retries and a short gateway timeout.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.gateway.timeout_ms = 200;
    config.holds.sweep_interval_secs = 1;
    config
}

/// An engine wired to deterministic collaborators, plus handles to them.
pub struct Harness {
    pub engine: BoxOffice,
    pub clock: Arc<ManualClock>,
    pub gateway: ScriptedGateway,
    pub sink: RecordingSink,
    pub repository: FlakyRepository,
    pub storage: Arc<InMemoryRepository>,
    pub organizer: CallerIdentity,
    pub admin: CallerIdentity,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        Self::on_storage(config, Arc::new(InMemoryRepository::new()))
    }

    /// Builds an engine over existing storage, as a restarted process would.
    pub fn on_storage(config: Config, storage: Arc<InMemoryRepository>) -> Self {
        Self::assemble(config, storage, ScriptedGateway::new())
    }

    pub fn with_gateway(config: Config, gateway: ScriptedGateway) -> Self {
        Self::assemble(config, Arc::new(InMemoryRepository::new()), gateway)
    }

    fn assemble(config: Config, storage: Arc<InMemoryRepository>, gateway: ScriptedGateway) -> Self {
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let sink = RecordingSink::new();
        let repository = FlakyRepository::new(storage.clone() as Arc<dyn Repository>);
        let engine = BoxOffice::builder()
            .config(config)
            .clock(clock.clone())
            .gateway(Arc::new(gateway.clone()))
            .sink(Arc::new(sink.clone()))
            .repository(Arc::new(repository.clone()))
            .build();
        Self {
            engine,
            clock,
            gateway,
            sink,
            repository,
            storage,
            organizer: fixtures::organizer(),
            admin: fixtures::admin(),
        }
    }

    /// Creates an event and settles its publication fee.
    pub async fn published_event(&self, capacity: u32) -> Event {
        let now = self.clock.now();
        let event = self
            .engine
            .create_event(&self.organizer, fixtures::concert_draft(now, capacity))
            .await
            .unwrap();
        let fee = self
            .engine
            .open_publication_payment(
                &self.organizer,
                event.id,
                event.publication_fee,
                fixtures::card(),
            )
            .await
            .unwrap();
        self.engine
            .settle_payment(fee.id, SettlementOutcome::success(format!("fee_{}", event.id)))
            .await
            .unwrap();
        let event = self.engine.get_event(event.id).await.unwrap();
        assert_eq!(event.status, EventStatus::Published);
        event
    }

    pub async fn hold(&self, holder: &CallerIdentity, event: &Event, quantity: u32) -> Reservation {
        self.engine
            .create_reservation(holder, event.id, quantity)
            .await
            .unwrap()
    }

    /// Opens a payment for the full amount of `reservation`.
    pub async fn open(&self, holder: &CallerIdentity, reservation: &Reservation) -> Payment {
        self.engine
            .open_payment(holder, reservation.id, reservation.total_amount, fixtures::card())
            .await
            .unwrap()
    }

    /// Opens a payment and settles it successfully.
    pub async fn pay(&self, holder: &CallerIdentity, reservation: &Reservation) -> Payment {
        let payment = self.open(holder, reservation).await;
        self.engine
            .settle_payment(payment.id, SettlementOutcome::success(format!("txn_{}", payment.id)))
            .await
            .unwrap()
    }

    pub async fn available(&self, event: &Event) -> u32 {
        self.engine
            .get_event(event.id)
            .await
            .unwrap()
            .available_capacity
    }

    pub fn clock_now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Moves the clock past the hold window.
    pub fn elapse_hold(&self) {
        let window = self.engine.config().hold_window();
        self.clock.advance(window + chrono::Duration::seconds(1));
    }
}
