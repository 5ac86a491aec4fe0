//! # Boxoffice Engine
//!
//! The concurrent shell around `boxoffice-core`: it owns the working set,
//! serializes access to each entity, persists every transition and runs the
//! background expiration sweeper.
//!
//! ## Core Components
//!
//! - **Capacity Ledger**: debits and credits an event's available capacity
//! - **Reservation State Machine**: Pending → Confirmed / Cancelled / Expired
//! - **Settlement Coordinator**: opens, charges, settles and refunds payments
//! - **Event Lifecycle Controller**: gates event transitions, cascades cancellation
//! - **Expiration Sweeper**: returns elapsed holds to the pool
//! - **`BoxOffice`**: the facade that wires the above and checks authorization
//!
//! ## Concurrency
//!
//! Every entity sits behind its own `tokio::sync::Mutex`. Operations spanning
//! entities lock in a fixed order: reservation, then event, then payment.
//! A transition is applied to a copy, committed to the repository, and only
//! then published to the working set, so a failed write leaves nothing behind.
//!
//! ## Example
//!
//! ```no_run
//! use boxoffice_engine::BoxOffice;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = BoxOffice::builder().build();
//! engine.recover().await?;
//! let background = engine.start_background();
//!
//! // ... serve requests ...
//!
//! background.shutdown().await;
//! # Ok(())
//! # }
//! ```

/// The facade
pub mod boxoffice;

/// Engine settings loaded from the environment
pub mod config;

/// Collaborators shared by every component
pub mod context;

/// Simulated payment gateway
pub mod gateway;

/// Capacity Ledger
pub mod ledger;

/// Event Lifecycle Controller
pub mod lifecycle;

/// Prometheus metrics for observability
pub mod metrics;

/// Notification outbox and dispatcher
pub mod outbox;

/// In-memory repository
pub mod repository;

/// Reservation State Machine
pub mod reservations;

/// Retry logic with exponential backoff
pub mod retry;

/// Payment Settlement Coordinator
pub mod settlement;

/// Per-entity locked working set
pub mod store;

/// Expiration Sweeper
pub mod sweeper;

pub use boxoffice::{BackgroundTasks, BoxOffice, BoxOfficeBuilder, CapacitySnapshot, RecoveryReport};
pub use config::Config;
pub use lifecycle::Cancellation;
pub use settlement::ReconcileReport;
pub use sweeper::SweepReport;
