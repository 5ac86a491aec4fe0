//! # Boxoffice Core
//!
//! Domain types, state tables and environment traits for the boxoffice
//! reservation-inventory engine.
//!
//! This crate holds everything that is *pure*: the entities (events,
//! reservations, payments), the legal transitions between their states, the
//! error taxonomy, and the traits through which the engine talks to the world
//! (clock, payment gateway, notification sink, identity provider, repository).
//!
//! ## Core Concepts
//!
//! - **Event**: a sellable occasion with bounded capacity and a lifecycle
//! - **Reservation**: a time-limited hold on part of an event's capacity
//! - **Payment**: money moving against a reservation or an event's publication fee
//! - **Environment**: injected collaborators, abstracted behind traits
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell: transitions here are pure functions on
//!   owned data; locking, persistence and I/O live in `boxoffice-engine`
//! - Explicit errors: every rejected transition is a tagged [`error::EngineError`]
//! - Dependency Injection via Environment traits
//!
//! ## Example
//!
//! ```
//! use boxoffice_core::event::{Event, EventDraft};
//! use boxoffice_core::types::{Money, UserId};
//! use chrono::{Duration, Utc};
//!
//! let now = Utc::now();
//! let mut event = Event::draft(
//!     EventDraft {
//!         name: "Summer Festival".to_string(),
//!         description: String::new(),
//!         category: "music".to_string(),
//!         venue: "Main Hall".to_string(),
//!         date: now + Duration::days(30),
//!         total_capacity: 10,
//!         price: Money::from_cents(5_000),
//!         publication_fee: Money::from_cents(1_000),
//!     },
//!     UserId::new(),
//!     now,
//! );
//!
//! assert_eq!(event.available_capacity, 10);
//! assert!(event.try_debit(3).is_ok());
//! assert_eq!(event.available_capacity, 7);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod error;
pub mod event;
pub mod gateway;
pub mod identity;
pub mod notification;
pub mod payment;
pub mod repository;
pub mod reservation;
pub mod types;

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// into the engine. The clock lives here; the larger collaborators have
/// their own modules ([`crate::gateway`], [`crate::notification`],
/// [`crate::identity`], [`crate::repository`]).
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Hold windows and expiry decisions are always taken against this clock,
    /// never against `Utc::now()` directly.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
