//! # Boxoffice Testing
//!
//! Deterministic collaborators and fixtures for testing the boxoffice engine.
//!
//! This crate provides:
//! - Clocks: [`FixedClock`] and the advanceable [`ManualClock`]
//! - A [`ScriptedGateway`] whose outcomes are queued by the test
//! - A [`RecordingSink`] that captures notifications
//! - A [`FlakyRepository`] that fails commits on demand
//! - A [`StaticIdentity`] token table
//! - Fixtures and proptest strategies
//!
//! ## Example
//!
//! ```ignore
//! use boxoffice_testing::{ManualClock, test_clock};
//!
//! #[tokio::test]
//! async fn hold_expires() {
//!     let clock = Arc::new(ManualClock::new(test_clock().now()));
//!     let engine = BoxOffice::builder().clock(clock.clone()).build();
//!     // ...
//!     clock.advance(chrono::Duration::minutes(16));
//!     engine.sweep_once().await;
//! }
//! ```

use chrono::{DateTime, Utc};
use boxoffice_core::environment::Clock;

/// Collaborators that record what the engine asked of them
pub mod doubles;

/// Repository wrapper with injectable commit failures
pub mod flaky;

/// Ready-made identities, drafts and payment methods
pub mod fixtures;

/// Mock clocks.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use boxoffice_testing::mocks::FixedClock;
    /// use boxoffice_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when the test moves it.
    ///
    /// Shared between the engine and the test through an `Arc`; hold expiry
    /// is exercised by advancing it past the hold window.
    #[derive(Debug)]
    pub struct ManualClock {
        millis: AtomicI64,
    }

    impl ManualClock {
        /// Starts the clock at `start`.
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                millis: AtomicI64::new(start.timestamp_millis()),
            }
        }

        /// Moves the clock forward.
        pub fn advance(&self, by: chrono::Duration) {
            self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
        }

        /// Jumps to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Event capacities small enough to exhaust in a test.
    pub fn capacity() -> impl Strategy<Value = u32> {
        1u32..=50
    }

    /// One reservation request size.
    pub fn quantity() -> impl Strategy<Value = u32> {
        1u32..=8
    }

    /// What happens to a hold after it is created.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum HoldFate {
        /// Left Pending
        Keep,
        /// Paid and confirmed
        Confirm,
        /// Cancelled by the holder
        Cancel,
        /// Expired by the sweeper
        Expire,
    }

    /// Any [`HoldFate`].
    pub fn hold_fate() -> impl Strategy<Value = HoldFate> {
        prop_oneof![
            Just(HoldFate::Keep),
            Just(HoldFate::Confirm),
            Just(HoldFate::Cancel),
            Just(HoldFate::Expire),
        ]
    }

    /// A sequence of reservation requests with their fates.
    pub fn requests() -> impl Strategy<Value = Vec<(u32, HoldFate)>> {
        prop::collection::vec((quantity(), hold_fate()), 0..24)
    }
}

// Re-export commonly used items
pub use doubles::{RecordingSink, ScriptedGateway, StaticIdentity};
pub use flaky::FlakyRepository;
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn manual_clock_advances_only_when_told() {
        let start = test_clock().now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(chrono::Duration::minutes(15));
        assert_eq!(clock.now(), start + chrono::Duration::minutes(15));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
