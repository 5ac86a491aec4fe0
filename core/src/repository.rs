//! Repository trait for durable engine state.
//!
//! The engine keeps its working set in memory and treats the repository as the
//! source of truth across restarts. Every mutation is written as one
//! [`WriteBatch`] before it becomes visible in memory, so a crash can lose an
//! in-flight operation but never leave half of one on disk.
//!
//! # Design
//!
//! - **Batch writes**: a batch holds the post-state of every record an operation
//!   touches (for example the debited event *and* the new reservation).
//! - **Upserts**: records are written whole, keyed by id. Replaying a batch is
//!   harmless, which is what makes commit retries safe.
//! - **Snapshot load**: recovery reads everything back with
//!   [`Repository::load_snapshot`] and rebuilds the in-memory store.
//!
//! # Example
//!
//! ```no_run
//! use boxoffice_core::repository::{Repository, WriteBatch};
//! use boxoffice_core::event::Event;
//!
//! async fn save<R: Repository>(repo: &R, event: Event) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut batch = WriteBatch::new();
//!     batch.put_event(event);
//!     repo.commit(batch).await?;
//!     Ok(())
//! }
//! ```

use crate::error::EngineError;
use crate::event::Event;
use crate::payment::Payment;
use crate::reservation::Reservation;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during repository operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Storage backend could not be reached or refused the write.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        Self::TransientInfrastructureFailure(err.to_string())
    }
}

impl RepositoryError {
    /// Whether the write may succeed if repeated. A record that failed to
    /// encode fails the same way every time.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Records written atomically by one engine operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    /// Event records
    pub events: Vec<Event>,
    /// Reservation records
    pub reservations: Vec<Reservation>,
    /// Payment records
    pub payments: Vec<Payment>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an event record.
    pub fn put_event(&mut self, event: Event) -> &mut Self {
        self.events.push(event);
        self
    }

    /// Adds a reservation record.
    pub fn put_reservation(&mut self, reservation: Reservation) -> &mut Self {
        self.reservations.push(reservation);
        self
    }

    /// Adds a payment record.
    pub fn put_payment(&mut self, payment: Payment) -> &mut Self {
        self.payments.push(payment);
        self
    }

    /// Whether the batch writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.reservations.is_empty() && self.payments.is_empty()
    }

    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len() + self.reservations.len() + self.payments.len()
    }
}

/// Everything the repository holds, as read back during recovery.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// All events
    pub events: Vec<Event>,
    /// All reservations
    pub reservations: Vec<Reservation>,
    /// All payments
    pub payments: Vec<Payment>,
}

/// Durable storage for events, reservations and payments.
///
/// Implementations must apply a batch all-or-nothing. Methods return boxed
/// futures so the trait stays object-safe and can be shared as
/// `Arc<dyn Repository>`.
pub trait Repository: Send + Sync {
    /// Writes every record in `batch` atomically.
    ///
    /// # Errors
    ///
    /// - `Storage`: the backend failed; nothing was written
    /// - `Serialization`: a record could not be encoded; nothing was written
    fn commit(
        &self,
        batch: WriteBatch,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>>;

    /// Reads back every stored record.
    ///
    /// # Errors
    ///
    /// - `Storage`: the backend failed
    /// - `Serialization`: a stored record could not be decoded
    fn load_snapshot(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Snapshot, RepositoryError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_reports_empty() {
        let batch = WriteBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }

    #[test]
    fn repository_errors_are_transient() {
        let err: EngineError = RepositoryError::Storage("disk full".to_string()).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn only_storage_errors_are_worth_repeating() {
        assert!(RepositoryError::Storage("busy".to_string()).is_retryable());
        assert!(!RepositoryError::Serialization("bad utf-8".to_string()).is_retryable());
    }
}
