//! Error taxonomy for the reservation engine.
//!
//! Business-rule violations are terminal for the call that raised them and are
//! reported synchronously. Only [`EngineError::TransientInfrastructureFailure`]
//! is safe to retry.

use crate::types::{EventId, Money};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The kind of entity an error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// An event
    Event,
    /// A reservation
    Reservation,
    /// A payment
    Payment,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event => write!(f, "event"),
            Self::Reservation => write!(f, "reservation"),
            Self::Payment => write!(f, "payment"),
        }
    }
}

/// Copyable tag for an [`EngineError`], for callers that render messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Requested quantity exceeds what is available
    InsufficientCapacity,
    /// A state machine refused a transition
    InvalidTransition,
    /// The target entity is not in a compatible state
    InvalidState,
    /// The referenced entity does not exist
    NotFound,
    /// A payment amount does not match the expected charge
    AmountMismatch,
    /// Malformed input
    Validation,
    /// The caller may not perform the operation
    Forbidden,
    /// Storage or gateway failure unrelated to business state
    TransientInfrastructureFailure,
}

/// Errors returned by every engine operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Requested quantity exceeds the event's available capacity.
    #[error("insufficient capacity on event {event_id}: requested {requested}, available {available}")]
    InsufficientCapacity {
        /// Event the debit was attempted against
        event_id: EventId,
        /// Requested quantity
        requested: u32,
        /// Capacity available at the time of the attempt
        available: u32,
    },

    /// A state machine refused to move between two states.
    #[error("{entity} {id} cannot go from {from} to {to}")]
    InvalidTransition {
        /// Entity kind
        entity: EntityKind,
        /// Entity identifier
        id: String,
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// The operation needs the entity in another state.
    #[error("{entity} {id} is {state}: {reason}")]
    InvalidState {
        /// Entity kind
        entity: EntityKind,
        /// Entity identifier
        id: String,
        /// Current state
        state: String,
        /// What the operation required
        reason: String,
    },

    /// The referenced entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind
        entity: EntityKind,
        /// Entity identifier
        id: String,
    },

    /// Payment amount differs from the target's expected charge.
    #[error("amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch {
        /// Expected charge
        expected: Money,
        /// Offered amount
        actual: Money,
    },

    /// Malformed input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The caller lacks the role or ownership for the operation.
    #[error("caller {caller} may not {operation}")]
    Forbidden {
        /// Caller identifier
        caller: String,
        /// Attempted operation
        operation: String,
    },

    /// Storage or gateway failure; safe to retry with backoff.
    #[error("transient infrastructure failure: {0}")]
    TransientInfrastructureFailure(String),
}

impl EngineError {
    /// Returns the tag for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientCapacity { .. } => ErrorKind::InsufficientCapacity,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AmountMismatch { .. } => ErrorKind::AmountMismatch,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::TransientInfrastructureFailure(_) => ErrorKind::TransientInfrastructureFailure,
        }
    }

    /// Whether a retry with backoff may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientInfrastructureFailure(_))
    }

    /// Whether the error is an invalid state or an invalid transition.
    #[must_use]
    pub const fn is_state_conflict(&self) -> bool {
        matches!(self, Self::InvalidState { .. } | Self::InvalidTransition { .. })
    }

    /// Shorthand for a missing entity.
    pub fn not_found(entity: EntityKind, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for an operation refused because of the current state.
    pub fn invalid_state(
        entity: EntityKind,
        id: impl fmt::Display,
        state: impl fmt::Debug,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            entity,
            id: id.to_string(),
            state: format!("{state:?}"),
            reason: reason.into(),
        }
    }

    /// Shorthand for a refused state transition.
    pub fn invalid_transition(
        entity: EntityKind,
        id: impl fmt::Display,
        from: impl fmt::Debug,
        to: impl fmt::Debug,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            id: id.to_string(),
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }
}

/// Result alias used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;
