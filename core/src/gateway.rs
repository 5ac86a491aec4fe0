//! Payment gateway collaborator.
//!
//! A gateway either answers with a definitive [`SettlementOutcome`] or fails with
//! a [`GatewayError`]. Only a definitive outcome is a settlement; an error says
//! nothing about whether money moved and is retried.

use crate::error::EngineError;
use crate::payment::PaymentMethod;
use crate::types::{Money, PaymentId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Definitive settlement reported by a gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementOutcome {
    /// Money moved
    Success {
        /// Gateway transaction id
        transaction_id: String,
    },
    /// Money did not move
    Failure {
        /// Decline reason
        reason: String,
    },
}

impl SettlementOutcome {
    /// Shorthand for a success.
    pub fn success(transaction_id: impl Into<String>) -> Self {
        Self::Success {
            transaction_id: transaction_id.into(),
        }
    }

    /// Shorthand for a failure.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    /// Whether money moved.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Gateway failure that is not a settlement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway could not be reached
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    /// The gateway gave up waiting on the processor
    #[error("gateway timed out after {0} ms")]
    Timeout(u64),
}

impl GatewayError {
    /// Whether repeating the call is safe. A timeout is not: the processor
    /// may already have acted on the request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<GatewayError> for EngineError {
    fn from(err: GatewayError) -> Self {
        Self::TransientInfrastructureFailure(err.to_string())
    }
}

/// Result of a gateway call
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Payment gateway trait
///
/// Abstraction over payment processors. The engine bounds every call with a
/// timeout and treats an elapsed timeout as a failed settlement.
pub trait PaymentGateway: Send + Sync {
    /// Charges `amount` with `method`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when no definitive outcome is available.
    fn charge(
        &self,
        payment_id: PaymentId,
        amount: Money,
        method: PaymentMethod,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<SettlementOutcome>> + Send>>;

    /// Refunds a completed transaction, returning the refund id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the refund could not be issued.
    fn refund(
        &self,
        transaction_id: &str,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unreachable_gateways_are_retried() {
        assert!(GatewayError::Unavailable("503".to_string()).is_retryable());
        assert!(!GatewayError::Timeout(5_000).is_retryable());

        let err: EngineError = GatewayError::Timeout(5_000).into();
        assert!(err.is_retryable());
    }
}
