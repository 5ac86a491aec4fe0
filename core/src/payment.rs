//! Payment entity and its one-directional state table.
//!
//! `Pending → {Completed, Failed}` and `Completed → Refunded`. Nothing else.

use crate::error::{EngineError, EngineResult, EntityKind};
use crate::types::{EventId, Money, PaymentId, ReservationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payment status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Opened, awaiting settlement
    Pending,
    /// Settled successfully
    Completed,
    /// Settled unsuccessfully (terminal)
    Failed,
    /// Money returned after completion (terminal)
    Refunded,
}

impl PaymentStatus {
    /// Pending and Completed payments block a new payment on the same target.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Completed)
    }

    /// Label used in metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

/// What a payment pays for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentTarget {
    /// The total amount of a reservation
    Reservation(ReservationId),
    /// The publication fee of an event
    PublicationFee(EventId),
}

impl fmt::Display for PaymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reservation(id) => write!(f, "reservation {id}"),
            Self::PublicationFee(id) => write!(f, "publication fee of event {id}"),
        }
    }
}

/// Payment method
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Credit card payment
    CreditCard {
        /// Last four digits of card
        last_four: String,
    },
    /// `PayPal` payment
    PayPal {
        /// `PayPal` email
        email: String,
    },
    /// Bank transfer
    BankTransfer {
        /// Account reference
        reference: String,
    },
}

impl PaymentMethod {
    /// Rejects methods with missing details.
    ///
    /// # Errors
    ///
    /// [`EngineError::Validation`] when the method cannot be charged.
    pub fn validate(&self) -> EngineResult<()> {
        match self {
            Self::CreditCard { last_four } => {
                if last_four.len() != 4 || !last_four.chars().all(|c| c.is_ascii_digit()) {
                    return Err(EngineError::Validation(
                        "credit card needs the last four digits".to_string(),
                    ));
                }
            }
            Self::PayPal { email } => {
                if !email.contains('@') {
                    return Err(EngineError::Validation("PayPal needs an email".to_string()));
                }
            }
            Self::BankTransfer { reference } => {
                if reference.trim().is_empty() {
                    return Err(EngineError::Validation(
                        "bank transfer needs an account reference".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreditCard { last_four } => write!(f, "card ending {last_four}"),
            Self::PayPal { email } => write!(f, "PayPal {email}"),
            Self::BankTransfer { reference } => write!(f, "bank transfer {reference}"),
        }
    }
}

/// Payment entity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique payment identifier
    pub id: PaymentId,
    /// What is being paid for
    pub target: PaymentTarget,
    /// Who pays
    pub payer_id: UserId,
    /// Amount, equal to the target's charge at opening time
    pub amount: Money,
    /// Lifecycle status
    pub status: PaymentStatus,
    /// Payment method
    pub method: PaymentMethod,
    /// Human-readable description of the charge
    pub concept: String,
    /// Gateway transaction id, set on completion
    pub transaction_id: Option<String>,
    /// Gateway reason, set on failure
    pub failure_reason: Option<String>,
    /// Gateway refund id, set on refund
    pub refund_id: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Builds a Pending payment.
    #[must_use]
    pub fn pending(
        target: PaymentTarget,
        payer_id: UserId,
        amount: Money,
        method: PaymentMethod,
        concept: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            target,
            payer_id,
            amount,
            status: PaymentStatus::Pending,
            method,
            concept,
            transaction_id: None,
            failure_reason: None,
            refund_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pending → Completed. Returns `false` when already Completed.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidTransition`] from Failed or Refunded.
    pub fn complete(&mut self, transaction_id: String, now: DateTime<Utc>) -> EngineResult<bool> {
        match self.status {
            PaymentStatus::Pending => {
                self.status = PaymentStatus::Completed;
                self.transaction_id = Some(transaction_id);
                self.updated_at = now;
                Ok(true)
            }
            PaymentStatus::Completed => Ok(false),
            status => Err(self.refused(status, PaymentStatus::Completed)),
        }
    }

    /// Pending → Failed. Returns `false` when already Failed.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidTransition`] from Completed or Refunded.
    pub fn fail(&mut self, reason: String, now: DateTime<Utc>) -> EngineResult<bool> {
        match self.status {
            PaymentStatus::Pending => {
                self.status = PaymentStatus::Failed;
                self.failure_reason = Some(reason);
                self.updated_at = now;
                Ok(true)
            }
            PaymentStatus::Failed => Ok(false),
            status => Err(self.refused(status, PaymentStatus::Failed)),
        }
    }

    /// Completed → Refunded.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidState`] unless Completed.
    pub fn refund(&mut self, refund_id: String, now: DateTime<Utc>) -> EngineResult<()> {
        self.ensure_refundable()?;
        self.status = PaymentStatus::Refunded;
        self.refund_id = Some(refund_id);
        self.updated_at = now;
        Ok(())
    }

    /// Checks that a refund may be requested.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidState`] unless Completed.
    pub fn ensure_refundable(&self) -> EngineResult<()> {
        if self.status == PaymentStatus::Completed {
            Ok(())
        } else {
            Err(EngineError::invalid_state(
                EntityKind::Payment,
                self.id,
                self.status,
                "only Completed payments can be refunded",
            ))
        }
    }

    fn refused(&self, from: PaymentStatus, to: PaymentStatus) -> EngineError {
        EngineError::invalid_transition(EntityKind::Payment, self.id, from, to)
    }
}
