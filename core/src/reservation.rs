//! Reservation entity and its state table.
//!
//! `Pending → {Confirmed, Cancelled, Expired}`; the three right-hand states are
//! terminal.

use crate::error::{EngineError, EngineResult, EntityKind};
use crate::types::{EventId, Money, ReservationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reservation status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Holding capacity, awaiting payment
    Pending,
    /// Paid; the capacity debit is permanent
    Confirmed,
    /// Released by the holder
    Cancelled,
    /// Released by the system
    Expired,
}

impl ReservationStatus {
    /// Whether no transition may leave this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether a reservation in this status still counts against capacity.
    #[must_use]
    pub const fn holds_capacity(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Label used in metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

/// Why the system expired a reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpiryReason {
    /// The hold window elapsed without confirmation
    HoldElapsed,
    /// The event was cancelled while the hold was open
    EventCancelled,
}

impl fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HoldElapsed => write!(f, "hold window elapsed"),
            Self::EventCancelled => write!(f, "event cancelled"),
        }
    }
}

/// Human-facing confirmation code, unique across all reservations.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfirmationCode(String);

impl ConfirmationCode {
    /// Prefix of every code
    pub const PREFIX: &'static str = "RES-";

    /// Wraps an already generated code.
    #[must_use]
    pub const fn new(code: String) -> Self {
        Self(code)
    }

    /// The code as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfirmationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reservation entity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique reservation identifier
    pub id: ReservationId,
    /// Event the capacity belongs to
    pub event_id: EventId,
    /// Holder who owns the reservation
    pub holder_id: UserId,
    /// Units held, always > 0
    pub quantity: u32,
    /// Lifecycle status
    pub status: ReservationStatus,
    /// `quantity × price` at creation
    pub total_amount: Money,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// End of the hold window
    pub expires_at: DateTime<Utc>,
    /// Unique confirmation code
    pub confirmation_code: ConfirmationCode,
    /// Time of the terminal transition, if any
    pub closed_at: Option<DateTime<Utc>>,
    /// Set when the system expired the hold
    pub expiry_reason: Option<ExpiryReason>,
}

impl Reservation {
    /// Builds a Pending reservation.
    #[must_use]
    pub fn pending(
        event_id: EventId,
        holder_id: UserId,
        quantity: u32,
        total_amount: Money,
        confirmation_code: ConfirmationCode,
        now: DateTime<Utc>,
        hold_window: chrono::Duration,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            event_id,
            holder_id,
            quantity,
            status: ReservationStatus::Pending,
            total_amount,
            created_at: now,
            expires_at: now + hold_window,
            confirmation_code,
            closed_at: None,
            expiry_reason: None,
        }
    }

    /// Whether the hold window has strictly elapsed at `now`.
    #[must_use]
    pub fn is_past_hold(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether the sweeper should expire this reservation at `now`.
    #[must_use]
    pub fn is_expirable(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && self.is_past_hold(now)
    }

    /// Pending → Confirmed. Returns `false` when already Confirmed.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidTransition`] from Cancelled or Expired.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> EngineResult<bool> {
        match self.status {
            ReservationStatus::Pending => {
                self.status = ReservationStatus::Confirmed;
                self.closed_at = Some(now);
                Ok(true)
            }
            ReservationStatus::Confirmed => Ok(false),
            status => Err(EngineError::invalid_transition(
                EntityKind::Reservation,
                self.id,
                status,
                ReservationStatus::Confirmed,
            )),
        }
    }

    /// Pending → Cancelled.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidState`] from any terminal status.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        self.release(ReservationStatus::Cancelled, now, "only Pending reservations can be cancelled")
    }

    /// Pending → Expired.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidState`] from any terminal status, or when the hold
    /// window has not elapsed for [`ExpiryReason::HoldElapsed`].
    pub fn expire(&mut self, reason: ExpiryReason, now: DateTime<Utc>) -> EngineResult<()> {
        if reason == ExpiryReason::HoldElapsed
            && self.status == ReservationStatus::Pending
            && !self.is_past_hold(now)
        {
            return Err(EngineError::invalid_state(
                EntityKind::Reservation,
                self.id,
                self.status,
                format!("hold window runs until {}", self.expires_at),
            ));
        }
        self.release(ReservationStatus::Expired, now, "only Pending reservations can expire")?;
        self.expiry_reason = Some(reason);
        Ok(())
    }

    fn release(
        &mut self,
        next: ReservationStatus,
        now: DateTime<Utc>,
        reason: &str,
    ) -> EngineResult<()> {
        if self.status != ReservationStatus::Pending {
            return Err(EngineError::invalid_state(
                EntityKind::Reservation,
                self.id,
                self.status,
                reason,
            ));
        }
        self.status = next;
        self.closed_at = Some(now);
        Ok(())
    }
}
