//! Outbound notifications.
//!
//! Delivery is best-effort. Nothing the sink does can roll back engine state.

use crate::types::{EventId, PaymentId, ReservationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Kind of notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    /// A reservation became Confirmed
    ReservationConfirmed,
    /// A payment became Completed
    PaymentCompleted,
    /// A payment became Failed
    PaymentFailed,
    /// An event became Published
    EventPublished,
    /// An event became Cancelled
    EventCancelled,
}

/// Entity a notification is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    /// An event
    Event(EventId),
    /// A reservation
    Reservation(ReservationId),
    /// A payment
    Payment(PaymentId),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(id) => write!(f, "event:{id}"),
            Self::Reservation(id) => write!(f, "reservation:{id}"),
            Self::Payment(id) => write!(f, "payment:{id}"),
        }
    }
}

/// Fire-and-forget message emitted after a committed transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// What happened
    pub kind: NotificationKind,
    /// Entity it happened to
    pub subject: Subject,
    /// Human-readable summary
    pub summary: String,
    /// When it happened
    pub at: DateTime<Utc>,
}

impl Notification {
    /// Builds a notification.
    pub fn new(
        kind: NotificationKind,
        subject: Subject,
        summary: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            subject,
            summary: summary.into(),
            at,
        }
    }
}

/// Notification sink collaborator.
pub trait NotificationSink: Send + Sync {
    /// Delivers one notification.
    ///
    /// # Errors
    ///
    /// Returns a description of the delivery failure; the caller only logs it.
    fn deliver(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
}
