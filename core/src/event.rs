//! Event entity, its lifecycle table and the capacity arithmetic of the ledger.
//!
//! ```text
//! Draft ──► PendingPayment ──► Published ──► InProgress ──► Finished
//!   │              │               │              │
//!   └──────────────┴───────────────┴──────────────┴──► Cancelled
//! ```

use crate::error::{EngineError, EngineResult, EntityKind};
use crate::types::{EventId, Money, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    /// Being configured by its organizer, not visible to the public
    Draft,
    /// Publication fee payment initiated, awaiting settlement
    PendingPayment,
    /// Visible and open for reservations
    Published,
    /// Taking place
    InProgress,
    /// Over (terminal)
    Finished,
    /// Called off (terminal)
    Cancelled,
}

impl EventStatus {
    /// Whether no transition may leave this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }

    /// The lifecycle table.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::PendingPayment)
                | (Self::PendingPayment, Self::Published)
                | (Self::Published, Self::InProgress)
                | (Self::InProgress, Self::Finished)
                | (
                    Self::Draft | Self::PendingPayment | Self::Published | Self::InProgress,
                    Self::Cancelled
                )
        )
    }

    /// Whether reservations may be created in this status.
    #[must_use]
    pub const fn accepts_reservations(self) -> bool {
        matches!(self, Self::Published)
    }
}

/// Organizer-supplied fields for a new event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Category (music, sports, ...)
    pub category: String,
    /// Venue name
    pub venue: String,
    /// When the event takes place
    pub date: DateTime<Utc>,
    /// Total capacity, immutable once the event leaves Draft
    pub total_capacity: u32,
    /// Price per unit of capacity
    pub price: Money,
    /// Fee charged to publish the event
    pub publication_fee: Money,
}

impl EventDraft {
    /// Checks the organizer input.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for an empty name, zero capacity or
    /// a date that is not in the future.
    pub fn validate(&self, now: DateTime<Utc>) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation("event name is required".to_string()));
        }
        if self.total_capacity == 0 {
            return Err(EngineError::Validation(
                "total capacity must be greater than zero".to_string(),
            ));
        }
        if self.date <= now {
            return Err(EngineError::Validation(
                "event date must be in the future".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial update of a Draft event. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPatch {
    /// New name
    pub name: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New category
    pub category: Option<String>,
    /// New venue
    pub venue: Option<String>,
    /// New date
    pub date: Option<DateTime<Utc>>,
    /// New total capacity
    pub total_capacity: Option<u32>,
    /// New price
    pub price: Option<Money>,
    /// New publication fee
    pub publication_fee: Option<Money>,
}

/// Result of a capacity credit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Credit {
    /// Units actually added back
    pub applied: u32,
    /// Whether the credit hit the total-capacity ceiling
    pub capped: bool,
}

/// Event entity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier
    pub id: EventId,
    /// Organizer who owns the event
    pub organizer_id: UserId,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Category
    pub category: String,
    /// Venue name
    pub venue: String,
    /// When the event takes place
    pub date: DateTime<Utc>,
    /// Total capacity
    pub total_capacity: u32,
    /// Capacity not held or sold; only the ledger changes it
    pub available_capacity: u32,
    /// Price per unit
    pub price: Money,
    /// Publication fee
    pub publication_fee: Money,
    /// Lifecycle status
    pub status: EventStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Creates a Draft event with full availability.
    #[must_use]
    pub fn draft(draft: EventDraft, organizer_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new(),
            organizer_id,
            name: draft.name,
            description: draft.description,
            category: draft.category,
            venue: draft.venue,
            date: draft.date,
            total_capacity: draft.total_capacity,
            available_capacity: draft.total_capacity,
            price: draft.price,
            publication_fee: draft.publication_fee,
            status: EventStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a patch. Only legal while Draft.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidState`] outside Draft, [`EngineError::Validation`]
    /// for an empty name or zero capacity.
    pub fn apply_patch(&mut self, patch: EventPatch, now: DateTime<Utc>) -> EngineResult<()> {
        if self.status != EventStatus::Draft {
            return Err(EngineError::invalid_state(
                EntityKind::Event,
                self.id,
                self.status,
                "only Draft events can be edited",
            ));
        }
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(EngineError::Validation("event name cannot be empty".to_string()));
            }
        }
        if patch.total_capacity == Some(0) {
            return Err(EngineError::Validation(
                "total capacity must be greater than zero".to_string(),
            ));
        }

        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(venue) = patch.venue {
            self.venue = venue;
        }
        if let Some(date) = patch.date {
            self.date = date;
        }
        if let Some(total) = patch.total_capacity {
            // No reservation can exist on a Draft event.
            self.total_capacity = total;
            self.available_capacity = total;
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(fee) = patch.publication_fee {
            self.publication_fee = fee;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Moves the event to `next` if the lifecycle table allows it.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidTransition`] when the table forbids the move.
    pub fn transition(&mut self, next: EventStatus, now: DateTime<Utc>) -> EngineResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::invalid_transition(
                EntityKind::Event,
                self.id,
                self.status,
                next,
            ));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Checks `available >= quantity` and subtracts. Leaves the event untouched
    /// on failure.
    ///
    /// # Errors
    ///
    /// [`EngineError::InsufficientCapacity`] when the quantity does not fit.
    pub fn try_debit(&mut self, quantity: u32) -> EngineResult<()> {
        if quantity > self.available_capacity {
            return Err(EngineError::InsufficientCapacity {
                event_id: self.id,
                requested: quantity,
                available: self.available_capacity,
            });
        }
        self.available_capacity -= quantity;
        Ok(())
    }

    /// Adds capacity back, never beyond the total.
    pub fn credit(&mut self, quantity: u32) -> Credit {
        let room = self.total_capacity - self.available_capacity;
        let applied = quantity.min(room);
        self.available_capacity += applied;
        Credit {
            applied,
            capped: applied < quantity,
        }
    }

    /// Units currently held or sold.
    #[must_use]
    pub const fn committed_capacity(&self) -> u32 {
        self.total_capacity - self.available_capacity
    }

    /// Percentage of capacity held or sold.
    #[must_use]
    pub fn occupancy_percent(&self) -> f64 {
        if self.total_capacity == 0 {
            return 0.0;
        }
        f64::from(self.committed_capacity()) * 100.0 / f64::from(self.total_capacity)
    }

    /// Charge for `quantity` units.
    ///
    /// # Errors
    ///
    /// [`EngineError::Validation`] if the amount overflows.
    pub fn charge_for(&self, quantity: u32) -> EngineResult<Money> {
        self.price
            .checked_multiply(quantity)
            .ok_or_else(|| EngineError::Validation(format!("amount for {quantity} units overflows")))
    }
}
