//! Keyed in-memory working set.
//!
//! Every entity sits behind its own `tokio::sync::Mutex`, so operations on
//! different events or reservations never contend. Handles are cloned out of
//! the maps before locking; no map reference is held across an `.await`.
//!
//! Lock order, whenever more than one is held: reservation, then event, then
//! payment.

use boxoffice_core::error::{EngineError, EngineResult, EntityKind};
use boxoffice_core::event::Event;
use boxoffice_core::payment::{Payment, PaymentTarget};
use boxoffice_core::repository::Snapshot;
use boxoffice_core::reservation::{ConfirmationCode, Reservation, ReservationStatus};
use boxoffice_core::types::{EventId, PaymentId, ReservationId};
use dashmap::{DashMap, DashSet};
use dashmap::mapref::entry::Entry;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle to one entity.
pub type Shared<T> = Arc<Mutex<T>>;

/// Entity maps plus the secondary indexes the engine queries by.
#[derive(Default)]
pub struct Store {
    events: DashMap<EventId, Shared<Event>>,
    reservations: DashMap<ReservationId, Shared<Reservation>>,
    payments: DashMap<PaymentId, Shared<Payment>>,
    reservations_by_event: DashMap<EventId, Vec<ReservationId>>,
    payments_by_target: DashMap<PaymentTarget, Vec<PaymentId>>,
    codes: DashMap<ConfirmationCode, ReservationId>,
    pending: DashMap<ReservationId, EventId>,
    charging: DashSet<PaymentId>,
}

/// Marks a payment as being charged. Dropping it clears the mark.
#[derive(Debug)]
pub struct ChargeClaim<'a> {
    charging: &'a DashSet<PaymentId>,
    payment_id: PaymentId,
}

impl Drop for ChargeClaim<'_> {
    fn drop(&mut self) {
        self.charging.remove(&self.payment_id);
    }
}

fn handle<K: Eq + Hash, V>(map: &DashMap<K, Shared<V>>, id: &K) -> Option<Shared<V>> {
    map.get(id).map(|entry| Arc::clone(entry.value()))
}

fn handles<K: Eq + Hash + Copy, V>(map: &DashMap<K, Shared<V>>) -> Vec<(K, Shared<V>)> {
    map.iter()
        .map(|entry| (*entry.key(), Arc::clone(entry.value())))
        .collect()
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to an event.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] for an unknown id.
    pub fn event(&self, id: EventId) -> EngineResult<Shared<Event>> {
        handle(&self.events, &id).ok_or_else(|| EngineError::not_found(EntityKind::Event, id))
    }

    /// Handle to a reservation.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] for an unknown id.
    pub fn reservation(&self, id: ReservationId) -> EngineResult<Shared<Reservation>> {
        handle(&self.reservations, &id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Reservation, id))
    }

    /// Handle to a payment.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] for an unknown id.
    pub fn payment(&self, id: PaymentId) -> EngineResult<Shared<Payment>> {
        handle(&self.payments, &id).ok_or_else(|| EngineError::not_found(EntityKind::Payment, id))
    }

    /// Every event handle.
    #[must_use]
    pub fn event_handles(&self) -> Vec<(EventId, Shared<Event>)> {
        handles(&self.events)
    }

    /// Every reservation handle.
    #[must_use]
    pub fn reservation_handles(&self) -> Vec<(ReservationId, Shared<Reservation>)> {
        handles(&self.reservations)
    }

    /// Every payment handle.
    #[must_use]
    pub fn payment_handles(&self) -> Vec<(PaymentId, Shared<Payment>)> {
        handles(&self.payments)
    }

    /// Reservations ever created for `event_id`.
    #[must_use]
    pub fn reservations_of(&self, event_id: EventId) -> Vec<ReservationId> {
        self.reservations_by_event
            .get(&event_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Payments ever opened against `target`.
    #[must_use]
    pub fn payments_for(&self, target: PaymentTarget) -> Vec<PaymentId> {
        self.payments_by_target
            .get(&target)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Pending reservations and their events. Terminal reservations are not
    /// listed, so callers scanning holds pay only for live ones.
    #[must_use]
    pub fn pending_holds(&self) -> Vec<(ReservationId, EventId)> {
        self.pending
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// Drops `reservation_id` from the pending index once it leaves Pending.
    pub fn hold_closed(&self, reservation_id: ReservationId) {
        self.pending.remove(&reservation_id);
    }

    /// Claims the right to charge `payment_id`. `None` while another caller
    /// holds the claim.
    #[must_use]
    pub fn claim_charge(&self, payment_id: PaymentId) -> Option<ChargeClaim<'_>> {
        self.charging.insert(payment_id).then_some(ChargeClaim {
            charging: &self.charging,
            payment_id,
        })
    }

    /// Claims `code` for `reservation_id`. Returns `false` if already taken.
    pub fn claim_code(&self, code: &ConfirmationCode, reservation_id: ReservationId) -> bool {
        match self.codes.entry(code.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(reservation_id);
                true
            }
        }
    }

    /// Gives back a claimed code whose reservation was never stored.
    pub fn release_code(&self, code: &ConfirmationCode) {
        self.codes.remove(code);
    }

    /// Reservation id for a confirmation code.
    #[must_use]
    pub fn reservation_by_code(&self, code: &ConfirmationCode) -> Option<ReservationId> {
        self.codes.get(code).map(|id| *id.value())
    }

    /// Stores a new event.
    pub fn insert_event(&self, event: Event) {
        self.events.insert(event.id, Arc::new(Mutex::new(event)));
    }

    /// Stores a new reservation and indexes it by event and code.
    pub fn insert_reservation(&self, reservation: Reservation) {
        let id = reservation.id;
        self.codes.insert(reservation.confirmation_code.clone(), id);
        self.reservations_by_event
            .entry(reservation.event_id)
            .or_default()
            .push(id);
        if reservation.status == ReservationStatus::Pending {
            self.pending.insert(id, reservation.event_id);
        }
        self.reservations.insert(id, Arc::new(Mutex::new(reservation)));
    }

    /// Stores a new payment and indexes it by target.
    pub fn insert_payment(&self, payment: Payment) {
        let id = payment.id;
        self.payments_by_target
            .entry(payment.target)
            .or_default()
            .push(id);
        self.payments.insert(id, Arc::new(Mutex::new(payment)));
    }

    /// Replaces the whole working set with `snapshot`.
    pub fn load(&self, snapshot: Snapshot) {
        self.events.clear();
        self.reservations.clear();
        self.payments.clear();
        self.reservations_by_event.clear();
        self.payments_by_target.clear();
        self.codes.clear();
        self.pending.clear();

        for event in snapshot.events {
            self.insert_event(event);
        }
        let mut reservations = snapshot.reservations;
        reservations.sort_by_key(|r| r.created_at);
        for reservation in reservations {
            self.insert_reservation(reservation);
        }
        let mut payments = snapshot.payments;
        payments.sort_by_key(|p| p.created_at);
        for payment in payments {
            self.insert_payment(payment);
        }
    }

    /// Entity counts: events, reservations, payments.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.events.len(), self.reservations.len(), self.payments.len())
    }
}
