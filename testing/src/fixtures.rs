use boxoffice_core::event::EventDraft;
use boxoffice_core::identity::{CallerIdentity, Role};
use boxoffice_core::payment::PaymentMethod;
use boxoffice_core::types::{Money, UserId};
use chrono::{DateTime, Duration, Utc};

/// Ticket price used by [`concert_draft`]: $50.00.
pub const TICKET_PRICE: Money = Money::from_cents(5_000);

/// Publication fee used by [`concert_draft`]: $20.00.
pub const PUBLICATION_FEE: Money = Money::from_cents(2_000);

/// A fresh attendee.
#[must_use]
pub fn attendee() -> CallerIdentity {
    CallerIdentity::new(UserId::new(), [Role::Attendee])
}

/// A fresh organizer.
#[must_use]
pub fn organizer() -> CallerIdentity {
    CallerIdentity::new(UserId::new(), [Role::Organizer])
}

/// A fresh admin.
#[must_use]
pub fn admin() -> CallerIdentity {
    CallerIdentity::new(UserId::new(), [Role::Admin])
}

/// A concert thirty days after `now`.
#[must_use]
pub fn concert_draft(now: DateTime<Utc>, capacity: u32) -> EventDraft {
    EventDraft {
        name: "Spring Concert".to_string(),
        description: "An evening of chamber music".to_string(),
        category: "music".to_string(),
        venue: "Civic Hall".to_string(),
        date: now + Duration::days(30),
        total_capacity: capacity,
        price: TICKET_PRICE,
        publication_fee: PUBLICATION_FEE,
    }
}

/// A card payment method.
#[must_use]
pub fn card() -> PaymentMethod {
    PaymentMethod::CreditCard {
        last_four: "4242".to_string(),
    }
}
