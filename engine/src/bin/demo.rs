//! Box Office Demo
//!
//! Walks through the reservation-inventory engine end to end:
//! - Organizer creates an event and pays the publication fee
//! - Attendee holds tickets, pays, and gets a confirmation code
//! - A second attendee holds and cancels, returning capacity
//! - The organizer cancels the event; remaining holds expire
//!
//! # Usage
//!
//! ```bash
//! BOXOFFICE_SIMULATED_SUCCESS_RATE=1.0 cargo run --bin boxoffice-demo
//! ```

use anyhow::Context;
use boxoffice_core::event::EventDraft;
use boxoffice_core::gateway::SettlementOutcome;
use boxoffice_core::identity::{CallerIdentity, Role};
use boxoffice_core::payment::{PaymentMethod, PaymentStatus};
use boxoffice_core::types::{Money, UserId};
use boxoffice_engine::metrics::MetricsServer;
use boxoffice_engine::{BoxOffice, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,boxoffice_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let mut metrics = MetricsServer::new(
        config
            .metrics_addr()
            .parse()
            .context("invalid METRICS_HOST/METRICS_PORT")?,
    );
    metrics.start()?;

    println!("\n============================================");
    println!("   Box Office - Live Demo");
    println!("============================================\n");

    let engine = BoxOffice::builder().config(config).build();
    engine.recover().await?;
    let background = engine.start_background();

    let organizer = CallerIdentity::new(UserId::new(), [Role::Organizer]);
    let alice = CallerIdentity::new(UserId::new(), [Role::Attendee]);
    let bob = CallerIdentity::new(UserId::new(), [Role::Attendee]);

    // Step 1: create and publish the event
    println!("1. Creating event...");
    let event = engine
        .create_event(
            &organizer,
            EventDraft {
                name: "Summer Music Festival".to_string(),
                description: "Three stages, one night".to_string(),
                category: "music".to_string(),
                venue: "Riverside Park".to_string(),
                date: chrono::Utc::now() + chrono::Duration::days(60),
                total_capacity: 100,
                price: Money::from_cents(4_500),
                publication_fee: Money::from_cents(2_000),
            },
        )
        .await?;
    println!("   Event {} created ({} seats at {})", event.id, event.total_capacity, event.price);

    let fee = engine
        .open_publication_payment(
            &organizer,
            event.id,
            event.publication_fee,
            PaymentMethod::CreditCard {
                last_four: "4242".to_string(),
            },
        )
        .await?;
    // The fee is settled by an external confirmation in this walkthrough.
    engine
        .settle_payment(fee.id, SettlementOutcome::success("demo_fee_txn"))
        .await?;
    let event = engine.get_event(event.id).await?;
    println!("   Publication fee settled; event is {:?}\n", event.status);

    // Step 2: Alice buys three tickets
    println!("2. Alice holds 3 tickets...");
    let hold = engine.create_reservation(&alice, event.id, 3).await?;
    println!(
        "   Reservation {} ({}), total {}, expires {}",
        hold.id, hold.confirmation_code, hold.total_amount, hold.expires_at
    );

    let payment = engine
        .open_payment(
            &alice,
            hold.id,
            hold.total_amount,
            PaymentMethod::PayPal {
                email: "alice@example.com".to_string(),
            },
        )
        .await?;
    println!("   Payment {} opened: {}", payment.id, payment.concept);

    let payment = engine.process_payment(&alice, payment.id).await?;
    let reservation = engine.get_reservation(&alice, hold.id).await?;
    match payment.status {
        PaymentStatus::Completed => println!(
            "   Charged; reservation is {:?}\n",
            reservation.status
        ),
        _ => println!(
            "   Charge declined ({}); reservation stays {:?} until it expires\n",
            payment.failure_reason.as_deref().unwrap_or("unknown"),
            reservation.status
        ),
    }

    // Step 3: Bob holds and changes his mind
    println!("3. Bob holds 5 tickets, then cancels...");
    let bob_hold = engine.create_reservation(&bob, event.id, 5).await?;
    print_capacity(&engine, event.id).await?;
    engine.cancel_reservation(&bob, bob_hold.id).await?;
    print_capacity(&engine, event.id).await?;
    println!();

    // Step 4: another hold, then the organizer cancels
    println!("4. Bob holds 2 tickets; organizer cancels the event...");
    engine.create_reservation(&bob, event.id, 2).await?;
    let cancellation = engine.cancel_event(&organizer, event.id).await?;
    println!(
        "   Event cancelled; {} pending hold(s) expired",
        cancellation.expired
    );
    print_capacity(&engine, event.id).await?;

    let report = engine.sweep_once().await;
    println!("   Sweep: {report:?}\n");

    if let Some(rendered) = metrics.render() {
        println!("Metrics snapshot:\n{rendered}");
    }

    background.shutdown().await;
    println!("Demo finished.");
    Ok(())
}

async fn print_capacity(
    engine: &BoxOffice,
    event_id: boxoffice_core::types::EventId,
) -> anyhow::Result<()> {
    let snapshot = engine.capacity_snapshot(event_id).await?;
    println!(
        "   Capacity: {} available, {} held, {} sold of {}",
        snapshot.available, snapshot.held, snapshot.sold, snapshot.total
    );
    Ok(())
}
