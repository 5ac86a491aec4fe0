//! Expiration Sweeper.
//!
//! Periodically expires Pending reservations whose hold window has elapsed.
//! Candidates are picked from a snapshot; one that was confirmed or cancelled
//! in the meantime is skipped by the reservation's own state check. Sweep
//! frequency only affects how soon capacity comes back, never correctness.
//!
//! Only live holds are scanned. A hold whose payment completed is not due;
//! reconciliation confirms it, and each tick reconciles before it sweeps.

use crate::context::EngineContext;
use crate::metrics;
use crate::reservations::ReservationMachine;
use crate::settlement::SettlementCoordinator;
use boxoffice_core::event::EventStatus;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Result of one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pending reservations found due
    pub due: usize,
    /// Reservations this pass expired
    pub expired: usize,
    /// Reservations that left Pending before the sweeper reached them
    pub skipped: usize,
    /// Expiries that failed on infrastructure; retried next pass
    pub failed: usize,
}

/// Expiration Sweeper
#[derive(Clone)]
pub struct Sweeper {
    ctx: Arc<EngineContext>,
    reservations: ReservationMachine,
    settlement: SettlementCoordinator,
}

impl Sweeper {
    /// Creates the sweeper.
    #[must_use]
    pub const fn new(
        ctx: Arc<EngineContext>,
        reservations: ReservationMachine,
        settlement: SettlementCoordinator,
    ) -> Self {
        Self {
            ctx,
            reservations,
            settlement,
        }
    }

    /// Runs one pass at the current clock time.
    pub async fn sweep_once(&self) -> SweepReport {
        let started = Instant::now();
        let now = self.ctx.now();

        let events: HashSet<_> = self
            .ctx
            .store
            .pending_holds()
            .into_iter()
            .map(|(_, event_id)| event_id)
            .collect();
        let mut cancelled = HashSet::new();
        for event_id in events {
            let Ok(handle) = self.ctx.store.event(event_id) else {
                continue;
            };
            if handle.lock().await.status == EventStatus::Cancelled {
                cancelled.insert(event_id);
            }
        }

        let due = match self.reservations.expirable(now, &cancelled).await {
            Ok(due) => due,
            Err(err) => {
                tracing::warn!(error = %err, "Could not select expirable holds");
                return SweepReport {
                    failed: 1,
                    ..SweepReport::default()
                };
            }
        };
        let mut report = SweepReport {
            due: due.len(),
            ..SweepReport::default()
        };
        for (reservation_id, reason) in due {
            match self.reservations.expire(reservation_id, reason).await {
                Ok(_) => report.expired += 1,
                Err(err) if err.is_state_conflict() => {
                    report.skipped += 1;
                    tracing::debug!(%reservation_id, error = %err, "Reservation left Pending before expiry");
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(%reservation_id, error = %err, "Expiry failed");
                }
            }
        }

        metrics::record_sweep(started.elapsed().as_secs_f64());
        if report.expired > 0 || report.failed > 0 {
            tracing::info!(?report, "Sweep finished");
        } else {
            tracing::debug!(?report, "Sweep finished");
        }
        report
    }

    /// Sweeps every configured interval until `shutdown` flips to `true`.
    /// Optionally reconciles settlements first on each tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.ctx.config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.ctx.config.holds.sweep_interval_secs,
            reconcile = self.ctx.config.holds.reconcile_on_sweep,
            "Expiration sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.ctx.config.holds.reconcile_on_sweep {
                        self.settlement.reconcile().await;
                    }
                    self.sweep_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Expiration sweeper stopped");
    }
}
