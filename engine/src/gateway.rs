//! Simulated payment gateway for development and demos.
//!
//! Approves a configurable share of charges and declines the rest. Tests
//! inject a scripted gateway instead so outcomes are deterministic.

use boxoffice_core::gateway::{GatewayResult, PaymentGateway, SettlementOutcome};
use boxoffice_core::payment::PaymentMethod;
use boxoffice_core::types::{Money, PaymentId};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Gateway whose outcomes are a weighted coin flip.
#[derive(Clone, Debug)]
pub struct SimulatedGateway {
    success_rate: f64,
    latency: Duration,
}

impl SimulatedGateway {
    /// Creates a gateway approving `success_rate` (0.0 to 1.0) of charges.
    #[must_use]
    pub fn new(success_rate: f64) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
            latency: Duration::from_millis(50),
        }
    }

    /// Sets the simulated network delay.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared(success_rate: f64) -> Arc<dyn PaymentGateway> {
        Arc::new(Self::new(success_rate))
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new(0.9)
    }
}

impl PaymentGateway for SimulatedGateway {
    fn charge(
        &self,
        payment_id: PaymentId,
        amount: Money,
        method: PaymentMethod,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<SettlementOutcome>> + Send>> {
        let approved = rand::thread_rng().gen_bool(self.success_rate);
        let latency = self.latency;
        Box::pin(async move {
            tokio::time::sleep(latency).await;

            if approved {
                let transaction_id = format!("sim_txn_{}", uuid::Uuid::new_v4().simple());
                tracing::debug!(
                    %payment_id,
                    amount = amount.cents(),
                    %method,
                    %transaction_id,
                    "Simulated charge approved"
                );
                Ok(SettlementOutcome::success(transaction_id))
            } else {
                tracing::debug!(%payment_id, amount = amount.cents(), %method, "Simulated charge declined");
                Ok(SettlementOutcome::failure("card declined"))
            }
        })
    }

    fn refund(
        &self,
        transaction_id: &str,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send>> {
        let transaction_id = transaction_id.to_string();
        let latency = self.latency;
        Box::pin(async move {
            tokio::time::sleep(latency).await;
            let refund_id = format!("sim_refund_{}", uuid::Uuid::new_v4().simple());
            tracing::debug!(%transaction_id, amount = amount.cents(), %refund_id, "Simulated refund issued");
            Ok(refund_id)
        })
    }
}
