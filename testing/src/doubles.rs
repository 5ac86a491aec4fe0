//! Gateway, sink and identity doubles.
//!
//! Each double is cheap to clone; clones share the same script and history,
//! so a test keeps one handle and gives another to the engine.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use boxoffice_core::gateway::{GatewayError, GatewayResult, PaymentGateway, SettlementOutcome};
use boxoffice_core::identity::{CallerIdentity, IdentityError, IdentityProvider};
use boxoffice_core::notification::{Notification, NotificationKind, NotificationSink};
use boxoffice_core::payment::PaymentMethod;
use boxoffice_core::types::{Money, PaymentId};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One queued gateway reply.
#[derive(Clone, Debug)]
enum Step {
    Outcome(SettlementOutcome),
    Error(GatewayError),
}

/// Gateway that replays queued outcomes.
///
/// With an empty script every charge succeeds with a generated transaction
/// id. Every charge and refund is recorded.
///
/// # Example
///
/// ```
/// use boxoffice_testing::ScriptedGateway;
///
/// let gateway = ScriptedGateway::new();
/// gateway.push_failure("card declined");
/// assert_eq!(gateway.charge_count(), 0);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ScriptedGateway {
    charges_script: Arc<Mutex<VecDeque<Step>>>,
    refund_errors: Arc<Mutex<VecDeque<GatewayError>>>,
    charges: Arc<Mutex<Vec<(PaymentId, Money)>>>,
    refunds: Arc<Mutex<Vec<(String, Money)>>>,
    sequence: Arc<AtomicUsize>,
    delay: Duration,
}

impl ScriptedGateway {
    /// Creates a gateway with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every reply; longer than the engine's gateway timeout makes
    /// every charge time out.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queues an approval.
    pub fn push_success(&self, transaction_id: impl Into<String>) {
        self.push(Step::Outcome(SettlementOutcome::success(transaction_id)));
    }

    /// Queues a decline.
    pub fn push_failure(&self, reason: impl Into<String>) {
        self.push(Step::Outcome(SettlementOutcome::failure(reason)));
    }

    /// Queues an infrastructure error.
    pub fn push_error(&self, error: GatewayError) {
        self.push(Step::Error(error));
    }

    /// Queues an error for the next refund.
    pub fn push_refund_error(&self, error: GatewayError) {
        self.refund_errors.lock().unwrap().push_back(error);
    }

    /// Charges received, in order.
    #[must_use]
    pub fn charges(&self) -> Vec<(PaymentId, Money)> {
        self.charges.lock().unwrap().clone()
    }

    /// Number of charges received, including ones answered with an error.
    #[must_use]
    pub fn charge_count(&self) -> usize {
        self.charges.lock().unwrap().len()
    }

    /// Refunds issued, as `(transaction_id, amount)`.
    #[must_use]
    pub fn refunds(&self) -> Vec<(String, Money)> {
        self.refunds.lock().unwrap().clone()
    }

    fn push(&self, step: Step) {
        self.charges_script.lock().unwrap().push_back(step);
    }
}

impl PaymentGateway for ScriptedGateway {
    fn charge(
        &self,
        payment_id: PaymentId,
        amount: Money,
        _method: PaymentMethod,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<SettlementOutcome>> + Send>> {
        self.charges.lock().unwrap().push((payment_id, amount));
        let step = self.charges_script.lock().unwrap().pop_front();
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match step {
                Some(Step::Outcome(outcome)) => Ok(outcome),
                Some(Step::Error(error)) => Err(error),
                None => Ok(SettlementOutcome::success(format!("txn_{n}"))),
            }
        })
    }

    fn refund(
        &self,
        transaction_id: &str,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send>> {
        let error = self.refund_errors.lock().unwrap().pop_front();
        if error.is_none() {
            self.refunds
                .lock()
                .unwrap()
                .push((transaction_id.to_string(), amount));
        }
        let refund_id = format!("refund_{transaction_id}");
        Box::pin(async move {
            match error {
                Some(error) => Err(error),
                None => Ok(refund_id),
            }
        })
    }
}

/// Sink that keeps every delivered notification.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    delivered: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }

    /// Kinds delivered so far, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.kind)
            .collect()
    }

    /// Polls until at least `count` notifications arrived or `timeout`
    /// elapsed. Returns whether the count was reached.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.delivered.lock().unwrap().len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl NotificationSink for RecordingSink {
    fn deliver(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> {
        self.delivered.lock().unwrap().push(notification);
        Box::pin(async { Ok(()) })
    }
}

/// Identity provider backed by a fixed token table.
#[derive(Clone, Debug, Default)]
pub struct StaticIdentity {
    tokens: Arc<Mutex<HashMap<String, CallerIdentity>>>,
    unavailable: Arc<Mutex<bool>>,
}

impl StaticIdentity {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `token` to `identity`.
    #[must_use]
    pub fn with(self, token: impl Into<String>, identity: CallerIdentity) -> Self {
        self.tokens.lock().unwrap().insert(token.into(), identity);
        self
    }

    /// Makes every lookup fail as if the provider were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }
}

impl IdentityProvider for StaticIdentity {
    fn caller_identity(
        &self,
        token: &str,
    ) -> Pin<Box<dyn Future<Output = Result<CallerIdentity, IdentityError>> + Send>> {
        let result = if *self.unavailable.lock().unwrap() {
            Err(IdentityError::Unavailable("identity provider down".to_string()))
        } else {
            self.tokens
                .lock()
                .unwrap()
                .get(token)
                .cloned()
                .ok_or(IdentityError::InvalidToken)
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::identity::Role;
    use boxoffice_core::types::UserId;

    fn card() -> PaymentMethod {
        PaymentMethod::CreditCard {
            last_four: "4242".to_string(),
        }
    }

    #[tokio::test]
    async fn gateway_replays_script_then_succeeds() {
        let gateway = ScriptedGateway::new();
        gateway.push_failure("declined");
        gateway.push_error(GatewayError::Unavailable("down".to_string()));

        let first = gateway
            .charge(PaymentId::new(), Money::from_cents(10), card())
            .await;
        assert_eq!(first, Ok(SettlementOutcome::failure("declined")));

        let second = gateway
            .charge(PaymentId::new(), Money::from_cents(10), card())
            .await;
        assert!(second.is_err());

        let third = gateway
            .charge(PaymentId::new(), Money::from_cents(10), card())
            .await
            .unwrap();
        assert!(third.is_success());
        assert_eq!(gateway.charge_count(), 3);
    }

    #[tokio::test]
    async fn refund_errors_are_not_recorded() {
        let gateway = ScriptedGateway::new();
        gateway.push_refund_error(GatewayError::Timeout(10));

        assert!(gateway.refund("txn_1", Money::from_cents(5)).await.is_err());
        assert_eq!(
            gateway.refund("txn_1", Money::from_cents(5)).await,
            Ok("refund_txn_1".to_string())
        );
        assert_eq!(gateway.refunds().len(), 1);
    }

    #[tokio::test]
    async fn static_identity_resolves_known_tokens() {
        let user = CallerIdentity::new(UserId::new(), [Role::Attendee]);
        let identity = StaticIdentity::new().with("token-1", user.clone());

        assert_eq!(identity.caller_identity("token-1").await, Ok(user));
        assert_eq!(
            identity.caller_identity("nope").await,
            Err(IdentityError::InvalidToken)
        );

        identity.set_unavailable(true);
        assert!(matches!(
            identity.caller_identity("token-1").await,
            Err(IdentityError::Unavailable(_))
        ));
    }
}
