//! Collaborators shared by every component.

use crate::config::Config;
use crate::outbox::Outbox;
use crate::retry::{RetryPolicy, retry};
use crate::store::Store;
use boxoffice_core::environment::Clock;
use boxoffice_core::error::{EngineError, EngineResult};
use boxoffice_core::notification::{Notification, NotificationKind, Subject};
use boxoffice_core::repository::{Repository, RepositoryError, WriteBatch};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Store, repository, clock and outbox, plus the settings that govern them.
pub struct EngineContext {
    /// Working set
    pub store: Store,
    /// Durable storage
    pub repository: Arc<dyn Repository>,
    /// Time source for holds and transitions
    pub clock: Arc<dyn Clock>,
    /// Notification outbox
    pub outbox: Outbox,
    /// Engine settings
    pub config: Config,
    retry_policy: RetryPolicy,
}

impl EngineContext {
    /// Builds a context with an empty store.
    #[must_use]
    pub fn new(
        config: Config,
        repository: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        outbox: Outbox,
    ) -> Self {
        let retry_policy = config.retry_policy();
        Self {
            store: Store::new(),
            repository,
            clock,
            outbox,
            config,
            retry_policy,
        }
    }

    /// Current time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Infrastructure retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Writes `batch` durably, retrying storage failures. Encoding failures
    /// are returned at once.
    ///
    /// # Errors
    ///
    /// [`EngineError::TransientInfrastructureFailure`] once retries run out.
    pub async fn commit(&self, batch: WriteBatch) -> EngineResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let records = batch.len();
        retry(
            &self.retry_policy,
            "repository.commit",
            || self.repository.commit(batch.clone()),
            RepositoryError::is_retryable,
        )
        .await
        .map_err(EngineError::from)?;
        tracing::trace!(records, "Batch committed");
        Ok(())
    }

    /// Emits a notification stamped with the current time.
    pub fn notify(&self, kind: NotificationKind, subject: Subject, summary: String) {
        self.outbox
            .emit(Notification::new(kind, subject, summary, self.now()));
    }
}
