//! Repository wrapper that fails on demand.

use boxoffice_core::repository::{Repository, RepositoryError, Snapshot, WriteBatch};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Delegates to an inner repository, failing the next `n` commits with
/// `RepositoryError::Storage` (or `Serialization`) when told to.
///
/// A failed commit never reaches the inner repository, so the stored state
/// is exactly what a crashed write would leave.
#[derive(Clone)]
pub struct FlakyRepository {
    inner: Arc<dyn Repository>,
    successes_first: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
    fail_loads: Arc<AtomicBool>,
    encoding: Arc<AtomicBool>,
    commits: Arc<AtomicUsize>,
    rejected: Arc<AtomicUsize>,
}

impl FlakyRepository {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Repository>) -> Self {
        Self {
            inner,
            successes_first: Arc::new(AtomicUsize::new(0)),
            failures_left: Arc::new(AtomicUsize::new(0)),
            fail_loads: Arc::new(AtomicBool::new(false)),
            encoding: Arc::new(AtomicBool::new(false)),
            commits: Arc::new(AtomicUsize::new(0)),
            rejected: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails the next `count` commits.
    pub fn fail_next(&self, count: usize) {
        self.fail_after(0, count);
    }

    /// Lets `successes` commits through, then fails the following `count`.
    pub fn fail_after(&self, successes: usize, count: usize) {
        self.encoding.store(false, Ordering::SeqCst);
        self.successes_first.store(successes, Ordering::SeqCst);
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Fails the next `count` commits as records that cannot be encoded.
    pub fn fail_encoding_next(&self, count: usize) {
        self.fail_after(0, count);
        self.encoding.store(true, Ordering::SeqCst);
    }

    /// Makes `load_snapshot` fail until reset.
    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Commits that reached the inner repository.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Commits rejected by injected failures.
    #[must_use]
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        if self
            .successes_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return false;
        }
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl Repository for FlakyRepository {
    fn commit(
        &self,
        batch: WriteBatch,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
        Box::pin(async move {
            if self.take_failure() {
                self.rejected.fetch_add(1, Ordering::SeqCst);
                if self.encoding.load(Ordering::SeqCst) {
                    return Err(RepositoryError::Serialization(
                        "injected encoding failure".to_string(),
                    ));
                }
                return Err(RepositoryError::Storage("injected commit failure".to_string()));
            }
            self.inner.commit(batch).await?;
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn load_snapshot(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Snapshot, RepositoryError>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_loads.load(Ordering::SeqCst) {
                return Err(RepositoryError::Storage("injected load failure".to_string()));
            }
            self.inner.load_snapshot().await
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counting {
        batches: AtomicUsize,
    }

    impl Repository for Counting {
        fn commit(
            &self,
            _batch: WriteBatch,
        ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
            Box::pin(async move {
                self.batches.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }

        fn load_snapshot(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<Snapshot, RepositoryError>> + Send + '_>> {
            Box::pin(async { Ok(Snapshot::default()) })
        }
    }

    #[tokio::test]
    async fn fails_exactly_the_requested_commits() {
        let inner = Arc::new(Counting::default());
        let repo = FlakyRepository::new(inner.clone());
        repo.fail_next(2);

        assert!(repo.commit(WriteBatch::new()).await.is_err());
        assert!(repo.commit(WriteBatch::new()).await.is_err());
        assert!(repo.commit(WriteBatch::new()).await.is_ok());

        assert_eq!(repo.rejected(), 2);
        assert_eq!(repo.commits(), 1);
        assert_eq!(inner.batches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fail_after_lets_the_first_commits_through() {
        let repo = FlakyRepository::new(Arc::new(Counting::default()));
        repo.fail_after(1, 1);

        assert!(repo.commit(WriteBatch::new()).await.is_ok());
        assert!(repo.commit(WriteBatch::new()).await.is_err());
        assert!(repo.commit(WriteBatch::new()).await.is_ok());
    }

    #[tokio::test]
    async fn encoding_failures_are_serialization_errors() {
        let repo = FlakyRepository::new(Arc::new(Counting::default()));
        repo.fail_encoding_next(1);

        let err = repo.commit(WriteBatch::new()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Serialization(_)));
        assert!(repo.commit(WriteBatch::new()).await.is_ok());
    }

    #[tokio::test]
    async fn load_failures_toggle() {
        let repo = FlakyRepository::new(Arc::new(Counting::default()));
        repo.fail_loads(true);
        assert!(repo.load_snapshot().await.is_err());
        repo.fail_loads(false);
        assert_eq!(repo.load_snapshot().await.unwrap(), Snapshot::default());
    }
}
