use crate::core::backoff::Backoff;
use crate::core::policy::{advisory_lock_key, IsolationPolicy, ReadMode};
use crate::models::{MatchAttempt, MatchOutcome, Transition};
use crate::services::memory::LocalAdvisoryLocks;
use crate::services::store::{AdvisoryLockProvider, ProfileStore, StoreError, TransitionResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Infrastructure failure during a match attempt
///
/// Expected results (taken, conflict, timeout, missing profile) are never
/// errors; they come back as a [`MatchOutcome`].
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Profile store failure: {0}")]
    Store(#[from] StoreError),
}

/// Tunables for a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOptions {
    /// Retries after the first optimistic try; 0 disables retrying
    pub retry_limit: u32,
    /// Upper bound on any single lock wait
    pub lock_timeout: Duration,
    pub backoff: Backoff,
}

impl Default for AttemptOptions {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            lock_timeout: Duration::from_millis(5000),
            backoff: Backoff::default(),
        }
    }
}

/// Caller-side cancellation of an attempt
///
/// Only observed while waiting for a lock or sleeping between retries. Once
/// a lock is held the read and transition run to completion, so a cancelled
/// attempt never leaves a half-applied transition behind.
pub struct Cancellation {
    signal: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

impl Cancellation {
    pub fn never() -> Self {
        Self { signal: None }
    }

    /// Cancel once `signal` resolves
    pub fn on<F>(signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            signal: Some(Box::pin(signal)),
        }
    }

    async fn fired(&mut self) {
        match self.signal.as_mut() {
            Some(signal) => signal.await,
            None => std::future::pending().await,
        }
    }
}

enum Step {
    Done(MatchOutcome),
    /// Lost a race on the version or the row lock
    Contended,
}

/// Arbitrates concurrent match attempts on shared profiles
///
/// Stateless between calls; clones share the same store and lock provider.
#[derive(Clone)]
pub struct MatchCoordinator {
    store: Arc<dyn ProfileStore>,
    advisory_locks: Arc<dyn AdvisoryLockProvider>,
    options: AttemptOptions,
}

impl MatchCoordinator {
    /// Coordinator with in-process advisory locks and default options
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self {
            store,
            advisory_locks: Arc::new(LocalAdvisoryLocks::new()),
            options: AttemptOptions::default(),
        }
    }

    pub fn with_advisory_locks(mut self, provider: Arc<dyn AdvisoryLockProvider>) -> Self {
        self.advisory_locks = provider;
        self
    }

    pub fn with_options(mut self, options: AttemptOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &AttemptOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    /// Try to match `requester_id` with `profile_id` under `policy`
    pub async fn attempt_match(
        &self,
        requester_id: &str,
        profile_id: &str,
        policy: &IsolationPolicy,
    ) -> Result<MatchOutcome, CoordinatorError> {
        self.run(requester_id, profile_id, policy, &self.options, Cancellation::never())
            .await
    }

    /// Same as [`attempt_match`](Self::attempt_match) with per-call options
    pub async fn attempt_match_with(
        &self,
        requester_id: &str,
        profile_id: &str,
        policy: &IsolationPolicy,
        options: &AttemptOptions,
    ) -> Result<MatchOutcome, CoordinatorError> {
        self.run(requester_id, profile_id, policy, options, Cancellation::never())
            .await
    }

    /// Attempt a match that gives up with [`MatchOutcome::Cancelled`] if
    /// `cancel` fires while waiting on a lock or between retries
    pub async fn attempt_match_until(
        &self,
        requester_id: &str,
        profile_id: &str,
        policy: &IsolationPolicy,
        options: &AttemptOptions,
        cancel: Cancellation,
    ) -> Result<MatchOutcome, CoordinatorError> {
        self.run(requester_id, profile_id, policy, options, cancel).await
    }

    async fn run(
        &self,
        requester_id: &str,
        profile_id: &str,
        policy: &IsolationPolicy,
        options: &AttemptOptions,
        mut cancel: Cancellation,
    ) -> Result<MatchOutcome, CoordinatorError> {
        let mut attempt = MatchAttempt::new(requester_id, profile_id);

        tracing::debug!(
            "Match attempt: {} -> {} under {}",
            requester_id,
            profile_id,
            policy
        );

        let resolved = match policy {
            IsolationPolicy::ReadCommitted | IsolationPolicy::RepeatableRead => {
                self.optimistic(&mut attempt, policy, options, &mut cancel)
                    .await
            }
            IsolationPolicy::RowLock => self.row_locked(&mut attempt, options, &mut cancel).await,
            IsolationPolicy::AdvisoryLock { key } => {
                let key = advisory_lock_key(key.as_deref(), profile_id);
                self.advisory_locked(&mut attempt, &key, options, &mut cancel)
                    .await
            }
        };

        let outcome = match resolved {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_infrastructure() {
                    tracing::error!(
                        "Match attempt {} -> {} aborted by store failure: {}",
                        requester_id,
                        profile_id,
                        e
                    );
                } else {
                    tracing::warn!("Match attempt {} -> {} failed: {}", requester_id, profile_id, e);
                }
                return Err(e.into());
            }
        };

        tracing::info!(
            requester = %attempt.requester_id,
            profile = %attempt.target_profile_id,
            policy = policy.name(),
            tries = attempt.attempt_no,
            observed_version = ?attempt.observed_version,
            elapsed_ms = attempt.elapsed_ms(),
            "Match attempt resolved: {}",
            outcome.label()
        );

        Ok(outcome)
    }

    /// Steps 1-3 without any lock: read, check Matchable, compare-and-transition
    async fn read_and_transition(
        &self,
        attempt: &mut MatchAttempt,
        read_mode: ReadMode,
    ) -> Result<Step, StoreError> {
        attempt.attempt_no += 1;
        let target = attempt.target_profile_id.clone();
        let profile_id = target.as_str();

        let mut snapshot = match read_mode {
            ReadMode::Snapshot => Some(self.store.snapshot().await?),
            ReadMode::Latest | ReadMode::Locked => None,
        };
        let observed = match snapshot.as_mut() {
            Some(snapshot) => snapshot.read(profile_id).await?,
            None => self.store.read(profile_id).await?,
        };

        // The transition compares against the current version, so the
        // snapshot is released before it and never pins a second connection
        drop(snapshot);

        let profile = match observed {
            Some(profile) => profile,
            None => return Ok(Step::Done(MatchOutcome::NotFound)),
        };
        attempt.observe(&profile);

        if !profile.is_matchable() {
            return Ok(Step::Done(MatchOutcome::AlreadyTaken));
        }

        let result = self
            .store
            .compare_and_transition(
                profile_id,
                profile.version,
                Transition::matched_by(attempt.requester_id.as_str()),
            )
            .await?;

        Ok(match result {
            TransitionResult::Committed { version } => Step::Done(MatchOutcome::Matched {
                requester_id: attempt.requester_id.clone(),
                version,
            }),
            TransitionResult::NotFound => Step::Done(MatchOutcome::NotFound),
            TransitionResult::VersionConflict { current } => {
                tracing::debug!(
                    "Version conflict on {}: read {} but store is at {}",
                    profile_id,
                    profile.version,
                    current
                );
                Step::Contended
            }
            TransitionResult::Locked => {
                tracing::debug!("{} is row-locked by another attempt", profile_id);
                Step::Contended
            }
        })
    }

    async fn optimistic(
        &self,
        attempt: &mut MatchAttempt,
        policy: &IsolationPolicy,
        options: &AttemptOptions,
        cancel: &mut Cancellation,
    ) -> Result<MatchOutcome, StoreError> {
        let mut retries = 0;
        loop {
            match self.read_and_transition(attempt, policy.read_mode()).await? {
                Step::Done(outcome) => return Ok(outcome),
                Step::Contended => {
                    if !policy.retries_on_conflict() || retries >= options.retry_limit {
                        return Ok(MatchOutcome::Conflict);
                    }
                    retries += 1;

                    let delay = options.backoff.delay(retries);
                    tracing::debug!(
                        "Retrying {} for {} in {:?} ({}/{})",
                        attempt.target_profile_id,
                        attempt.requester_id,
                        delay,
                        retries,
                        options.retry_limit
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.fired() => return Ok(MatchOutcome::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn row_locked(
        &self,
        attempt: &mut MatchAttempt,
        options: &AttemptOptions,
        cancel: &mut Cancellation,
    ) -> Result<MatchOutcome, StoreError> {
        attempt.attempt_no += 1;
        let profile_id = attempt.target_profile_id.clone();

        let acquired = tokio::select! {
            biased;
            _ = cancel.fired() => return Ok(MatchOutcome::Cancelled),
            acquired = self.store.acquire_exclusive(&profile_id, options.lock_timeout) => acquired,
        };
        let mut lock = match acquired {
            Ok(lock) => lock,
            Err(StoreError::LockTimeout { .. }) => return Ok(MatchOutcome::LockTimeout),
            Err(StoreError::NotFound(_)) => return Ok(MatchOutcome::NotFound),
            Err(e) => return Err(e),
        };

        let profile = lock.read().await?;
        attempt.observe(&profile);
        if !profile.is_matchable() {
            return Ok(MatchOutcome::AlreadyTaken);
        }

        lock.mark_pending().await?;
        let version = lock.commit_match(&attempt.requester_id).await?;

        Ok(MatchOutcome::Matched {
            requester_id: attempt.requester_id.clone(),
            version,
        })
    }

    async fn advisory_locked(
        &self,
        attempt: &mut MatchAttempt,
        key: &str,
        options: &AttemptOptions,
        cancel: &mut Cancellation,
    ) -> Result<MatchOutcome, StoreError> {
        let acquired = tokio::select! {
            biased;
            _ = cancel.fired() => return Ok(MatchOutcome::Cancelled),
            acquired = self.advisory_locks.acquire(key, options.lock_timeout) => acquired,
        };
        let _guard = match acquired {
            Ok(guard) => guard,
            Err(StoreError::LockTimeout { .. }) => return Ok(MatchOutcome::LockTimeout),
            Err(e) => return Err(e),
        };

        match self.read_and_transition(attempt, ReadMode::Latest).await? {
            Step::Done(outcome) => Ok(outcome),
            Step::Contended => {
                tracing::warn!(
                    "{} changed under advisory lock {}; a writer is bypassing it",
                    attempt.target_profile_id,
                    key
                );
                Ok(MatchOutcome::Conflict)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Profile, ProfileStatus};
    use crate::services::memory::MemoryProfileStore;
    use crate::services::store::{ExclusiveLock, ProfileSnapshot};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Memory store whose compare-and-transition always fails as unreachable
    struct UnreachableWrites {
        inner: MemoryProfileStore,
        writes: AtomicU32,
    }

    #[async_trait]
    impl ProfileStore for UnreachableWrites {
        fn backend(&self) -> &'static str {
            "unreachable"
        }

        async fn create(&self, profile_id: &str) -> Result<Profile, StoreError> {
            self.inner.create(profile_id).await
        }

        async fn read(&self, profile_id: &str) -> Result<Option<Profile>, StoreError> {
            self.inner.read(profile_id).await
        }

        async fn snapshot(&self) -> Result<Box<dyn ProfileSnapshot>, StoreError> {
            self.inner.snapshot().await
        }

        async fn compare_and_transition(
            &self,
            _profile_id: &str,
            _expected_version: u64,
            _transition: Transition,
        ) -> Result<TransitionResult, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection reset".to_string()))
        }

        async fn acquire_exclusive(
            &self,
            profile_id: &str,
            timeout: Duration,
        ) -> Result<Box<dyn ExclusiveLock>, StoreError> {
            self.inner.acquire_exclusive(profile_id, timeout).await
        }

        async fn health_check(&self) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    async fn coordinator_with(ids: &[&str]) -> (MatchCoordinator, MemoryProfileStore) {
        let store = MemoryProfileStore::with_profiles(ids.iter().copied())
            .await
            .unwrap();
        (MatchCoordinator::new(Arc::new(store.clone())), store)
    }

    fn all_policies() -> Vec<IsolationPolicy> {
        vec![
            IsolationPolicy::ReadCommitted,
            IsolationPolicy::RepeatableRead,
            IsolationPolicy::RowLock,
            IsolationPolicy::advisory(),
        ]
    }

    #[tokio::test]
    async fn test_first_attempt_matches_under_every_policy() {
        for policy in all_policies() {
            let (coordinator, store) = coordinator_with(&["chris"]).await;
            let outcome = coordinator
                .attempt_match("alice", "chris", &policy)
                .await
                .unwrap();

            assert_eq!(
                outcome,
                MatchOutcome::Matched {
                    requester_id: "alice".to_string(),
                    version: 1
                },
                "policy {}",
                policy
            );
            let profile = store.read("chris").await.unwrap().unwrap();
            assert_eq!(profile.status, ProfileStatus::Matched);
            assert_eq!(profile.version, 1);
        }
    }

    #[tokio::test]
    async fn test_missing_profile_is_not_found() {
        for policy in all_policies() {
            let (coordinator, _) = coordinator_with(&[]).await;
            let outcome = coordinator
                .attempt_match("alice", "ghost", &policy)
                .await
                .unwrap();
            assert_eq!(outcome, MatchOutcome::NotFound, "policy {}", policy);
        }
    }

    #[tokio::test]
    async fn test_matched_profile_is_already_taken_without_mutation() {
        for policy in all_policies() {
            let (coordinator, store) = coordinator_with(&["chris"]).await;
            coordinator
                .attempt_match("alice", "chris", &policy)
                .await
                .unwrap();

            for requester in ["emma", "emma", "zoe"] {
                let outcome = coordinator
                    .attempt_match(requester, "chris", &policy)
                    .await
                    .unwrap();
                assert_eq!(outcome, MatchOutcome::AlreadyTaken);
            }
            assert_eq!(store.history("chris").await.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_row_lock_holder_forces_timeout() {
        let (coordinator, store) = coordinator_with(&["chris"]).await;
        let _held = store
            .acquire_exclusive("chris", Duration::from_millis(100))
            .await
            .unwrap();

        let options = AttemptOptions {
            lock_timeout: Duration::from_millis(30),
            ..AttemptOptions::default()
        };
        let outcome = coordinator
            .attempt_match_with("alice", "chris", &IsolationPolicy::RowLock, &options)
            .await
            .unwrap();
        assert_eq!(outcome, MatchOutcome::LockTimeout);
    }

    #[tokio::test]
    async fn test_read_committed_gives_up_after_retry_limit() {
        let (coordinator, store) = coordinator_with(&["chris"]).await;
        // A held row lock makes every compare-and-transition report Locked
        let _held = store
            .acquire_exclusive("chris", Duration::from_millis(100))
            .await
            .unwrap();

        let options = AttemptOptions {
            retry_limit: 2,
            backoff: Backoff::new(Duration::from_millis(1), Duration::from_millis(2)),
            ..AttemptOptions::default()
        };
        let outcome = coordinator
            .attempt_match_with("alice", "chris", &IsolationPolicy::ReadCommitted, &options)
            .await
            .unwrap();
        assert_eq!(outcome, MatchOutcome::Conflict);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_row_lock() {
        let (coordinator, store) = coordinator_with(&["chris"]).await;
        let held = store
            .acquire_exclusive("chris", Duration::from_millis(100))
            .await
            .unwrap();

        let cancel = Cancellation::on(tokio::time::sleep(Duration::from_millis(20)));
        let outcome = coordinator
            .attempt_match_until(
                "alice",
                "chris",
                &IsolationPolicy::RowLock,
                &AttemptOptions::default(),
                cancel,
            )
            .await
            .unwrap();
        assert_eq!(outcome, MatchOutcome::Cancelled);

        drop(held);
        let profile = store.read("chris").await.unwrap().unwrap();
        assert_eq!(profile.status, ProfileStatus::Matchable);
        assert_eq!(profile.version, 0);
    }

    #[tokio::test]
    async fn test_store_failure_propagates_without_retry() {
        for policy in [
            IsolationPolicy::ReadCommitted,
            IsolationPolicy::RepeatableRead,
            IsolationPolicy::advisory(),
        ] {
            let inner = MemoryProfileStore::with_profiles(["chris"]).await.unwrap();
            let store = Arc::new(UnreachableWrites {
                inner: inner.clone(),
                writes: AtomicU32::new(0),
            });
            let coordinator = MatchCoordinator::new(store.clone());

            let result = coordinator.attempt_match("alice", "chris", &policy).await;
            assert!(
                matches!(
                    result,
                    Err(CoordinatorError::Store(StoreError::Unavailable(_)))
                ),
                "policy {} returned {:?}",
                policy,
                result
            );
            assert_eq!(store.writes.load(Ordering::SeqCst), 1, "policy {}", policy);
            assert_eq!(inner.read("chris").await.unwrap().unwrap().version, 0);
        }
    }

    #[tokio::test]
    async fn test_cancel_between_optimistic_retries() {
        let (coordinator, store) = coordinator_with(&["chris"]).await;
        // A held row lock makes every compare-and-transition report Locked
        let held = store
            .acquire_exclusive("chris", Duration::from_millis(100))
            .await
            .unwrap();

        let options = AttemptOptions {
            retry_limit: 10,
            backoff: Backoff::new(Duration::from_millis(200), Duration::from_millis(200)),
            ..AttemptOptions::default()
        };
        let started = std::time::Instant::now();
        let outcome = coordinator
            .attempt_match_until(
                "alice",
                "chris",
                &IsolationPolicy::ReadCommitted,
                &options,
                Cancellation::on(tokio::time::sleep(Duration::from_millis(20))),
            )
            .await
            .unwrap();

        assert_eq!(outcome, MatchOutcome::Cancelled);
        // The first backoff alone is at least 100ms
        assert!(started.elapsed() < Duration::from_millis(100));

        drop(held);
        let profile = store.read("chris").await.unwrap().unwrap();
        assert_eq!(profile.status, ProfileStatus::Matchable);
        assert_eq!(profile.version, 0);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_advisory_lock() {
        let (coordinator, store) = coordinator_with(&["chris"]).await;
        let locks = LocalAdvisoryLocks::new();
        let coordinator = coordinator.with_advisory_locks(Arc::new(locks.clone()));

        let held = locks
            .acquire("profile:chris", Duration::from_millis(100))
            .await
            .unwrap();

        let outcome = coordinator
            .attempt_match_until(
                "alice",
                "chris",
                &IsolationPolicy::advisory(),
                &AttemptOptions::default(),
                Cancellation::on(tokio::time::sleep(Duration::from_millis(20))),
            )
            .await
            .unwrap();
        assert_eq!(outcome, MatchOutcome::Cancelled);
        assert_eq!(locks.tracked_keys(), 1);

        drop(held);
        assert_eq!(locks.tracked_keys(), 0);
        assert_eq!(store.history("chris").await.len(), 1);

        let outcome = coordinator
            .attempt_match("alice", "chris", &IsolationPolicy::advisory())
            .await
            .unwrap();
        assert!(outcome.is_matched());
    }
}
