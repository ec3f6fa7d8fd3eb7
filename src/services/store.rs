use crate::models::{Profile, Transition};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when talking to a profile store
///
/// `NotFound`, `AlreadyExists` and `LockTimeout` are expected conditions the
/// coordinator turns into outcomes. Everything else is an infrastructure
/// failure and propagates as-is.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Profile not found: {0}")]
    NotFound(String),

    #[error("Profile already exists: {0}")]
    AlreadyExists(String),

    #[error("Timed out after {timeout_ms}ms waiting for lock on {key}")]
    LockTimeout { key: String, timeout_ms: u64 },

    #[error("SQLx error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    /// Connection-level failures mean the store is unreachable, not that the
    /// statement was wrong
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            err => StoreError::Database(err),
        }
    }
}

impl StoreError {
    /// True for failures of the backing store itself rather than of the request
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            StoreError::Database(_)
                | StoreError::Migrate(_)
                | StoreError::Unavailable(_)
                | StoreError::Corrupt(_)
        )
    }
}

/// Result of a compare-and-transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Applied; carries the new version
    Committed { version: u64 },
    /// The stored version no longer equals the expected one
    VersionConflict { current: u64 },
    /// Another caller holds the exclusive row lock
    Locked,
    NotFound,
}

/// A point-in-time read view
///
/// Reads through a snapshot never observe transitions committed after the
/// snapshot was opened.
#[async_trait]
pub trait ProfileSnapshot: Send {
    async fn read(&mut self, profile_id: &str) -> Result<Option<Profile>, StoreError>;
}

/// An exclusive lock on a single profile row
///
/// Dropping the lock without calling [`ExclusiveLock::commit_match`] rolls
/// back anything staged under it, including a Pending mark, and releases the
/// row for the next waiter.
#[async_trait]
pub trait ExclusiveLock: Send {
    fn profile_id(&self) -> &str;

    /// Current state of the row as seen by the lock holder
    async fn read(&mut self) -> Result<Profile, StoreError>;

    /// Stage the row as Pending; visible only to this holder until commit
    async fn mark_pending(&mut self) -> Result<(), StoreError>;

    /// Commit Matched for `requester_id` and release the lock
    async fn commit_match(self: Box<Self>, requester_id: &str) -> Result<u64, StoreError>;
}

/// Persistence contract consumed by the match coordinator
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;

    /// Insert a new Matchable profile at version 0
    async fn create(&self, profile_id: &str) -> Result<Profile, StoreError>;

    /// Latest committed state of a profile
    async fn read(&self, profile_id: &str) -> Result<Option<Profile>, StoreError>;

    /// Open a snapshot pinned at the current commit point
    async fn snapshot(&self) -> Result<Box<dyn ProfileSnapshot>, StoreError>;

    /// Atomically apply `transition` only if the stored version equals
    /// `expected_version`
    async fn compare_and_transition(
        &self,
        profile_id: &str,
        expected_version: u64,
        transition: Transition,
    ) -> Result<TransitionResult, StoreError>;

    /// Wait up to `timeout` for the exclusive row lock
    async fn acquire_exclusive(
        &self,
        profile_id: &str,
        timeout: Duration,
    ) -> Result<Box<dyn ExclusiveLock>, StoreError>;

    async fn health_check(&self) -> Result<bool, StoreError>;
}

/// Guard for a held advisory lock; released on drop
pub trait AdvisoryGuard: Send {
    fn key(&self) -> &str;
}

/// Application-level named locks, independent of the store's row locks
#[async_trait]
pub trait AdvisoryLockProvider: Send + Sync {
    async fn acquire(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Box<dyn AdvisoryGuard>, StoreError>;
}
