use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How an attempt reads the target profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Latest committed state at call time
    Latest,
    /// Pinned to a snapshot opened when the attempt starts
    Snapshot,
    /// Read while holding a lock that excludes other writers
    Locked,
}

/// How an attempt applies the Matchable -> Matched transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Compare-and-transition against the current version
    CompareAndTransition,
    /// Pending then Matched inside the store's exclusive row lock
    RowLock,
    /// Compare-and-transition while holding an application advisory lock
    AdvisoryLock,
}

/// Concurrency discipline for a match attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IsolationPolicy {
    #[default]
    ReadCommitted,
    RepeatableRead,
    RowLock,
    AdvisoryLock {
        /// Lock name; defaults to `profile:<id>` for the target profile
        #[serde(default)]
        key: Option<String>,
    },
}

impl IsolationPolicy {
    pub fn advisory() -> Self {
        IsolationPolicy::AdvisoryLock { key: None }
    }

    pub fn advisory_keyed(key: impl Into<String>) -> Self {
        IsolationPolicy::AdvisoryLock {
            key: Some(key.into()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IsolationPolicy::ReadCommitted => "read_committed",
            IsolationPolicy::RepeatableRead => "repeatable_read",
            IsolationPolicy::RowLock => "row_lock",
            IsolationPolicy::AdvisoryLock { .. } => "advisory_lock",
        }
    }

    pub fn read_mode(&self) -> ReadMode {
        match self {
            IsolationPolicy::ReadCommitted => ReadMode::Latest,
            IsolationPolicy::RepeatableRead => ReadMode::Snapshot,
            IsolationPolicy::RowLock | IsolationPolicy::AdvisoryLock { .. } => ReadMode::Locked,
        }
    }

    pub fn write_mode(&self) -> WriteMode {
        match self {
            IsolationPolicy::ReadCommitted | IsolationPolicy::RepeatableRead => {
                WriteMode::CompareAndTransition
            }
            IsolationPolicy::RowLock => WriteMode::RowLock,
            IsolationPolicy::AdvisoryLock { .. } => WriteMode::AdvisoryLock,
        }
    }

    /// Whether a version conflict is retried with a fresh read.
    ///
    /// Only ReadCommitted retries. A RepeatableRead conflict means the
    /// snapshot is stale and is reported to the caller; the lock-based
    /// policies never race another locker in the first place.
    pub fn retries_on_conflict(&self) -> bool {
        matches!(self, IsolationPolicy::ReadCommitted)
    }

    /// Whether the attempt can block waiting on a lock
    pub fn is_pessimistic(&self) -> bool {
        matches!(
            self,
            IsolationPolicy::RowLock | IsolationPolicy::AdvisoryLock { .. }
        )
    }

    /// Advisory lock name guarding `profile_id`, if this policy uses one
    pub fn advisory_key(&self, profile_id: &str) -> Option<String> {
        match self {
            IsolationPolicy::AdvisoryLock { key } => Some(advisory_lock_key(key.as_deref(), profile_id)),
            _ => None,
        }
    }
}

/// Lock name for an advisory-locked attempt: the caller's key, or one per profile
pub fn advisory_lock_key(key: Option<&str>, profile_id: &str) -> String {
    match key {
        Some(key) => key.to_string(),
        None => format!("profile:{}", profile_id),
    }
}

impl fmt::Display for IsolationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown isolation policy: {0}")]
pub struct UnknownPolicy(pub String);

impl FromStr for IsolationPolicy {
    type Err = UnknownPolicy;

    /// Parse a policy name; advisory locks parsed this way use the default key
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "read_committed" => Ok(IsolationPolicy::ReadCommitted),
            "repeatable_read" => Ok(IsolationPolicy::RepeatableRead),
            "row_lock" => Ok(IsolationPolicy::RowLock),
            "advisory_lock" => Ok(IsolationPolicy::advisory()),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}
