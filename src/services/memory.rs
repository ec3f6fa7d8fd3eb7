use crate::models::{Profile, ProfileStatus, Transition};
use crate::services::store::{
    AdvisoryGuard, AdvisoryLockProvider, ExclusiveLock, ProfileSnapshot, ProfileStore, StoreError,
    TransitionResult,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One committed row version, stamped with the global commit sequence
#[derive(Debug, Clone)]
struct CommittedVersion {
    seq: u64,
    profile: Profile,
}

struct Row {
    history: Vec<CommittedVersion>,
    // tokio's mutex queues waiters in FIFO order
    lock: Arc<Mutex<()>>,
}

impl Row {
    fn latest(&self) -> &Profile {
        // history is never empty: a row is created with its first version
        &self.history[self.history.len() - 1].profile
    }

    fn visible_at(&self, seq: u64) -> Option<&Profile> {
        self.history
            .iter()
            .rev()
            .find(|v| v.seq <= seq)
            .map(|v| &v.profile)
    }

    fn is_locked(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

#[derive(Default)]
struct Inner {
    rows: HashMap<String, Row>,
    commit_seq: u64,
}

impl Inner {
    fn commit(&mut self, profile_id: &str, next: Profile) -> Result<u64, StoreError> {
        self.commit_seq += 1;
        let seq = self.commit_seq;
        let row = self
            .rows
            .get_mut(profile_id)
            .ok_or_else(|| StoreError::NotFound(profile_id.to_string()))?;
        let version = next.version;
        row.history.push(CommittedVersion { seq, profile: next });
        Ok(version)
    }
}

/// In-process profile store
///
/// Keeps every committed version of each profile tagged with a global commit
/// sequence number, so snapshots are just a sequence number to read at.
/// Row locks are per-profile FIFO mutexes held by [`MemoryExclusiveLock`].
#[derive(Clone, Default)]
pub struct MemoryProfileStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-seeded with Matchable profiles
    pub async fn with_profiles<I, S>(ids: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let store = Self::new();
        for id in ids {
            store.create(id.as_ref()).await?;
        }
        Ok(store)
    }

    /// Every committed version of a profile, oldest first
    pub async fn history(&self, profile_id: &str) -> Vec<Profile> {
        let inner = self.inner.lock().await;
        inner
            .rows
            .get(profile_id)
            .map(|row| row.history.iter().map(|v| v.profile.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, profile_id: &str) -> Result<Profile, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.rows.contains_key(profile_id) {
            return Err(StoreError::AlreadyExists(profile_id.to_string()));
        }

        inner.commit_seq += 1;
        let profile = Profile::new(profile_id);
        let row = Row {
            history: vec![CommittedVersion {
                seq: inner.commit_seq,
                profile: profile.clone(),
            }],
            lock: Arc::new(Mutex::new(())),
        };
        inner.rows.insert(profile_id.to_string(), row);

        tracing::debug!("Created profile {}", profile_id);
        Ok(profile)
    }

    async fn read(&self, profile_id: &str) -> Result<Option<Profile>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.rows.get(profile_id).map(|row| row.latest().clone()))
    }

    async fn snapshot(&self) -> Result<Box<dyn ProfileSnapshot>, StoreError> {
        let seq = self.inner.lock().await.commit_seq;
        Ok(Box::new(MemorySnapshot {
            inner: Arc::clone(&self.inner),
            seq,
        }))
    }

    async fn compare_and_transition(
        &self,
        profile_id: &str,
        expected_version: u64,
        transition: Transition,
    ) -> Result<TransitionResult, StoreError> {
        let mut inner = self.inner.lock().await;

        let next = match inner.rows.get(profile_id) {
            None => return Ok(TransitionResult::NotFound),
            Some(row) if row.is_locked() => return Ok(TransitionResult::Locked),
            Some(row) => {
                let current = row.latest();
                if current.version != expected_version {
                    return Ok(TransitionResult::VersionConflict {
                        current: current.version,
                    });
                }
                current.apply(&transition)
            }
        };

        let version = inner.commit(profile_id, next)?;
        tracing::debug!("Committed {} at version {}", profile_id, version);
        Ok(TransitionResult::Committed { version })
    }

    async fn acquire_exclusive(
        &self,
        profile_id: &str,
        timeout: Duration,
    ) -> Result<Box<dyn ExclusiveLock>, StoreError> {
        let lock = {
            let inner = self.inner.lock().await;
            let row = inner
                .rows
                .get(profile_id)
                .ok_or_else(|| StoreError::NotFound(profile_id.to_string()))?;
            Arc::clone(&row.lock)
        };

        let guard = tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout {
                key: profile_id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?;

        Ok(Box::new(MemoryExclusiveLock {
            inner: Arc::clone(&self.inner),
            profile_id: profile_id.to_string(),
            staged: None,
            _row: guard,
        }))
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        Ok(true)
    }
}

struct MemorySnapshot {
    inner: Arc<Mutex<Inner>>,
    seq: u64,
}

#[async_trait]
impl ProfileSnapshot for MemorySnapshot {
    async fn read(&mut self, profile_id: &str) -> Result<Option<Profile>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .get(profile_id)
            .and_then(|row| row.visible_at(self.seq))
            .cloned())
    }
}

/// Holder of a profile's row lock
///
/// Staged status changes live here until commit, so dropping the holder is a
/// rollback.
pub struct MemoryExclusiveLock {
    inner: Arc<Mutex<Inner>>,
    profile_id: String,
    staged: Option<ProfileStatus>,
    _row: OwnedMutexGuard<()>,
}

impl MemoryExclusiveLock {
    async fn committed(&self) -> Result<Profile, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .rows
            .get(&self.profile_id)
            .map(|row| row.latest().clone())
            .ok_or_else(|| StoreError::NotFound(self.profile_id.clone()))
    }
}

#[async_trait]
impl ExclusiveLock for MemoryExclusiveLock {
    fn profile_id(&self) -> &str {
        &self.profile_id
    }

    async fn read(&mut self) -> Result<Profile, StoreError> {
        let mut profile = self.committed().await?;
        if let Some(status) = self.staged {
            profile.status = status;
        }
        Ok(profile)
    }

    async fn mark_pending(&mut self) -> Result<(), StoreError> {
        self.staged = Some(ProfileStatus::Pending);
        Ok(())
    }

    async fn commit_match(self: Box<Self>, requester_id: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let current = inner
            .rows
            .get(&self.profile_id)
            .map(|row| row.latest().clone())
            .ok_or_else(|| StoreError::NotFound(self.profile_id.clone()))?;

        // Writers without the lock are refused, so the row cannot have moved
        if !current.is_matchable() {
            return Err(StoreError::Corrupt(format!(
                "{} changed status to {} under an exclusive lock",
                self.profile_id, current.status
            )));
        }

        let next = current.apply(&Transition::matched_by(requester_id));
        inner.commit(&self.profile_id, next)
    }
}

/// A key's mutex plus the number of waiters and holders using it
struct Slot {
    lock: Arc<Mutex<()>>,
    claims: usize,
}

type SlotTable = Arc<StdMutex<HashMap<String, Slot>>>;

/// One caller's interest in a key, from the start of its wait until release.
/// The key's slot is dropped with its last claim.
struct KeyClaim {
    slots: SlotTable,
    key: String,
}

impl KeyClaim {
    fn register(slots: &SlotTable, key: &str) -> (Self, Arc<Mutex<()>>) {
        let lock = {
            let mut table = slots.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = table.entry(key.to_string()).or_insert_with(|| Slot {
                lock: Arc::new(Mutex::new(())),
                claims: 0,
            });
            slot.claims += 1;
            Arc::clone(&slot.lock)
        };

        let claim = Self {
            slots: Arc::clone(slots),
            key: key.to_string(),
        };
        (claim, lock)
    }
}

impl Drop for KeyClaim {
    fn drop(&mut self) {
        let mut table = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let vacant = match table.get_mut(&self.key) {
            Some(slot) => {
                slot.claims -= 1;
                slot.claims == 0
            }
            None => false,
        };
        if vacant {
            table.remove(&self.key);
        }
    }
}

/// In-process advisory locks keyed by arbitrary strings
///
/// Only keys with a current holder or waiter are tracked.
#[derive(Clone, Default)]
pub struct LocalAdvisoryLocks {
    slots: SlotTable,
}

impl LocalAdvisoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held or waited on
    pub fn tracked_keys(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl AdvisoryLockProvider for LocalAdvisoryLocks {
    async fn acquire(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Box<dyn AdvisoryGuard>, StoreError> {
        let (claim, lock) = KeyClaim::register(&self.slots, key);

        let held = tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout {
                key: key.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?;

        Ok(Box::new(LocalAdvisoryGuard {
            _held: held,
            claim,
        }))
    }
}

struct LocalAdvisoryGuard {
    // Declared first so the mutex is released before the claim goes
    _held: OwnedMutexGuard<()>,
    claim: KeyClaim,
}

impl AdvisoryGuard for LocalAdvisoryGuard {
    fn key(&self) -> &str {
        &self.claim.key
    }
}
