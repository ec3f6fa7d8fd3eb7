// Service exports
pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::{LocalAdvisoryLocks, MemoryProfileStore};
pub use postgres::{PostgresAdvisoryLocks, PostgresProfileStore, StoredStatus};
pub use store::{
    AdvisoryGuard, AdvisoryLockProvider, ExclusiveLock, ProfileSnapshot, ProfileStore, StoreError,
    TransitionResult,
};
