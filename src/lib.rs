//! Lume Match - concurrency-safe match arbitration for Lume dating app
//!
//! Many users may try to match the same profile at once; exactly one wins.
//! The [`MatchCoordinator`] arbitrates those attempts under a pluggable
//! [`IsolationPolicy`] (read-committed, repeatable-read, row lock or advisory
//! lock) against any [`ProfileStore`] backend.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use self::core::{AttemptOptions, Backoff, Cancellation, CoordinatorError, IsolationPolicy, MatchCoordinator};
pub use models::{MatchOutcome, Profile, ProfileStatus};
pub use services::{MemoryProfileStore, PostgresProfileStore, ProfileStore, StoreError, TransitionResult};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_library_exports() {
        let store = MemoryProfileStore::with_profiles(["chris"]).await.unwrap();
        let coordinator = MatchCoordinator::new(Arc::new(store));
        let outcome = coordinator
            .attempt_match("alice", "chris", &IsolationPolicy::default())
            .await
            .unwrap();
        assert!(outcome.is_matched());
    }
}
