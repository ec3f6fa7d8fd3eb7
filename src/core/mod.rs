// Core arbitration exports
pub mod backoff;
pub mod coordinator;
pub mod policy;

pub use backoff::Backoff;
pub use coordinator::{AttemptOptions, Cancellation, CoordinatorError, MatchCoordinator};
pub use policy::{IsolationPolicy, ReadMode, UnknownPolicy, WriteMode};
