// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{MatchAttempt, MatchOutcome, Profile, ProfileStatus, Transition};
pub use requests::{AttemptMatchRequest, CreateProfileRequest};
pub use responses::{AttemptMatchResponse, ErrorResponse, HealthResponse};
