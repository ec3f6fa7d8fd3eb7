use serde::{Deserialize, Serialize};
use crate::models::domain::MatchOutcome;

/// Response for the attempt match endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptMatchResponse {
    #[serde(flatten)]
    pub outcome: MatchOutcome,
    #[serde(rename = "profileId")]
    pub profile_id: String,
    pub policy: String,
    #[serde(rename = "elapsedMs")]
    pub elapsed_ms: u64,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}
