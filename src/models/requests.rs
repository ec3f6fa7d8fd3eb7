use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request to attempt a match against a profile
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AttemptMatchRequest {
    #[validate(length(min = 1))]
    #[serde(alias = "requester_id", rename = "requesterId")]
    pub requester_id: String,
    #[validate(length(min = 1))]
    #[serde(alias = "profile_id", rename = "profileId")]
    pub profile_id: String,
    /// One of read_committed, repeatable_read, row_lock, advisory_lock
    #[serde(default)]
    pub policy: Option<String>,
    #[validate(length(min = 1))]
    #[serde(alias = "advisory_key", rename = "advisoryKey", default)]
    pub advisory_key: Option<String>,
    #[validate(range(max = 20))]
    #[serde(alias = "retry_limit", rename = "retryLimit", default)]
    pub retry_limit: Option<u32>,
    #[validate(range(min = 1, max = 60000))]
    #[serde(alias = "lock_timeout_ms", rename = "lockTimeoutMs", default)]
    pub lock_timeout_ms: Option<u64>,
}

/// Request to register a new matchable profile
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateProfileRequest {
    #[validate(length(min = 1, max = 128))]
    #[serde(alias = "profile_id", rename = "profileId")]
    pub profile_id: String,
}
