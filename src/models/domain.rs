use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Matching status of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    Matchable,
    Pending,
    Matched,
}

impl ProfileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileStatus::Matchable => "matchable",
            ProfileStatus::Pending => "pending",
            ProfileStatus::Matched => "matched",
        }
    }
}

impl fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A matchable profile as persisted by the profile store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "profileId")]
    pub id: String,
    pub status: ProfileStatus,
    #[serde(rename = "matchedWith", default)]
    pub matched_with: Option<String>,
    pub version: u64,
    #[serde(rename = "updatedAt")]
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Profile {
    /// A freshly created profile: matchable, version 0
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ProfileStatus::Matchable,
            matched_with: None,
            version: 0,
            updated_at: chrono::Utc::now(),
        }
    }

    pub fn is_matchable(&self) -> bool {
        self.status == ProfileStatus::Matchable
    }

    /// Apply a committed transition, bumping the version by exactly one
    pub fn apply(&self, transition: &Transition) -> Profile {
        let (status, matched_with) = transition.target();
        Profile {
            id: self.id.clone(),
            status,
            matched_with,
            version: self.version + 1,
            updated_at: chrono::Utc::now(),
        }
    }
}

/// A status change requested of the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Matchable -> Matched, won by the given requester
    Match { requester_id: String },
}

impl Transition {
    pub fn matched_by(requester_id: impl Into<String>) -> Self {
        Transition::Match {
            requester_id: requester_id.into(),
        }
    }

    /// Status and partner the profile holds once the transition commits
    pub fn target(&self) -> (ProfileStatus, Option<String>) {
        match self {
            Transition::Match { requester_id } => {
                (ProfileStatus::Matched, Some(requester_id.clone()))
            }
        }
    }
}

/// Terminal outcome of a single match attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched {
        #[serde(rename = "matchedWith")]
        requester_id: String,
        version: u64,
    },
    AlreadyTaken,
    Conflict,
    LockTimeout,
    NotFound,
    Cancelled,
}

impl MatchOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            MatchOutcome::Matched { .. } => "matched",
            MatchOutcome::AlreadyTaken => "already_taken",
            MatchOutcome::Conflict => "conflict",
            MatchOutcome::LockTimeout => "lock_timeout",
            MatchOutcome::NotFound => "not_found",
            MatchOutcome::Cancelled => "cancelled",
        }
    }
}

/// In-flight bookkeeping for one `attempt_match` call; never persisted
#[derive(Debug, Clone)]
pub struct MatchAttempt {
    pub requester_id: String,
    pub target_profile_id: String,
    pub observed_version: Option<u64>,
    pub attempt_no: u32,
    pub started_at: Instant,
}

impl MatchAttempt {
    pub fn new(requester_id: &str, target_profile_id: &str) -> Self {
        Self {
            requester_id: requester_id.to_string(),
            target_profile_id: target_profile_id.to_string(),
            observed_version: None,
            attempt_no: 0,
            started_at: Instant::now(),
        }
    }

    pub fn observe(&mut self, profile: &Profile) {
        self.observed_version = Some(profile.version);
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}
