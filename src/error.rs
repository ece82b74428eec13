use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by the scheduling core.
///
/// None of these are retried internally: every operation is a pure function
/// of its inputs, so the caller adjusts the inputs instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("invalid review state for card {card_id}: {reason}")]
    InvalidState { card_id: i64, reason: String },

    #[error("target date {target} is not after {now}")]
    InvalidDeadline {
        target: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("not enough time before {target} to schedule any session")]
    InsufficientTime { target: DateTime<Utc> },

    #[error("target mastery {0} is outside 0-100")]
    InvalidTarget(f64),

    #[error("plan {0} is inactive")]
    PlanInactive(Uuid),

    #[error("card {0} not found")]
    CardNotFound(i64),

    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error("session {0} is already completed")]
    SessionAlreadyCompleted(Uuid),
}

/// Failures while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, PlanError>;
