

use thiserror::Error;
use uuid::Uuid;


#[derive(Error, Debug)]
pub enum KbError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Datastore connection error: {0}")]
    Connection(String),

    #[error("Query execution error: {0}")]
    Query(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Signal unavailable ({signal}): {reason}")]
    SignalUnavailable { signal: &'static str, reason: String },

    #[error("Batch job failed: {0}")]
    BatchFailure(String),

    #[error("Concurrency conflict: {0} is already running")]
    ConcurrencyConflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for KbError {
    fn from(e: config::ConfigError) -> Self {
        KbError::Config(e.to_string())
    }
}


pub type Result<T> = std::result::Result<T, KbError>;
