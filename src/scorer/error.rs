// src/scorer/error.rs
use thiserror::Error;

/// Selection failures surfaced to clients (spec §4.4, §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no active backends available")]
    NoActiveBackends,
    #[error("no backend has capacity for the requested tier")]
    NoCapacity,
    #[error("unknown tier: {0}")]
    UnknownTier(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SelectionError {
    /// Machine-readable reason code for the 503 body (spec §6).
    pub fn reason_code(&self) -> &'static str {
        match self {
            SelectionError::NoActiveBackends => "NO_ACTIVE_BACKENDS",
            SelectionError::NoCapacity => "NO_CAPACITY",
            SelectionError::UnknownTier(_) => "UNKNOWN_TIER",
            SelectionError::InvalidInput(_) => "INVALID_INPUT",
        }
    }
}
