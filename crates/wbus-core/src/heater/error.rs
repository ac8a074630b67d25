//! Heater command errors

use thiserror::Error;

use crate::config::ConfigError;
use crate::protocol::{ProtocolError, TransactionError};

/// Errors returned by heater-level operations
#[derive(Error, Debug)]
pub enum HeaterError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Heater stopped with status {0:#04x}")]
    Completed(u8),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<TransactionError> for HeaterError {
    fn from(e: TransactionError) -> Self {
        HeaterError::Protocol(ProtocolError::Transaction(e))
    }
}

impl HeaterError {
    /// The transaction-level failure, if this is one
    pub fn transaction(&self) -> Option<TransactionError> {
        match self {
            HeaterError::Protocol(e) => e.transaction(),
            _ => None,
        }
    }
}

/// Operation not valid in the runner's current state.
///
/// Raised before anything is written to the bus.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("Already running")]
    AlreadyRunning,

    #[error("Not running")]
    NotRunning,
}
