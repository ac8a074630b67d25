//! Protocol errors

use thiserror::Error;

/// Errors that can occur during bus communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Link closed")]
    LinkClosed,

    #[error("Link failed earlier in this session: {0}")]
    LinkFailed(String),

    #[error("Transaction failed: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error means the link itself is unusable.
    ///
    /// Link errors end the session: the queue rejects every later
    /// transaction instead of touching the bus again.
    pub fn is_link_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::SerialError(_)
                | ProtocolError::LinkClosed
                | ProtocolError::LinkFailed(_)
                | ProtocolError::IoError(_)
        )
    }

    /// The transaction-level failure, if this is one
    pub fn transaction(&self) -> Option<TransactionError> {
        match self {
            ProtocolError::Transaction(e) => Some(*e),
            _ => None,
        }
    }
}

/// Outcome of a request that did not produce an accepted reply
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Not acknowledged")]
    NotAcknowledged,

    #[error("Response not recognized: {0:#04x}")]
    UnrecognizedResponse(u8),

    #[error("Response not recognized: empty payload")]
    EmptyResponse,

    #[error("No response")]
    NoResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_classification() {
        assert!(ProtocolError::LinkClosed.is_link_error());
        assert!(ProtocolError::SerialError("gone".into()).is_link_error());
        assert!(!ProtocolError::Cancelled.is_link_error());
        assert!(!ProtocolError::from(TransactionError::NoResponse).is_link_error());
    }

    #[test]
    fn test_transaction_error_display() {
        let err = ProtocolError::from(TransactionError::UnrecognizedResponse(0xd6));
        assert_eq!(err.to_string(), "Transaction failed: Response not recognized: 0xd6");
        assert_eq!(err.transaction(), Some(TransactionError::UnrecognizedResponse(0xd6)));
    }
}
