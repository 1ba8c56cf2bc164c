//! Error types for the call session engine

use crate::media::CaptureError;
use crate::peer::state::{CallState, NegotiationState};

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, CallError>;

/// Errors raised while negotiating or driving a call
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// A signaling event arrived in a state where it has no meaning
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Negotiation operation invoked from the wrong state
    #[error("Cannot {op} while negotiation is {state:?}")]
    ConnectionState {
        op: &'static str,
        state: NegotiationState,
    },

    /// User action invoked from the wrong call state
    #[error("Cannot {op} while call is {state:?}")]
    InvalidCallState { op: &'static str, state: CallState },

    /// Description creation or application failed
    #[error("Negotiation failed: {0}")]
    NegotiationFailure(String),

    /// Capture device could not deliver a stream
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(#[from] CaptureError),

    /// Relay refused the participant
    #[error("Capacity rejected: {0}")]
    CapacityRejected(String),

    /// Signaling transport error
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CallError {
    /// The current Session cannot continue and must be reset
    pub fn is_fatal(&self) -> bool {
        matches!(self, CallError::NegotiationFailure(_))
    }

    /// The call survives the error; only the failed action is lost
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CallError::MediaAcquisition(_)
                | CallError::ProtocolViolation(_)
                | CallError::CapacityRejected(_)
        )
    }
}
