//! Error types for session operations

use crate::io::{ProcessError, TransportError};
use crate::lsp::JsonRpcError;
use crate::session::state::{IllegalTransition, SessionOperation, SessionState};

/// Session errors, grouped by who is at fault
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The operation is not legal in the current lifecycle state
    #[error("{operation} is not allowed while the session is {state}")]
    InvalidState {
        operation: SessionOperation,
        state: SessionState,
    },

    /// The language server process could not be started
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// The TCP connection could not be established
    #[error("Connection error: {0}")]
    Connect(#[from] TransportError),

    /// The connection failed while a call was in progress
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a JSON-RPC error
    #[error("{method} failed ({code}): {message}")]
    Protocol {
        method: String,
        code: i32,
        message: String,
    },

    /// The server answered with something that does not fit the result type
    #[error("invalid {method} response: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    /// The request parameters could not be encoded
    #[error("could not encode {method} request: {source}")]
    Encode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SessionError {
    /// Attach the method name to a JSON-RPC failure
    pub fn from_rpc(method: &str, error: JsonRpcError) -> Self {
        match error {
            JsonRpcError::Server { code, message, .. } => SessionError::Protocol {
                method: method.to_string(),
                code,
                message,
            },
            JsonRpcError::Deserialization(source) => SessionError::Decode {
                method: method.to_string(),
                source,
            },
            JsonRpcError::Serialization(source) => SessionError::Encode {
                method: method.to_string(),
                source,
            },
            JsonRpcError::ConnectionClosed => {
                SessionError::Transport(format!("connection closed during {method}"))
            }
            JsonRpcError::Transport(reason) => SessionError::Transport(reason),
        }
    }

    /// Failures of the process, socket or stream
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SessionError::Process(_) | SessionError::Connect(_) | SessionError::Transport(_)
        )
    }

    /// The remote rejected or garbled the call
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            SessionError::Protocol { .. } | SessionError::Decode { .. }
        )
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, SessionError::InvalidState { .. })
    }
}

impl From<IllegalTransition> for SessionError {
    fn from(transition: IllegalTransition) -> Self {
        SessionError::InvalidState {
            operation: transition.operation,
            state: transition.state,
        }
    }
}
