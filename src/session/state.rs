//! Session lifecycle state machine
//!
//! ```text
//! Uninitialized --initialize--> Initialized --shutdown--> ShuttingDown
//!        \                           |                         |
//!         `----------------------- close ----------------------'--> Closed
//! ```
//!
//! Queries loop on `Initialized`. `close` is accepted from every state.

use std::fmt;

/// Lifecycle states of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    ShuttingDown,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initialized => "initialized",
            SessionState::ShuttingDown => "shutting down",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// The three position-based content queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Hover,
    Definition,
    References,
}

impl QueryKind {
    /// Protocol method name
    pub fn method(self) -> &'static str {
        match self {
            QueryKind::Hover => "textDocument/hover",
            QueryKind::Definition => "textDocument/definition",
            QueryKind::References => "textDocument/references",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryKind::Hover => "hover",
            QueryKind::Definition => "definition",
            QueryKind::References => "references",
        };
        f.write_str(name)
    }
}

/// Operations that are subject to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOperation {
    Initialize,
    Query(QueryKind),
    Shutdown,
}

impl fmt::Display for SessionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOperation::Initialize => f.write_str("initialize"),
            SessionOperation::Query(kind) => kind.fmt(f),
            SessionOperation::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Rejected transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub operation: SessionOperation,
    pub state: SessionState,
}

/// Tracks the current state and validates each operation before it is sent
#[derive(Debug)]
pub struct Lifecycle {
    state: SessionState,
    initialize_attempted: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            initialize_attempted: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check that `operation` may be issued now
    ///
    /// A session issues at most one `initialize`: a second attempt is
    /// rejected even if the first one failed.
    pub fn begin(&mut self, operation: SessionOperation) -> Result<(), IllegalTransition> {
        let allowed = match operation {
            SessionOperation::Initialize => {
                self.state == SessionState::Uninitialized && !self.initialize_attempted
            }
            SessionOperation::Query(_) | SessionOperation::Shutdown => {
                self.state == SessionState::Initialized
            }
        };

        if !allowed {
            return Err(IllegalTransition {
                operation,
                state: self.state,
            });
        }

        if operation == SessionOperation::Initialize {
            self.initialize_attempted = true;
        }
        Ok(())
    }

    /// Record that a begun operation succeeded
    pub fn complete(&mut self, operation: SessionOperation) {
        // close() may have run while the call was in flight.
        if self.state == SessionState::Closed {
            return;
        }

        self.state = match operation {
            SessionOperation::Initialize => SessionState::Initialized,
            SessionOperation::Query(_) => self.state,
            SessionOperation::Shutdown => SessionState::ShuttingDown,
        };
    }

    /// Terminal; valid from any state
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOVER: SessionOperation = SessionOperation::Query(QueryKind::Hover);

    #[test]
    fn test_happy_path() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), SessionState::Uninitialized);

        lifecycle.begin(SessionOperation::Initialize).unwrap();
        lifecycle.complete(SessionOperation::Initialize);
        assert_eq!(lifecycle.state(), SessionState::Initialized);

        for kind in [QueryKind::References, QueryKind::Hover, QueryKind::Definition] {
            lifecycle.begin(SessionOperation::Query(kind)).unwrap();
            lifecycle.complete(SessionOperation::Query(kind));
            assert_eq!(lifecycle.state(), SessionState::Initialized);
        }

        lifecycle.begin(SessionOperation::Shutdown).unwrap();
        lifecycle.complete(SessionOperation::Shutdown);
        assert_eq!(lifecycle.state(), SessionState::ShuttingDown);

        lifecycle.close();
        assert!(lifecycle.is_closed());
    }

    #[test]
    fn test_queries_rejected_before_initialize() {
        let mut lifecycle = Lifecycle::new();

        let err = lifecycle.begin(HOVER).unwrap_err();
        assert_eq!(err.state, SessionState::Uninitialized);
        assert!(lifecycle.begin(SessionOperation::Shutdown).is_err());
    }

    #[test]
    fn test_failed_initialize_stays_uninitialized_and_cannot_retry() {
        let mut lifecycle = Lifecycle::new();

        lifecycle.begin(SessionOperation::Initialize).unwrap();
        // no complete(): the remote returned an error
        assert_eq!(lifecycle.state(), SessionState::Uninitialized);
        assert!(lifecycle.begin(SessionOperation::Initialize).is_err());
        assert!(lifecycle.begin(HOVER).is_err());
    }

    #[test]
    fn test_nothing_after_shutdown_or_close() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.begin(SessionOperation::Initialize).unwrap();
        lifecycle.complete(SessionOperation::Initialize);
        lifecycle.begin(SessionOperation::Shutdown).unwrap();
        lifecycle.complete(SessionOperation::Shutdown);

        assert!(lifecycle.begin(HOVER).is_err());
        assert!(lifecycle.begin(SessionOperation::Shutdown).is_err());

        lifecycle.close();
        lifecycle.close();
        let err = lifecycle.begin(HOVER).unwrap_err();
        assert_eq!(err.state, SessionState::Closed);
    }

    #[test]
    fn test_close_during_call_wins() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.begin(SessionOperation::Initialize).unwrap();
        lifecycle.close();
        lifecycle.complete(SessionOperation::Initialize);

        assert_eq!(lifecycle.state(), SessionState::Closed);
    }

    #[test]
    fn test_display() {
        assert_eq!(HOVER.to_string(), "hover");
        assert_eq!(SessionState::ShuttingDown.to_string(), "shutting down");
        assert_eq!(QueryKind::References.method(), "textDocument/references");
    }
}
