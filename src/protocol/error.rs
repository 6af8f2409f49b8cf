//! Wire error taxonomy.

/// Errors that can occur on a protocol connection.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// A read or write deadline was exceeded.
    #[error("Wire timeout after {0}ms")]
    Timeout(u64),

    /// The peer closed the connection cleanly.
    #[error("Connection closed by peer")]
    Closed,

    /// Any other I/O failure on the connection.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A control line did not match the expected grammar.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// The peer replied with an explicit `ERR` line.
    #[error("Rejected by peer: {code} {message}")]
    Rejected {
        /// Numeric error code from the `ERR` line.
        code: u16,
        /// Human-readable message from the `ERR` line.
        message: String,
    },
}

impl WireError {
    /// Whether this failure is expected to clear up after a reconnect.
    ///
    /// Transient failures (peer gone, connection refused, broken pipe) are
    /// recovered by the tailer via reconnect and backoff. Anything else is
    /// terminal for the current send loop.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        use std::io::ErrorKind;

        match self {
            Self::Closed => true,
            Self::Transport(e) => matches!(
                e.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::UnexpectedEof
            ),
            Self::Timeout(_) | Self::Malformed(_) | Self::Rejected { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_closed_display() {
        let err = WireError::Closed;
        assert_eq!(err.to_string(), "Connection closed by peer");
    }

    #[test]
    fn test_rejected_display() {
        let err = WireError::Rejected {
            code: 500,
            message: "Unknown command FOO".to_string(),
        };
        assert_eq!(err.to_string(), "Rejected by peer: 500 Unknown command FOO");
    }

    #[test]
    fn test_broken_pipe_is_transient() {
        let err = WireError::Transport(Error::new(ErrorKind::BrokenPipe, "broken pipe"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_connection_refused_is_transient() {
        let err = WireError::Transport(Error::new(ErrorKind::ConnectionRefused, "refused"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_closed_is_transient() {
        assert!(WireError::Closed.is_transient());
    }

    #[test]
    fn test_permission_denied_is_not_transient() {
        let err = WireError::Transport(Error::new(ErrorKind::PermissionDenied, "denied"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_malformed_is_not_transient() {
        let err = WireError::Malformed("bad line".to_string());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_rejected_is_not_transient() {
        let err = WireError::Rejected {
            code: 500,
            message: "nope".to_string(),
        };
        assert!(!err.is_transient());
    }
}
