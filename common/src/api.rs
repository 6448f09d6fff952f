//! Defines the error taxonomy shared by the wire client, the sessions and the
//! foreign-table adapter.

use thiserror::Error;

/// Machine-readable error category surfaced to the host engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Connection,
    Protocol,
    RemoteExecution,
    Stream,
    TypeMismatch,
    NotSupported,
    InvalidOption,
    InvalidState,
}

impl ErrorCategory {
    /// Stable name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Connection => "connection_error",
            ErrorCategory::Protocol => "protocol_error",
            ErrorCategory::RemoteExecution => "remote_execution_error",
            ErrorCategory::Stream => "stream_error",
            ErrorCategory::TypeMismatch => "type_mismatch_error",
            ErrorCategory::NotSupported => "not_supported",
            ErrorCategory::InvalidOption => "invalid_option",
            ErrorCategory::InvalidState => "invalid_state",
        }
    }

    /// SQLSTATE code the host reports for this category.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            ErrorCategory::Connection => "HV00N",
            ErrorCategory::Protocol => "08P01",
            ErrorCategory::RemoteExecution => "HV000",
            ErrorCategory::Stream => "08006",
            ErrorCategory::TypeMismatch => "HV004",
            ErrorCategory::NotSupported => "0A000",
            ErrorCategory::InvalidOption => "HV00D",
            ErrorCategory::InvalidState => "55000",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors crossing the boundary between the host engine and the remote engine.
///
/// Every variant is terminal for the session that produced it. Nothing in the
/// bridge retries; the host decides whether to re-plan the statement.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The transport could not be established (unreachable host, rejected
    /// credentials, connect or handshake timeout).
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed exchange or protocol revision mismatch.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote accepted the query bytes but rejected the query.
    ///
    /// `message` is the remote's diagnostic text, kept verbatim.
    #[error("remote execution error (code {code}, {name}): {message}")]
    RemoteExecution {
        code: i32,
        name: String,
        message: String,
    },

    /// Transport fault after streaming began (reset, truncated block,
    /// receive timeout, checksum mismatch).
    #[error("stream error: {0}")]
    Stream(String),

    /// A wire value cannot be represented in the declared host column type.
    #[error("type mismatch in column \"{column}\": {message}")]
    TypeMismatch { column: String, message: String },

    /// An optional capability the adapter does not provide.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Unknown or malformed server, table or user option.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// An operation was called in a session state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl BridgeError {
    /// Returns the machine-readable category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::Connection(_) => ErrorCategory::Connection,
            BridgeError::Protocol(_) => ErrorCategory::Protocol,
            BridgeError::RemoteExecution { .. } => ErrorCategory::RemoteExecution,
            BridgeError::Stream(_) => ErrorCategory::Stream,
            BridgeError::TypeMismatch { .. } => ErrorCategory::TypeMismatch,
            BridgeError::NotSupported(_) => ErrorCategory::NotSupported,
            BridgeError::InvalidOption(_) => ErrorCategory::InvalidOption,
            BridgeError::InvalidState(_) => ErrorCategory::InvalidState,
        }
    }

    pub fn type_mismatch(column: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::TypeMismatch {
            column: column.into(),
            message: message.into(),
        }
    }
}

/// Result alias used across the bridge crates.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_message_is_verbatim() {
        let err = BridgeError::RemoteExecution {
            code: 60,
            name: "DB::Exception".to_string(),
            message: "Table default.missing doesn't exist".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::RemoteExecution);
        assert!(err
            .to_string()
            .contains("Table default.missing doesn't exist"));
    }

    #[test]
    fn test_categories_have_distinct_sqlstates() {
        let all = [
            ErrorCategory::Connection,
            ErrorCategory::Protocol,
            ErrorCategory::RemoteExecution,
            ErrorCategory::Stream,
            ErrorCategory::TypeMismatch,
            ErrorCategory::NotSupported,
            ErrorCategory::InvalidOption,
            ErrorCategory::InvalidState,
        ];
        let mut codes: Vec<_> = all.iter().map(|c| c.sqlstate()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }
}
