//! Error types for the scenario engine
//!
//! Connection-level failures (transport error, unexpected close, write
//! failure) abort a run. Missing registry entries and unrecognized steps are
//! never errors and do not appear here.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the scenario engine
#[derive(Error, Debug)]
pub enum Error {
    // === Connection Errors ===
    #[error("Failed to connect to {target}: {source}")]
    ConnectionFailed {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(#[source] io::Error),

    #[error("Socket closed{}", closed_suffix(.with_error))]
    SocketClosed { with_error: bool },

    #[error("Failed to write request: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("No connection attached to run {run_id}")]
    NotConnected { run_id: String },

    // === Payload Errors ===
    #[error("Cannot encode payload as {encoding}: {reason}")]
    Encoding { encoding: String, reason: String },

    // === Script Errors ===
    #[error("Invalid script '{path}': {message}")]
    ScriptParse { path: String, message: String },

    #[error("Unsupported script format '{0}'. Use .yaml, .yml or .json")]
    ScriptFormat(String),

    #[error("Scenario '{0}' not found in script")]
    ScenarioNotFound(String),

    #[error("Script defines no scenarios")]
    NoScenarios,

    // === Run Errors ===
    #[error("{failed} of {total} runs failed")]
    RunsFailed { failed: usize, total: usize },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

fn closed_suffix(with_error: &bool) -> &'static str {
    if *with_error {
        " with error"
    } else {
        ""
    }
}

impl Error {
    /// Create a connection failure for `host:port`
    pub fn connection_failed(host: &str, port: u16, source: io::Error) -> Self {
        Self::ConnectionFailed {
            target: format!("{}:{}", host, port),
            source,
        }
    }

    /// Create a payload encoding error
    pub fn encoding(encoding: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Self::Encoding {
            encoding: encoding.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a script parse error
    pub fn script_parse(path: &str, message: impl std::fmt::Display) -> Self {
        Self::ScriptParse {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether this error originated on the connection (fatal to the run)
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::Transport(_)
                | Self::SocketClosed { .. }
                | Self::WriteFailed(_)
                | Self::NotConnected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_closed_message() {
        assert_eq!(
            Error::SocketClosed { with_error: false }.to_string(),
            "Socket closed"
        );
        assert_eq!(
            Error::SocketClosed { with_error: true }.to_string(),
            "Socket closed with error"
        );
    }

    #[test]
    fn test_connection_failed_names_target() {
        let err = Error::connection_failed(
            "localhost",
            9000,
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert!(err.to_string().contains("localhost:9000"));
        assert!(err.is_connection_error());
        assert!(!Error::NoScenarios.is_connection_error());
    }
}
