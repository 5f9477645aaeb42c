use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub use crate::protocol::messages::ProtocolError;

/// Transport and authentication failures. Always fatal to the caller.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("I/O error talking to {endpoint}: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("authentication failed for [{principal}]: {message}")]
    Authentication { principal: String, message: String },
    #[error("connection probe rejected for [{principal}]: {line}")]
    ProbeRejected { principal: String, line: String },
    #[error("session was closed while reading")]
    Cancelled,
    #[error("session is closed")]
    Closed,
}

/// Settings rejected before anything is sent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("fetch size must be positive, got {0}")]
    NonPositiveFetchSize(i64),
    #[error("fetch size {0} is too large")]
    FetchSizeTooLarge(i64),
    #[error("fetch separator may not contain line breaks: {0:?}")]
    InvalidSeparator(String),
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: String, value: String },
}

/// Restricted output did not match the golden transcript or the expected shape.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationDivergence {
    pub principal: String,
    pub query: String,
    /// Zero-based transcript line where the outputs part ways.
    pub position: usize,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub reason: String,
}

impl fmt::Display for AuthorizationDivergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} for principal [{}] running [{}] at line {}: expected {:?}, actual {:?}",
            self.reason, self.principal, self.query, self.position, self.expected, self.actual
        )
    }
}

impl std::error::Error for AuthorizationDivergence {}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("protocol framing error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("authorization divergence: {0}")]
    Divergence(Box<AuthorizationDivergence>),
}

impl From<AuthorizationDivergence> for Error {
    fn from(divergence: AuthorizationDivergence) -> Self {
        Error::Divergence(Box::new(divergence))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divergence_message_has_full_context() {
        let err: Error = AuthorizationDivergence {
            principal: "only_a".into(),
            query: "SELECT * FROM test".into(),
            position: 2,
            expected: Some("1|2".into()),
            actual: Some("1".into()),
            reason: "transcript mismatch".into(),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("[only_a]"));
        assert!(msg.contains("[SELECT * FROM test]"));
        assert!(msg.contains("line 2"));
        assert!(msg.contains("\"1|2\""));
        assert!(msg.contains("\"1\""));
    }

    #[test]
    fn test_protocol_error_converts() {
        let err: Error = ProtocolError::PrematureEnd.into();
        assert!(matches!(err, Error::Protocol(ProtocolError::PrematureEnd)));
    }
}
