use std::fmt;

/// Error taxonomy for the Rivulet client. Three kinds, matching the external
/// contract: failures to reach the backend, backend-signalled failures
/// (including envelope decode failures), and advisory-lock acquisition
/// timeouts.
#[derive(Debug)]
pub enum Error {
    /// Failure to reach or authenticate with the backend. Raised from
    /// `connect` and `ping`.
    ConnectionError(String),
    /// Any other backend-signalled failure: command error, invalid
    /// response, or envelope decode failure.
    BackendError {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    /// A named advisory lock could not be acquired within the caller's
    /// timeout. A subtype of `BackendError` per the external contract;
    /// modeled as its own variant for ergonomic matching.
    TimeoutError { lock_name: String, timeout_ms: u64 },
}

impl Error {
    pub fn backend(message: impl Into<String>) -> Self {
        Error::BackendError {
            message: message.into(),
            source: None,
        }
    }

    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::BackendError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this error is a `TimeoutError` (a subtype of `BackendError`
    /// per the external contract in spec §7).
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TimeoutError { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionError(msg) => write!(f, "connection error: {msg}"),
            Error::BackendError { message, .. } => write!(f, "backend error: {message}"),
            Error::TimeoutError {
                lock_name,
                timeout_ms,
            } => write!(
                f,
                "timeout error: could not acquire lock {lock_name} within {timeout_ms}ms"
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BackendError { source, .. } => {
                source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(value: redis::RedisError) -> Self {
        if value.is_connection_dropped() || value.is_connection_refusal() || value.is_timeout() {
            Error::ConnectionError(value.to_string())
        } else {
            Error::backend_with_source("redis command failed", value)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::backend_with_source("envelope is corrupt", value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
