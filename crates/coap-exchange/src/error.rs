// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every module of the exchange engine.
//!
//! Nothing in the message-dispatch path returns these errors to the
//! transport: background faults are logged where they happen and protocol
//! failures (RST, notification timeout) are relation state transitions.
//! `Error` is reserved for caller defects (bad construction arguments),
//! configuration problems and scheduler lifecycle failures.

/// Errors returned by the exchange engine.
///
/// # Example
///
/// ```rust
/// use coap_exchange::{Error, NetworkConfig};
///
/// let mut config = NetworkConfig::default();
/// match config.set("NO_SUCH_KEY", "1") {
///     Err(Error::UnknownConfigKey(key)) => assert_eq!(key, "NO_SUCH_KEY"),
///     other => panic!("unexpected: {:?}", other),
/// }
/// ```
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Construction Errors
    // ========================================================================
    /// A required constructor argument is missing or malformed.
    InvalidArgument(String),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// A configuration value is out of range or cannot be parsed.
    InvalidConfig(String),
    /// Configuration key is not known to `NetworkConfig`.
    UnknownConfigKey(String),
    /// Configuration file not found at specified path.
    ConfigFileNotFound(String),
    /// Configuration document could not be parsed.
    ConfigParse(String),

    // ========================================================================
    // Scheduler Errors
    // ========================================================================
    /// The scheduler has been shut down and no longer accepts tasks.
    SchedulerShutdown,
    /// A worker or timer thread could not be spawned.
    SpawnFailed(std::io::Error),

    // ========================================================================
    // Other Errors
    // ========================================================================
    /// I/O error with underlying cause.
    IoError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::UnknownConfigKey(key) => write!(f, "Unknown configuration key: {}", key),
            Error::ConfigFileNotFound(path) => write!(f, "Config file not found: {}", path),
            Error::ConfigParse(msg) => write!(f, "Config parse error: {}", msg),
            Error::SchedulerShutdown => write!(f, "Scheduler is shut down"),
            Error::SpawnFailed(e) => write!(f, "Failed to spawn thread: {}", e),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::SpawnFailed(e) | Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Result type alias for exchange engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::InvalidArgument("path must not be empty".into()).to_string(),
            "Invalid argument: path must not be empty"
        );
        assert_eq!(Error::SchedulerShutdown.to_string(), "Scheduler is shut down");
        assert_eq!(
            Error::UnknownConfigKey("FOO".into()).to_string(),
            "Unknown configuration key: FOO"
        );
    }

    #[test]
    fn test_io_error_source() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, Error::IoError(_)));
        assert!(err.source().is_some());
        assert!(Error::SchedulerShutdown.source().is_none());
    }
}
