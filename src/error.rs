//! Error types for the streaming pipeline.
//!
//! Nothing in the core is fatal: transport failures are absorbed by the reconnect
//! policy, precondition failures become logged no-ops and bad frames are dropped.
//! `StreamError` still carries enough structure for callers that want to react to
//! an individual outcome, such as the result of a single send.
//!
//! ## Error Categories
//!
//! - **Connection Errors**: handshake failures, abrupt closes, keep-alive timeouts
//! - **Precondition Errors**: sends while disconnected, connects without a token
//! - **Frame Errors**: undecodable camera frames or encoder failures
//! - **Configuration Errors**: unreadable or malformed config documents
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use geocast::StreamError;
//!
//! let error = StreamError::connection_failed("server refused the handshake");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for streaming operations.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Main error type for streaming operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("Failed to connect to stream server: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Transport is not connected (state: {state})")]
    NotConnected { state: String },

    #[error("Send of {bytes} bytes failed: {reason}")]
    Send { bytes: usize, reason: String },

    #[error("Frame decode failed: {details}")]
    Decode { details: String },

    #[error("Frame encode failed: {details}")]
    Encode { details: String },

    #[error("Configuration error in {context}: {details}")]
    Config { context: String, details: String },

    #[error("Store error: {path}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Platform error: {operation}: {details}")]
    Platform { operation: String, details: String },

    #[error("Serialization failed")]
    Serialization(#[from] serde_json::Error),
}

impl StreamError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Connection { .. } => true,
            StreamError::Timeout { .. } => true,
            StreamError::Send { .. } => true,
            StreamError::NotConnected { .. } => true,
            StreamError::Decode { .. } => false,
            StreamError::Encode { .. } => false,
            StreamError::Config { .. } => false,
            StreamError::Store { .. } => false,
            StreamError::Platform { .. } => false,
            StreamError::Serialization(_) => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StreamError::Connection { .. } => vec![
                "Check network connectivity",
                "Verify the configured server URL",
                "Confirm the server is accepting WebSocket connections",
            ],
            StreamError::Timeout { .. } => vec![
                "Check network latency to the server",
                "Increase the connect timeout",
            ],
            StreamError::NotConnected { .. } => vec![
                "Start recording to open the connection",
                "Wait for the reconnect policy to restore the session",
            ],
            StreamError::Send { .. } => vec![
                "Check network connectivity",
                "Reduce frame size or transport quality",
            ],
            StreamError::Decode { .. } => vec![
                "Verify the camera delivers a supported pixel format",
                "Check plane strides reported by the platform",
            ],
            StreamError::Encode { .. } => vec!["Verify the JPEG quality setting is within 1-100"],
            StreamError::Config { .. } => vec![
                "Check the configuration document syntax",
                "Remove unknown keys or fix value types",
            ],
            StreamError::Store { .. } => vec![
                "Check the store path exists and is writable",
                "Check file permissions",
            ],
            StreamError::Platform { .. } => vec![
                "Check camera and location permissions",
                "Restart the platform sensor service",
            ],
            StreamError::Serialization(_) => vec!["Check payload values are representable in JSON"],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        StreamError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        StreamError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for frame decode errors.
    pub fn decode_failed(details: impl Into<String>) -> Self {
        StreamError::Decode { details: details.into() }
    }

    /// Helper constructor for frame encode errors.
    pub fn encode_failed(details: impl Into<String>) -> Self {
        StreamError::Encode { details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        StreamError::Config { context: context.into(), details: details.into() }
    }

    /// Helper constructor for store errors with path context.
    pub fn store_error(path: PathBuf, source: std::io::Error) -> Self {
        StreamError::Store { path, source }
    }

    /// Helper constructor for platform adapter errors.
    pub fn platform_error(operation: impl Into<String>, details: impl Into<String>) -> Self {
        StreamError::Platform { operation: operation.into(), details: details.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            reason in ".*",
            details in ".*",
            bytes in 0usize..10_000_000usize,
            duration_ms in 1u64..60000u64
          ) {
            let connection = StreamError::connection_failed(reason.clone());
            let decode = StreamError::decode_failed(details.clone());
            let send = StreamError::Send { bytes, reason: reason.clone() };
            let timeout = StreamError::Timeout { duration: Duration::from_millis(duration_ms) };

            prop_assert!(connection.to_string().contains(&reason));
            prop_assert!(decode.to_string().contains(&details));
            prop_assert!(send.to_string().contains(&bytes.to_string()));
            prop_assert!(!timeout.to_string().is_empty());
          }

          #[test]
          fn source_chain_is_preserved(base_message in ".*", depth in 1usize..5usize) {
            let mut current: Box<dyn std::error::Error + Send + Sync> =
              Box::new(std::io::Error::other(base_message.clone()));
            for i in 0..depth {
              current = Box::new(StreamError::connection_failed_with_source(format!("level {}", i), current));
            }

            let mut traversed = 0;
            let mut found = false;
            let mut cursor = std::error::Error::source(current.as_ref());
            while let Some(source) = cursor {
              traversed += 1;
              if source.to_string().contains(&base_message) {
                found = true;
              }
              cursor = std::error::Error::source(source);
            }

            prop_assert_eq!(traversed, depth);
            prop_assert!(found, "base message '{}' lost in chain", base_message);
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<StreamError>();

        let error = StreamError::NotConnected { state: "disconnected".to_owned() };
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn retry_classification() {
        assert!(StreamError::connection_failed("reset").is_retryable());
        assert!(StreamError::Timeout { duration: Duration::from_secs(30) }.is_retryable());
        assert!(!StreamError::encode_failed("buffer").is_retryable());
        assert!(!StreamError::decode_failed("short plane").is_retryable());

        for error in [
            StreamError::connection_failed("x"),
            StreamError::NotConnected { state: "connecting".to_owned() },
            StreamError::config_error("transport", "bad"),
            StreamError::platform_error("bind", "denied"),
        ] {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn serde_json_errors_convert() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let converted: StreamError = err.into();
        assert!(matches!(converted, StreamError::Serialization(_)));
    }
}
