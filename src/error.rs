//! Error types for the overlay link.
//!
//! This module defines all error types used throughout the crate.
//!
//! Almost every failure inside the multiplexer is absorbed and logged:
//! bad frames are dropped, listener panics are isolated, and dropped
//! connections are healed by the reconnect policy. The variants below are
//! what surfaces to callers (building, registering, decoding) and what the
//! transport reports internally before it is logged.
//!
//! # Usage
//!
//! ```ignore
//! use overlay_link::{Multiplexer, Result};
//!
//! fn attach(mux: &Multiplexer) -> Result<()> {
//!     let registration = mux.register(|message| println!("{:?}", message.kind()))?;
//!     registration.unregister();
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::Endpoint`] |
//! | Runtime | [`Error::NoRuntime`] |
//! | Connection | [`Error::ConnectionClosed`], [`Error::WebSocket`] |
//! | Payload | [`Error::Decode`] |
//! | External | [`Error::Json`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when multiplexer options fail validation.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// The backend endpoint could not be derived from the origin.
    #[error("Cannot resolve endpoint from origin '{origin}': {message}")]
    Endpoint {
        /// Origin the resolution started from.
        origin: String,
        /// Why resolution failed.
        message: String,
    },

    // ========================================================================
    // Runtime Errors
    // ========================================================================
    /// No Tokio runtime is available on the calling thread.
    ///
    /// Returned by `register` when it cannot spawn the connection task.
    #[error("No Tokio runtime available; register must be called from within a runtime")]
    NoRuntime,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The connection task has already ended.
    #[error("Connection closed")]
    ConnectionClosed,

    /// WebSocket handshake or stream failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    // ========================================================================
    // Payload Errors
    // ========================================================================
    /// Inbound frame is not a JSON object.
    #[error("Cannot decode inbound frame: {message}")]
    Decode {
        /// What was wrong with the frame.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an endpoint resolution error.
    #[inline]
    pub fn endpoint(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Endpoint {
            origin: origin.into(),
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::WebSocket(_))
    }

    /// Returns `true` if this error comes from configuration or endpoint resolution.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::Endpoint { .. } | Self::Url(_)
        )
    }

    /// Returns `true` if the frame that caused this error should simply be dropped.
    #[inline]
    #[must_use]
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::Json(_))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_error_display() {
        assert_eq!(Error::ConnectionClosed.to_string(), "Connection closed");
        assert_eq!(
            Error::decode("expected object").to_string(),
            "Cannot decode inbound frame: expected object"
        );
    }

    #[test]
    fn test_endpoint_error_display() {
        let err = Error::endpoint("ftp://host", "unsupported scheme");
        assert_eq!(
            err.to_string(),
            "Cannot resolve endpoint from origin 'ftp://host': unsupported scheme"
        );
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(!Error::config("x").is_connection_error());
        assert!(!Error::NoRuntime.is_connection_error());
    }

    #[test]
    fn test_is_config_error() {
        assert!(Error::config("x").is_config_error());
        assert!(Error::endpoint("a", "b").is_config_error());
        assert!(!Error::decode("x").is_config_error());
    }

    #[test]
    fn test_from_websocket_error() {
        let ws_err = WsError::Io(IoError::new(ErrorKind::ConnectionRefused, "refused"));
        let err: Error = ws_err.into();
        assert!(matches!(err, Error::WebSocket(_)));
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_from_url_error() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err, Error::Url(_)));
        assert!(err.is_config_error());
    }
}
