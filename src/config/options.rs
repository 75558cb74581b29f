//! Multiplexer options.
//!
//! Plain configuration values for the link: reconnect backoff, handshake
//! literal, and the rules used to derive the backend endpoint from the
//! console's origin.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use overlay_link::MultiplexerOptions;
//!
//! let options = MultiplexerOptions::new()
//!     .with_reconnect_delay(Duration::from_secs(5))
//!     .with_dev_backend_port(8787);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::DEFAULT_HANDSHAKE;

// ============================================================================
// Constants
// ============================================================================

/// Delay before reconnecting after an unexpected close.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Port the console is served on during local development.
pub const DEFAULT_DEV_UI_PORT: u16 = 5173;

/// Port the backend listens on during local development.
pub const DEFAULT_DEV_BACKEND_PORT: u16 = 3000;

/// Path of the WebSocket endpoint on the backend.
pub const DEFAULT_ENDPOINT_PATH: &str = "/ws";

/// Hosts treated as a local development host.
const DEFAULT_DEV_HOSTS: &[&str] = &["localhost", "127.0.0.1"];

// ============================================================================
// EndpointRules
// ============================================================================

/// Rules for turning the console origin into the backend WebSocket URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRules {
    /// Hosts recognized as local development hosts.
    pub dev_hosts: Vec<String>,

    /// Console port that, together with a dev host, selects the dev backend.
    pub dev_ui_port: u16,

    /// Loopback port of the backend in development.
    pub dev_backend_port: u16,

    /// WebSocket path on the backend.
    pub path: String,
}

impl Default for EndpointRules {
    fn default() -> Self {
        Self {
            dev_hosts: DEFAULT_DEV_HOSTS.iter().map(|h| (*h).to_string()).collect(),
            dev_ui_port: DEFAULT_DEV_UI_PORT,
            dev_backend_port: DEFAULT_DEV_BACKEND_PORT,
            path: DEFAULT_ENDPOINT_PATH.to_string(),
        }
    }
}

impl EndpointRules {
    /// Returns `true` if `host:port` is the local development console.
    #[must_use]
    pub fn is_dev_origin(&self, host: &str, port: Option<u16>) -> bool {
        port == Some(self.dev_ui_port)
            && self.dev_hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
    }
}

// ============================================================================
// MultiplexerOptions
// ============================================================================

/// Configuration for a [`Multiplexer`](crate::Multiplexer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiplexerOptions {
    /// Delay before reconnecting after an abnormal close.
    pub reconnect_delay: Duration,

    /// Literal payload sent once after each successful open.
    pub handshake: String,

    /// Endpoint resolution rules.
    pub endpoint: EndpointRules,
}

impl Default for MultiplexerOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl MultiplexerOptions {
    /// Creates options with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            handshake: DEFAULT_HANDSHAKE.to_string(),
            endpoint: EndpointRules::default(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl MultiplexerOptions {
    /// Sets the reconnect backoff.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the handshake literal.
    #[inline]
    #[must_use]
    pub fn with_handshake(mut self, handshake: impl Into<String>) -> Self {
        self.handshake = handshake.into();
        self
    }

    /// Sets the development console port.
    #[inline]
    #[must_use]
    pub fn with_dev_ui_port(mut self, port: u16) -> Self {
        self.endpoint.dev_ui_port = port;
        self
    }

    /// Sets the development backend port.
    #[inline]
    #[must_use]
    pub fn with_dev_backend_port(mut self, port: u16) -> Self {
        self.endpoint.dev_backend_port = port;
        self
    }

    /// Adds a host recognized as a development host.
    #[inline]
    #[must_use]
    pub fn with_dev_host(mut self, host: impl Into<String>) -> Self {
        self.endpoint.dev_hosts.push(host.into());
        self
    }

    /// Sets the WebSocket path.
    #[inline]
    #[must_use]
    pub fn with_endpoint_path(mut self, path: impl Into<String>) -> Self {
        self.endpoint.path = path.into();
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl MultiplexerOptions {
    /// Checks that the options describe a usable link.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero reconnect delay, an empty
    /// handshake, or an endpoint path not starting with `/`.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_delay.is_zero() {
            return Err(Error::config(
                "reconnect delay must be greater than zero to avoid a tight reconnect loop",
            ));
        }

        if self.handshake.is_empty() {
            return Err(Error::config("handshake payload must not be empty"));
        }

        if !self.endpoint.path.starts_with('/') {
            return Err(Error::config(format!(
                "endpoint path must start with '/': {}",
                self.endpoint.path
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
