//! Builder pattern for multiplexer configuration.
//!
//! Provides a fluent API for configuring and creating [`Multiplexer`]
//! instances that are not the process-wide one.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use overlay_link::Multiplexer;
//!
//! # fn example() -> overlay_link::Result<()> {
//! let mux = Multiplexer::builder()
//!     .origin("https://overlay.example.com")
//!     .reconnect_delay(Duration::from_secs(5))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::multiplexer::Multiplexer;
use crate::transport::{Connector, WsConnector};

use super::endpoint::{OriginSource, env_origin, resolve_endpoint};
use super::options::MultiplexerOptions;

// ============================================================================
// OriginSpec
// ============================================================================

/// Where the builder gets the origin from.
#[derive(Clone)]
enum OriginSpec {
    /// Fixed origin, parsed and checked at build time.
    Fixed(String),
    /// Callback consulted on first connect.
    Source(OriginSource),
}

// ============================================================================
// MultiplexerBuilder
// ============================================================================

/// Builder for configuring a [`Multiplexer`].
///
/// Use [`Multiplexer::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct MultiplexerBuilder {
    /// Options being assembled.
    options: MultiplexerOptions,
    /// Origin override.
    origin: Option<OriginSpec>,
    /// Connector override.
    connector: Option<Arc<dyn Connector>>,
}

// ============================================================================
// MultiplexerBuilder Implementation
// ============================================================================

impl MultiplexerBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all options at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: MultiplexerOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the reconnect backoff.
    #[inline]
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.options.reconnect_delay = delay;
        self
    }

    /// Sets the handshake literal sent after each open.
    #[inline]
    #[must_use]
    pub fn handshake(mut self, handshake: impl Into<String>) -> Self {
        self.options.handshake = handshake.into();
        self
    }

    /// Sets the WebSocket path on the backend.
    #[inline]
    #[must_use]
    pub fn endpoint_path(mut self, path: impl Into<String>) -> Self {
        self.options.endpoint.path = path.into();
        self
    }

    /// Sets the console origin the endpoint is derived from.
    ///
    /// # Arguments
    ///
    /// * `origin` - URL the console is served from (e.g. "http://localhost:5173")
    #[inline]
    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(OriginSpec::Fixed(origin.into()));
        self
    }

    /// Supplies the origin lazily.
    ///
    /// The callback runs on the connection task when the first connection
    /// is made and, after one successful resolution, never again. No lock
    /// is held while it runs, so it may query the multiplexer.
    #[inline]
    #[must_use]
    pub fn origin_with<F>(mut self, source: F) -> Self
    where
        F: Fn() -> Result<Url> + Send + Sync + 'static,
    {
        self.origin = Some(OriginSpec::Source(Arc::new(source)));
        self
    }

    /// Replaces the connector.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Builds the multiplexer with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the options are invalid or a fixed origin is not a URL
    /// - [`Error::Endpoint`] if no endpoint can be derived from a fixed origin
    pub fn build(self) -> Result<Multiplexer> {
        self.options.validate()?;
        let origin = self.validate_origin()?;
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector) as Arc<dyn Connector>);

        Ok(Multiplexer::from_parts(self.options, origin, connector))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl MultiplexerBuilder {
    /// Turns the origin configuration into a source.
    fn validate_origin(&self) -> Result<OriginSource> {
        match &self.origin {
            None => Ok(Arc::new(env_origin)),
            Some(OriginSpec::Source(source)) => Ok(Arc::clone(source)),
            Some(OriginSpec::Fixed(text)) => {
                let url = Url::parse(text)
                    .map_err(|e| Error::config(format!("Invalid origin '{text}': {e}")))?;

                // Surface resolution problems now rather than on first connect.
                resolve_endpoint(&url, &self.options.endpoint)?;

                Ok(Arc::new(move || Ok(url.clone())))
            }
        }
    }
}

impl fmt::Debug for MultiplexerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = match &self.origin {
            None => "env",
            Some(OriginSpec::Fixed(text)) => text.as_str(),
            Some(OriginSpec::Source(_)) => "callback",
        };

        f.debug_struct("MultiplexerBuilder")
            .field("options", &self.options)
            .field("origin", &origin)
            .field("custom_connector", &self.connector.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
