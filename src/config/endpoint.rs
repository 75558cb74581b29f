//! Backend endpoint resolution.
//!
//! The console runs either against a local development backend or
//! same-origin behind the production host. The endpoint is derived from the
//! console's origin once and then reused for every connect and reconnect.
//!
//! | Origin | Endpoint |
//! |--------|----------|
//! | `http://localhost:5173` (dev host + dev UI port) | `ws://127.0.0.1:3000/ws` |
//! | `http://overlay.lan:8080` | `ws://overlay.lan:8080/ws` |
//! | `https://overlay.example.com` | `wss://overlay.example.com/ws` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

use super::options::EndpointRules;

// ============================================================================
// Constants
// ============================================================================

/// Environment variable read by [`env_origin`].
pub const ORIGIN_ENV_VAR: &str = "OVERLAY_ORIGIN";

/// Origin assumed when [`ORIGIN_ENV_VAR`] is unset.
pub const DEFAULT_ORIGIN: &str = "http://localhost:5173";

// ============================================================================
// Types
// ============================================================================

/// Supplies the console origin when the endpoint is first needed.
pub type OriginSource = Arc<dyn Fn() -> Result<Url> + Send + Sync>;

// ============================================================================
// Functions
// ============================================================================

/// Reads the origin from [`ORIGIN_ENV_VAR`], falling back to [`DEFAULT_ORIGIN`].
///
/// # Errors
///
/// Returns [`Error::Url`] if the variable holds an invalid URL.
pub fn env_origin() -> Result<Url> {
    let raw = std::env::var(ORIGIN_ENV_VAR)
        .ok()
        .filter(|value| !value.trim().is_empty());

    match raw {
        Some(value) => Ok(Url::parse(value.trim())?),
        None => Ok(Url::parse(DEFAULT_ORIGIN)?),
    }
}

/// Derives the backend WebSocket URL from a console origin.
///
/// # Errors
///
/// Returns [`Error::Endpoint`] if the origin has no host or uses a scheme
/// other than `http`, `https`, `ws`, or `wss`.
pub fn resolve_endpoint(origin: &Url, rules: &EndpointRules) -> Result<Url> {
    let host = origin
        .host_str()
        .ok_or_else(|| Error::endpoint(origin.as_str(), "origin has no host"))?;

    if rules.is_dev_origin(host, origin.port_or_known_default()) {
        let url = format!("ws://127.0.0.1:{}{}", rules.dev_backend_port, rules.path);
        return Ok(Url::parse(&url)?);
    }

    let scheme = match origin.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::endpoint(
                origin.as_str(),
                format!("unsupported scheme '{other}'"),
            ));
        }
    };

    let url = match origin.port() {
        Some(port) => format!("{scheme}://{host}:{port}{}", rules.path),
        None => format!("{scheme}://{host}{}", rules.path),
    };

    Ok(Url::parse(&url)?)
}

// ============================================================================
// Endpoint
// ============================================================================

/// Memoized endpoint.
///
/// The origin source is consulted only until the first successful
/// resolution; afterwards the same URL is returned for the lifetime of the
/// value, even if the source would now answer differently.
pub struct Endpoint {
    /// Where the origin comes from.
    source: OriginSource,
    /// Resolution rules.
    rules: EndpointRules,
    /// First successful resolution.
    resolved: OnceLock<Url>,
}

impl Endpoint {
    /// Creates an unresolved endpoint.
    #[must_use]
    pub fn new(source: OriginSource, rules: EndpointRules) -> Self {
        Self {
            source,
            rules,
            resolved: OnceLock::new(),
        }
    }

    /// Returns the endpoint, resolving it on first use.
    ///
    /// A failed resolution is not cached; the next call tries again.
    ///
    /// # Errors
    ///
    /// Propagates errors from the origin source and [`resolve_endpoint`].
    pub fn resolve(&self) -> Result<Url> {
        if let Some(url) = self.resolved.get() {
            return Ok(url.clone());
        }

        let origin = (self.source)()?;
        let url = resolve_endpoint(&origin, &self.rules)?;
        debug!(%origin, endpoint = %url, "Endpoint resolved");

        Ok(self.resolved.get_or_init(|| url).clone())
    }

    /// Returns the endpoint if it has already been resolved.
    #[inline]
    #[must_use]
    pub fn resolved(&self) -> Option<&Url> {
        self.resolved.get()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("rules", &self.rules)
            .field("resolved", &self.resolved.get())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
