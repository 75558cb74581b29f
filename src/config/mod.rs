//! Multiplexer configuration.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`MultiplexerOptions`] | Reconnect backoff, handshake, endpoint rules |
//! | [`MultiplexerBuilder`] | Fluent configuration builder |
//! | [`EndpointRules`] | How the backend URL is derived from the origin |
//! | [`Endpoint`] | Memoized endpoint resolution |
//!
//! # Example
//!
//! ```no_run
//! use overlay_link::{Multiplexer, MultiplexerOptions};
//!
//! # fn example() -> overlay_link::Result<()> {
//! let mux = Multiplexer::builder()
//!     .options(MultiplexerOptions::new().with_dev_backend_port(8787))
//!     .origin("http://localhost:5173")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for multiplexer configuration.
pub mod builder;

/// Backend endpoint resolution.
pub mod endpoint;

/// Option values and defaults.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::MultiplexerBuilder;
pub use endpoint::{Endpoint, OriginSource, env_origin, resolve_endpoint};
pub use options::{EndpointRules, MultiplexerOptions};
