//! Overlay Link - shared real-time connection for the TTS overlay console.
//!
//! The console has many independent views (chat feed, TTS queue, avatar
//! preview, status bar) that all need live events from the overlay
//! backend. This crate gives them one WebSocket connection to share.
//!
//! # Architecture
//!
//! ```text
//!   view A ─┐                                       ┌──────────────┐
//!   view B ─┼─ register ─► Multiplexer ◄── ws ────► │   Backend    │
//!   view C ─┘   (fan-out)   (one link)              └──────────────┘
//! ```
//!
//! Key behaviors:
//!
//! - The connection opens lazily with the first listener and closes with the last
//! - Every inbound message reaches every listener registered at that moment
//! - A panicking listener or a malformed frame never affects the others
//! - Unexpected drops are healed after a fixed backoff while listeners remain
//!
//! # Quick Start
//!
//! ```no_run
//! use overlay_link::Multiplexer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mux = Multiplexer::global();
//!
//!     let _queue = mux.register_for("tts.queued", |message| {
//!         println!("queued: {:?}", message.get("text"));
//!     })?;
//!
//!     let _all = mux.register(|message| {
//!         println!("event: {:?}", message.kind());
//!     })?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Options, builder, endpoint resolution |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`multiplexer`] | [`Multiplexer`], [`Registration`], state machine |
//! | [`protocol`] | Inbound messages and close codes |
//! | [`transport`] | WebSocket connection task (internal) |

// ============================================================================
// Modules
// ============================================================================

/// Options, builder, and endpoint resolution.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for listeners, attempts, and timers.
pub mod identifiers;

/// Shared connection, listener registry, and state machine.
pub mod multiplexer;

/// WebSocket protocol types.
pub mod protocol;

/// WebSocket transport layer.
///
/// Connection establishment and the per-attempt connection task.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Config types
pub use config::{EndpointRules, MultiplexerBuilder, MultiplexerOptions};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{AttemptId, ListenerId, TimerId};

// Multiplexer types
pub use multiplexer::{LinkState, LinkStatus, Multiplexer, Registration};

// Protocol types
pub use protocol::{CloseKind, InboundMessage};

// Transport types
pub use transport::{Connector, Duplex, WsConnector};
