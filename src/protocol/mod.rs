//! WebSocket protocol types.
//!
//! The link speaks a deliberately thin protocol with the overlay backend:
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | Handshake | Local → Backend | Sent once after every successful open |
//! | [`InboundMessage`] | Backend → Local | JSON object fanned out to listeners |
//! | Close ([`CLEAN_CLOSE_CODE`]) | Local → Backend | Last listener left |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `close` | Close codes and [`CloseKind`] |
//! | `message` | [`InboundMessage`] decoding |

// ============================================================================
// Submodules
// ============================================================================

/// Close codes and close classification.
pub mod close;

/// Inbound message decoding.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use close::{CLEAN_CLOSE_CODE, CLEAN_CLOSE_REASON, CloseKind};
pub use message::InboundMessage;

// ============================================================================
// Constants
// ============================================================================

/// Handshake literal sent on open unless overridden in the options.
pub const DEFAULT_HANDSHAKE: &str = r#"{"type":"hello","client":"console"}"#;
