//! Shared connection with listener fan-out.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Multiplexer`] | Owns the connection, registry, and reconnect timer |
//! | [`Registration`] | Listener guard; dropping it unregisters |
//! | [`Machine`] | Pure connection state machine |
//! | [`ListenerRegistry`] | Listener set with snapshot fan-out |

// ============================================================================
// Submodules
// ============================================================================

/// Multiplexer handle and runtime.
pub mod core;

/// Listener registry.
pub mod registry;

/// Connection state machine.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{LinkStatus, Multiplexer, Registration, fan_out};
pub use registry::{Listener, ListenerRegistry, Snapshot};
pub use state::{Effect, LinkEvent, LinkState, Machine};
