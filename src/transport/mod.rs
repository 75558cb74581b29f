//! WebSocket transport layer.
//!
//! This module handles the single client connection to the overlay
//! backend on behalf of the multiplexer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                              ┌─────────────────┐
//! │  Multiplexer     │                              │  Overlay        │
//! │                  │         WebSocket            │  Backend        │
//! │  LinkHandle ───► │◄────────────────────────────►│                 │
//! │  (link task)     │      ws(s)://host/ws         │  /ws            │
//! └──────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `LinkHandle::spawn` - Spawn the task for one attempt
//! 2. `Endpoint::resolve` - Memoized; the first attempt runs the origin source
//! 3. `Connector::connect` - Dial the endpoint
//! 4. `LinkObserver::on_open` - Multiplexer queues the handshake
//! 5. `LinkObserver::on_message` - Decoded frames go to fan-out
//! 6. `LinkObserver::on_close` - Clean or abnormal, drives reconnect
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connector` | Connection establishment seam |
//! | `link` | Per-attempt connection task |

// ============================================================================
// Submodules
// ============================================================================

/// Connection establishment.
pub mod connector;

/// Per-attempt connection task.
pub mod link;

// ============================================================================
// Re-exports
// ============================================================================

pub use connector::{Connector, Duplex, FrameSink, FrameStream, WsConnector};
pub use link::{LinkHandle, LinkObserver};
