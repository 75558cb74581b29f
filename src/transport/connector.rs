//! Connection establishment.
//!
//! [`Connector`] is the seam between the multiplexer and the network: it
//! turns an endpoint URL into a split duplex of WebSocket frames. The
//! default [`WsConnector`] dials with `tokio-tungstenite`; embedders can
//! supply their own (TLS configuration, proxies, in-process test doubles).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::pin::Pin;
use std::result::Result as StdResult;

use async_trait::async_trait;
use futures_util::{Sink, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;
use url::Url;

use crate::error::Result;

// ============================================================================
// Types
// ============================================================================

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Inbound half of a connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = StdResult<Message, WsError>> + Send>>;

// ============================================================================
// Duplex
// ============================================================================

/// An established connection, split into its two halves.
pub struct Duplex {
    /// Frames to the backend.
    pub sink: FrameSink,
    /// Frames from the backend.
    pub stream: FrameStream,
}

impl Duplex {
    /// Creates a duplex from already split halves.
    #[inline]
    #[must_use]
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl fmt::Debug for Duplex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Duplex").finish_non_exhaustive()
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens connections to the backend.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connects to `endpoint`.
    ///
    /// An attempt that never resolves is left to the transport's own
    /// failure; no extra timeout is applied by the multiplexer.
    ///
    /// # Errors
    ///
    /// Any error is treated as an abnormal close of the attempt.
    async fn connect(&self, endpoint: &Url) -> Result<Duplex>;
}

// ============================================================================
// WsConnector
// ============================================================================

/// Default connector backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Duplex> {
        let (ws_stream, response) = connect_async(endpoint.as_str()).await?;

        debug!(%endpoint, status = %response.status(), "WebSocket upgrade completed");

        let (sink, stream) = ws_stream.split();
        Ok(Duplex::new(Box::pin(sink), Box::pin(stream)))
    }
}

// ============================================================================
// Tests
// ============================================================================
