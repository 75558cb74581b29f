//! Per-attempt connection task.
//!
//! Every connection attempt gets its own spawned task that owns the socket
//! for the attempt's whole life. The multiplexer only keeps a
//! [`LinkHandle`], a command channel into that task.
//!
//! # Event Loop
//!
//! The task handles:
//!
//! - Resolving the endpoint (the origin source runs here, never under the
//!   multiplexer's lock)
//! - Connecting (abandoned if the handle is closed or dropped meanwhile)
//! - Decoding inbound frames (undecodable frames are dropped)
//! - Outbound commands (handshake, clean close)
//! - Classifying how the connection ended
//!
//! Everything it learns is reported to a [`LinkObserver`] tagged with the
//! attempt's [`AttemptId`], so reports from a superseded attempt can be
//! recognized and ignored.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, info, trace, warn};

use crate::config::Endpoint;
use crate::error::{Error, Result};
use crate::identifiers::AttemptId;
use crate::protocol::{CLEAN_CLOSE_REASON, CloseKind, InboundMessage};

use super::connector::{Connector, Duplex, FrameSink};

// ============================================================================
// LinkObserver
// ============================================================================

/// Receives everything a link task learns about its connection.
///
/// Calls are made from the link task; implementations must not block.
pub trait LinkObserver: Send + Sync {
    /// The connection is open.
    fn on_open(&self, attempt: AttemptId);

    /// A frame was decoded.
    fn on_message(&self, attempt: AttemptId, message: InboundMessage);

    /// A transport-level error occurred. A close report always follows.
    fn on_error(&self, attempt: AttemptId, error: &Error);

    /// The connection ended (or never opened).
    fn on_close(&self, attempt: AttemptId, kind: CloseKind);
}

// ============================================================================
// LinkCommand
// ============================================================================

/// Commands for the link task.
#[derive(Debug)]
enum LinkCommand {
    /// Send a text frame.
    Send(String),
    /// Close the connection with the given code.
    Close(u16),
}

// ============================================================================
// LinkHandle
// ============================================================================

/// Handle to a running link task.
///
/// Dropping the handle closes the connection the same way [`LinkHandle::close`]
/// does, with the clean close code.
#[derive(Debug)]
pub struct LinkHandle {
    /// Attempt this task serves.
    attempt: AttemptId,
    /// Channel into the task.
    command_tx: mpsc::UnboundedSender<LinkCommand>,
}

impl LinkHandle {
    /// Spawns a link task that resolves `endpoint` and connects to it.
    pub fn spawn(
        runtime: &Handle,
        attempt: AttemptId,
        endpoint: Arc<Endpoint>,
        connector: Arc<dyn Connector>,
        observer: Weak<dyn LinkObserver>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        runtime.spawn(run_link(attempt, endpoint, connector, command_rx, observer));

        Self {
            attempt,
            command_tx,
        }
    }

    /// Returns the attempt this handle belongs to.
    #[inline]
    #[must_use]
    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the task has already ended.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        self.command_tx
            .send(LinkCommand::Send(text.into()))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Asks the task to close with `code` and releases the handle.
    pub fn close(self, code: u16) {
        if self.command_tx.send(LinkCommand::Close(code)).is_err() {
            trace!(attempt = %self.attempt, "Link task already finished");
        }
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Body of a link task.
async fn run_link(
    attempt: AttemptId,
    endpoint: Arc<Endpoint>,
    connector: Arc<dyn Connector>,
    mut command_rx: mpsc::UnboundedReceiver<LinkCommand>,
    observer: Weak<dyn LinkObserver>,
) {
    let endpoint = match endpoint.resolve() {
        Ok(url) => url,
        Err(e) => {
            error!(%attempt, error = %e, "Cannot resolve backend endpoint");
            notify(&observer, |o| o.on_error(attempt, &e));
            notify(&observer, |o| o.on_close(attempt, CloseKind::Abnormal));
            return;
        }
    };

    debug!(%attempt, %endpoint, "Connecting");

    let connected = tokio::select! {
        result = connector.connect(&endpoint) => result,
        _ = command_rx.recv() => {
            // Only a close or a dropped handle can arrive before the open report.
            debug!(%attempt, "Connection attempt abandoned");
            return;
        }
    };

    let Duplex {
        mut sink,
        mut stream,
    } = match connected {
        Ok(duplex) => duplex,
        Err(e) => {
            warn!(%attempt, %endpoint, error = %e, "Connection attempt failed");
            notify(&observer, |o| o.on_error(attempt, &e));
            notify(&observer, |o| o.on_close(attempt, CloseKind::Abnormal));
            return;
        }
    };

    info!(%attempt, %endpoint, "Link open");
    notify(&observer, |o| o.on_open(attempt));

    let kind = loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        deliver(&observer, attempt, InboundMessage::decode(text.as_str()));
                    }

                    Some(Ok(Message::Binary(bytes))) => {
                        deliver(&observer, attempt, InboundMessage::decode_bytes(&bytes));
                    }

                    Some(Ok(Message::Close(frame))) => {
                        info!(%attempt, ?frame, "Link closed by remote");
                        break CloseKind::Abnormal;
                    }

                    Some(Err(e)) => {
                        let e = Error::from(e);
                        warn!(%attempt, error = %e, "WebSocket error");
                        notify(&observer, |o| o.on_error(attempt, &e));
                        break CloseKind::Abnormal;
                    }

                    None => {
                        debug!(%attempt, "WebSocket stream ended");
                        break CloseKind::Abnormal;
                    }

                    // Ping, Pong, raw frames
                    Some(Ok(_)) => {}
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(LinkCommand::Send(text)) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            let e = Error::from(e);
                            warn!(%attempt, error = %e, "Failed to send frame");
                            notify(&observer, |o| o.on_error(attempt, &e));
                            break CloseKind::Abnormal;
                        }
                        trace!(%attempt, "Frame sent");
                    }

                    Some(LinkCommand::Close(code)) => {
                        send_close(&mut sink, attempt, code).await;
                        break CloseKind::Clean;
                    }

                    None => {
                        send_close(&mut sink, attempt, crate::protocol::CLEAN_CLOSE_CODE).await;
                        break CloseKind::Clean;
                    }
                }
            }
        }
    };

    notify(&observer, |o| o.on_close(attempt, kind));

    debug!(%attempt, %kind, "Link task terminated");
}

/// Sends a close frame; failures only matter for logging.
async fn send_close(sink: &mut FrameSink, attempt: AttemptId, code: u16) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: Utf8Bytes::from_static(CLEAN_CLOSE_REASON),
    };

    match sink.send(Message::Close(Some(frame))).await {
        Ok(()) => debug!(%attempt, code, "Close frame sent"),
        Err(e) => debug!(%attempt, error = %e, "Failed to send close frame"),
    }
}

/// Hands a decoded frame to the observer, dropping frames that failed to decode.
fn deliver(observer: &Weak<dyn LinkObserver>, attempt: AttemptId, decoded: Result<InboundMessage>) {
    match decoded {
        Ok(message) => notify(observer, |o| o.on_message(attempt, message)),
        Err(e) => warn!(%attempt, error = %e, "Dropping undecodable frame"),
    }
}

/// Calls `f` if the observer is still alive.
fn notify(observer: &Weak<dyn LinkObserver>, f: impl FnOnce(&dyn LinkObserver)) {
    if let Some(observer) = observer.upgrade() {
        f(observer.as_ref());
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::net::TcpListener;
    use tokio::sync::Notify;
    use url::Url;

    use crate::config::{EndpointRules, OriginSource};
    use crate::transport::WsConnector;

    /// What the observer saw, in order.
    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Open,
        Message(Option<String>),
        Error,
        Close(CloseKind),
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Seen>>,
        closed: Notify,
    }

    impl Recorder {
        fn seen(&self) -> Vec<Seen> {
            self.seen.lock().clone()
        }
    }

    impl LinkObserver for Recorder {
        fn on_open(&self, _attempt: AttemptId) {
            self.seen.lock().push(Seen::Open);
        }

        fn on_message(&self, _attempt: AttemptId, message: InboundMessage) {
            self.seen
                .lock()
                .push(Seen::Message(message.kind().map(str::to_string)));
        }

        fn on_error(&self, _attempt: AttemptId, _error: &Error) {
            self.seen.lock().push(Seen::Error);
        }

        fn on_close(&self, _attempt: AttemptId, kind: CloseKind) {
            self.seen.lock().push(Seen::Close(kind));
            self.closed.notify_one();
        }
    }

    async fn wait_closed(recorder: &Recorder) {
        tokio::time::timeout(Duration::from_secs(5), recorder.closed.notified())
            .await
            .expect("link should close");
    }

    fn spawn_with_endpoint(endpoint: Endpoint, recorder: &Arc<Recorder>) -> LinkHandle {
        let observer: Arc<dyn LinkObserver> = recorder.clone();
        LinkHandle::spawn(
            &Handle::current(),
            AttemptId::new(1),
            Arc::new(endpoint),
            Arc::new(WsConnector),
            Arc::downgrade(&observer),
        )
    }

    fn spawn_link(port: u16, recorder: &Arc<Recorder>) -> LinkHandle {
        let origin: OriginSource =
            Arc::new(move || Ok(Url::parse(&format!("http://127.0.0.1:{port}"))?));
        spawn_with_endpoint(Endpoint::new(origin, EndpointRules::default()), recorder)
    }

    #[tokio::test]
    async fn test_unresolvable_endpoint_reports_abnormal_close() {
        let origin: OriginSource = Arc::new(|| Ok(Url::parse("file:///tmp/console.html")?));
        let recorder = Arc::new(Recorder::default());
        let _handle = spawn_with_endpoint(Endpoint::new(origin, EndpointRules::default()), &recorder);

        wait_closed(&recorder).await;
        assert_eq!(
            recorder.seen(),
            vec![Seen::Error, Seen::Close(CloseKind::Abnormal)]
        );
    }

    #[tokio::test]
    async fn test_failed_connect_reports_abnormal_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let recorder = Arc::new(Recorder::default());
        let _handle = spawn_link(port, &recorder);

        wait_closed(&recorder).await;
        assert_eq!(
            recorder.seen(),
            vec![Seen::Error, Seen::Close(CloseKind::Abnormal)]
        );
    }

    #[tokio::test]
    async fn test_frames_are_decoded_and_bad_frames_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            ws.send(Message::Text(r#"{"type":"a"}"#.into())).await.expect("send");
            ws.send(Message::Text("not json".into())).await.expect("send");
            ws.send(Message::Text(r#"{"type":"b"}"#.into())).await.expect("send");
            ws.close(None).await.expect("close");
        });

        let recorder = Arc::new(Recorder::default());
        let _handle = spawn_link(port, &recorder);

        wait_closed(&recorder).await;
        assert_eq!(
            recorder.seen(),
            vec![
                Seen::Open,
                Seen::Message(Some("a".into())),
                Seen::Message(Some("b".into())),
                Seen::Close(CloseKind::Abnormal),
            ]
        );
    }

    #[tokio::test]
    async fn test_close_command_sends_clean_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            let mut close_code = None;
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Close(Some(frame)) = message {
                    close_code = Some(u16::from(frame.code));
                    break;
                }
            }
            close_code
        });

        let recorder = Arc::new(Recorder::default());
        let handle = spawn_link(port, &recorder);

        // Wait for the open report before closing.
        for _ in 0..100 {
            if recorder.seen().contains(&Seen::Open) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        handle.close(crate::protocol::CLEAN_CLOSE_CODE);
        wait_closed(&recorder).await;

        assert_eq!(recorder.seen().last(), Some(&Seen::Close(CloseKind::Clean)));
        assert_eq!(server.await.expect("server"), Some(1000));
    }
}
