//! The connection multiplexer.
//!
//! One [`Multiplexer`] owns at most one WebSocket connection and shares it
//! between any number of listeners. Listeners attach with
//! [`Multiplexer::register`] and detach by dropping (or calling
//! [`Registration::unregister`] on) the returned guard.
//!
//! # Runtime model
//!
//! All state lives behind one mutex and every event (register, unregister,
//! open, message, error, close, timer) runs to completion under it:
//!
//! 1. the event is fed to [`Machine::step`];
//! 2. the returned effects are applied (spawn a link task, send the
//!    handshake, close, start or abort the reconnect timer);
//! 3. effects that fail synchronously (no runtime to spawn on) feed a
//!    follow-up event back into the machine.
//!
//! The mutex is released before listeners run, so a listener may register
//! or unregister from inside its callback. User code never runs under it:
//! the origin source is called from the link task, and removed listeners
//! are dropped after the guard.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::config::endpoint::{Endpoint, OriginSource, env_origin};
use crate::config::{MultiplexerBuilder, MultiplexerOptions};
use crate::error::{Error, Result};
use crate::identifiers::{AttemptId, ListenerId, TimerId};
use crate::protocol::{CloseKind, InboundMessage};
use crate::transport::{Connector, LinkHandle, LinkObserver, WsConnector};

use super::registry::{Listener, ListenerRegistry, Snapshot};
use super::state::{Effect, LinkEvent, LinkState, Machine};

// ============================================================================
// Globals
// ============================================================================

/// Process-wide instance behind [`Multiplexer::global`].
static GLOBAL: OnceLock<Multiplexer> = OnceLock::new();

// ============================================================================
// LinkStatus
// ============================================================================

/// Point-in-time view of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    /// Connection state.
    pub state: LinkState,
    /// Number of registered listeners.
    pub listeners: usize,
    /// Whether a reconnect is scheduled.
    pub reconnect_pending: bool,
    /// How the most recent connection ended.
    pub last_close: Option<CloseKind>,
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Shares one backend connection between many listeners.
///
/// Cloning is cheap; clones share the same connection and registry.
///
/// # Example
///
/// ```no_run
/// use overlay_link::Multiplexer;
///
/// # async fn example() -> overlay_link::Result<()> {
/// let mux = Multiplexer::global();
///
/// let registration = mux.register(|message| {
///     println!("event: {:?}", message.kind());
/// })?;
///
/// // ... later
/// registration.unregister();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

/// Shared state behind a [`Multiplexer`].
struct Inner {
    /// Validated options.
    options: MultiplexerOptions,
    /// Memoized backend endpoint, resolved by the link task.
    endpoint: Arc<Endpoint>,
    /// Opens connections.
    connector: Arc<dyn Connector>,
    /// Everything that changes.
    shared: Mutex<Shared>,
    /// Weak self reference handed to link and timer tasks.
    self_ref: Weak<Inner>,
}

/// Mutable state, guarded by [`Inner::shared`].
struct Shared {
    /// Connection state machine.
    machine: Machine,
    /// Registered listeners.
    registry: ListenerRegistry,
    /// Live connection task, if any.
    link: Option<LinkHandle>,
    /// Pending reconnect timer task.
    reconnect: Option<(TimerId, JoinHandle<()>)>,
    /// Runtime used to spawn link and timer tasks.
    runtime: Option<Handle>,
}

// ============================================================================
// Multiplexer - Constructors
// ============================================================================

impl Multiplexer {
    /// Creates a builder for a custom multiplexer.
    #[inline]
    #[must_use]
    pub fn builder() -> MultiplexerBuilder {
        MultiplexerBuilder::new()
    }

    /// Creates a multiplexer with default options.
    ///
    /// The origin is read from `OVERLAY_ORIGIN` when the first connection
    /// is made.
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(
            MultiplexerOptions::default(),
            Arc::new(env_origin),
            Arc::new(WsConnector),
        )
    }

    /// Returns the process-wide multiplexer, creating it on first use.
    pub fn global() -> &'static Multiplexer {
        GLOBAL.get_or_init(Self::new)
    }

    /// Assembles a multiplexer from validated parts.
    pub(crate) fn from_parts(
        options: MultiplexerOptions,
        origin: OriginSource,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let machine = Machine::new(options.reconnect_delay);
        let endpoint = Arc::new(Endpoint::new(origin, options.endpoint.clone()));

        let inner = Arc::new_cyclic(|self_ref| Inner {
            options,
            endpoint,
            connector,
            shared: Mutex::new(Shared {
                machine,
                registry: ListenerRegistry::new(),
                link: None,
                reconnect: None,
                runtime: None,
            }),
            self_ref: self_ref.clone(),
        });

        Self { inner }
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Multiplexer - Public API
// ============================================================================

impl Multiplexer {
    /// Registers a listener for every inbound message.
    ///
    /// The first registration opens the connection; later ones share it.
    /// The listener stays registered until the returned [`Registration`]
    /// is dropped or [`Registration::unregister`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] if called outside a Tokio runtime. The
    /// registry is left untouched in that case.
    pub fn register<F>(&self, listener: F) -> Result<Registration>
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.register_listener(Arc::new(listener))
    }

    /// Registers a listener that only sees messages whose `type` is `kind`.
    ///
    /// # Errors
    ///
    /// Same as [`Multiplexer::register`].
    pub fn register_for<F>(&self, kind: impl Into<String>, listener: F) -> Result<Registration>
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let kind = kind.into();
        self.register_listener(Arc::new(move |message: &InboundMessage| {
            if message.kind() == Some(kind.as_str()) {
                listener(message);
            }
        }))
    }

    /// Returns a snapshot of the connection state.
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        let shared = self.inner.shared.lock();
        LinkStatus {
            state: shared.machine.state(),
            listeners: shared.registry.len(),
            reconnect_pending: shared.machine.pending_timer().is_some(),
            last_close: shared.machine.last_close(),
        }
    }

    /// Returns the backend endpoint once it has been resolved.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> Option<Url> {
        self.inner.endpoint.resolved().cloned()
    }

    /// Returns the options this multiplexer runs with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &MultiplexerOptions {
        &self.inner.options
    }

    fn register_listener(&self, listener: Listener) -> Result<Registration> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let id = {
            let mut shared = self.inner.shared.lock();
            shared.runtime = Some(runtime);
            let id = shared.registry.insert(listener);
            let listeners = shared.registry.len();
            debug!(listener = %id, listeners, "Listener registered");
            self.inner
                .drive(&mut shared, LinkEvent::ListenerAdded { listeners });
            id
        };

        Ok(Registration {
            id,
            inner: Some(Arc::clone(&self.inner)),
        })
    }
}

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("status", &self.status())
            .field("endpoint", &self.inner.endpoint.resolved())
            .finish()
    }
}

// ============================================================================
// Registration
// ============================================================================

/// A listener's registration.
///
/// Dropping the registration unregisters the listener. When the last
/// listener leaves, the connection is closed and any pending reconnect is
/// cancelled.
#[must_use = "dropping a Registration unregisters the listener immediately"]
pub struct Registration {
    /// Registry key.
    id: ListenerId,
    /// Owning multiplexer; `None` once unregistered.
    inner: Option<Arc<Inner>>,
}

impl Registration {
    /// Returns the listener's ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Returns `true` while the listener is still registered.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.shared.lock().registry.contains(self.id))
    }

    /// Unregisters the listener.
    ///
    /// The registry is updated before this returns; closing the connection
    /// (if this was the last listener) completes in the background.
    pub fn unregister(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.unregister(self.id);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("active", &self.inner.is_some())
            .finish()
    }
}

// ============================================================================
// Inner - Event Processing
// ============================================================================

impl Inner {
    /// Locks the state and processes one event.
    fn dispatch(&self, event: LinkEvent) {
        let mut shared = self.shared.lock();
        self.drive(&mut shared, event);
    }

    /// Removes a listener and processes the resulting event.
    fn unregister(&self, id: ListenerId) {
        // Dropped after the guard: the closure may own registrations whose
        // release locks `shared` again.
        let _removed = {
            let mut shared = self.shared.lock();
            let Some(removed) = shared.registry.remove(id) else {
                return;
            };

            let listeners = shared.registry.len();
            debug!(listener = %id, listeners, "Listener unregistered");
            self.drive(&mut shared, LinkEvent::ListenerRemoved { listeners });
            removed
        };
    }

    /// Runs an event and any follow-up events to completion.
    fn drive(&self, shared: &mut Shared, event: LinkEvent) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            if let LinkEvent::ReconnectDue(timer) = event {
                // The timer task is the caller; it is finished, not cancelled.
                shared.reconnect.take_if(|(pending, _)| *pending == timer);
            }

            let before = shared.machine.state();
            let effects = shared.machine.step(event);
            let after = shared.machine.state();

            if before != after {
                debug!(from = %before, to = %after, "Link state changed");
            }

            for effect in effects {
                if let Some(follow_up) = self.apply(shared, effect) {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    /// Carries out one effect.
    fn apply(&self, shared: &mut Shared, effect: Effect) -> Option<LinkEvent> {
        match effect {
            Effect::Connect(attempt) => return self.connect(shared, attempt),

            Effect::SendHandshake(attempt) => {
                if let Some(link) = shared.link.as_ref().filter(|l| l.attempt() == attempt)
                    && let Err(e) = link.send(self.options.handshake.clone())
                {
                    warn!(%attempt, error = %e, "Failed to queue handshake");
                }
            }

            Effect::Close { attempt, code } => {
                // Cleared unconditionally; the task finishes closing on its own.
                if let Some(link) = shared.link.take() {
                    info!(%attempt, code, "Closing link: no listeners remain");
                    link.close(code);
                }
            }

            Effect::Release(attempt) => {
                shared.link.take_if(|link| link.attempt() == attempt);
            }

            Effect::ScheduleReconnect { timer, delay } => {
                let Some(runtime) = shared.runtime.as_ref() else {
                    error!(%timer, "No runtime available to schedule reconnect");
                    return None;
                };

                warn!(
                    %timer,
                    ?delay,
                    listeners = shared.registry.len(),
                    "Connection lost, reconnect scheduled"
                );

                let weak = self.self_ref.clone();
                let task = runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.dispatch(LinkEvent::ReconnectDue(timer));
                    }
                });

                if let Some((_, stale)) = shared.reconnect.replace((timer, task)) {
                    stale.abort();
                }
            }

            Effect::CancelReconnect(timer) => {
                if let Some((_, task)) = shared.reconnect.take_if(|(pending, _)| *pending == timer) {
                    task.abort();
                    debug!(%timer, "Reconnect cancelled");
                }
            }
        }

        None
    }

    /// Starts the link task for `attempt`.
    ///
    /// Returns an abnormal close for the attempt if it cannot even start,
    /// so the reconnect policy applies. Endpoint resolution failures arrive
    /// the same way, from the task.
    fn connect(&self, shared: &mut Shared, attempt: AttemptId) -> Option<LinkEvent> {
        let Some(runtime) = shared.runtime.clone() else {
            error!(%attempt, "No runtime available to connect");
            return Some(LinkEvent::Closed {
                attempt,
                kind: CloseKind::Abnormal,
            });
        };

        let observer: Weak<dyn LinkObserver> = self.self_ref.clone();
        let link = LinkHandle::spawn(
            &runtime,
            attempt,
            Arc::clone(&self.endpoint),
            Arc::clone(&self.connector),
            observer,
        );

        if let Some(stale) = shared.link.replace(link) {
            warn!(attempt = %stale.attempt(), "Replacing a link that was never released");
            stale.close(crate::protocol::CLEAN_CLOSE_CODE);
        }

        None
    }
}

// ============================================================================
// Inner - Link Observer
// ============================================================================

impl LinkObserver for Inner {
    fn on_open(&self, attempt: AttemptId) {
        self.dispatch(LinkEvent::Opened(attempt));
    }

    fn on_message(&self, attempt: AttemptId, message: InboundMessage) {
        let snapshot = {
            let shared = self.shared.lock();
            if !shared.machine.is_current(attempt) {
                trace!(%attempt, "Dropping message from superseded link");
                return;
            }
            shared.registry.snapshot()
        };

        fan_out(&snapshot, &message);
    }

    fn on_error(&self, attempt: AttemptId, error: &Error) {
        debug!(%attempt, error = %error, "Transport error recorded");
        self.dispatch(LinkEvent::TransportError(attempt));
    }

    fn on_close(&self, attempt: AttemptId, kind: CloseKind) {
        debug!(%attempt, %kind, "Link closed");
        self.dispatch(LinkEvent::Closed { attempt, kind });
    }
}

// ============================================================================
// Fan-out
// ============================================================================

/// Invokes every listener in `snapshot`, isolating panics.
///
/// Returns the number of listeners that panicked.
pub fn fan_out(snapshot: &Snapshot, message: &InboundMessage) -> usize {
    trace!(kind = ?message.kind(), listeners = snapshot.len(), "Fan-out");

    let mut panicked = 0;
    for (id, listener) in snapshot {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(message))) {
            panicked += 1;
            error!(
                listener = %id,
                kind = ?message.kind(),
                panic = panic_message(payload.as_ref()),
                "Listener panicked, continuing fan-out"
            );
        }
    }
    panicked
}

/// Extracts a printable message from a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

// ============================================================================
// Tests
// ============================================================================
