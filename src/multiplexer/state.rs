//! Connection state machine.
//!
//! The lifecycle of the shared connection as an explicit state machine.
//! [`Machine::step`] is a pure transition function: it consumes one
//! [`LinkEvent`], updates the state, and returns the [`Effect`]s the
//! runtime must carry out. No I/O happens here, which is what lets the
//! "one connection, one timer" invariants be tested exhaustively.
//!
//! # States
//!
//! ```text
//!                 first listener
//!   ┌────────┐ ─────────────────► ┌────────────┐   opened    ┌──────┐
//!   │ Absent │                    │ Connecting │ ──────────► │ Open │
//!   └────────┘ ◄───────────────── └────────────┘             └──────┘
//!       ▲  ▲     last listener / closed           │
//!       │  └──────────────────────────────────────┘ closed (clean | abnormal)
//!       │
//!       └── abnormal close with listeners: reconnect timer → Connecting
//! ```
//!
//! Closing, closed-clean and closed-abnormal are transient: the handle is
//! released immediately and the machine is back in [`LinkState::Absent`].
//! Events that carry an [`AttemptId`] or [`TimerId`] that is no longer
//! current are ignored.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use crate::identifiers::{AttemptId, TimerId};
use crate::protocol::{CLEAN_CLOSE_CODE, CloseKind};

// ============================================================================
// LinkState
// ============================================================================

/// State of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection object exists.
    Absent,
    /// A connection attempt is in flight.
    Connecting(AttemptId),
    /// The connection is open.
    Open(AttemptId),
}

impl LinkState {
    /// Returns the current attempt, if any.
    #[inline]
    #[must_use]
    pub const fn attempt(&self) -> Option<AttemptId> {
        match self {
            Self::Absent => None,
            Self::Connecting(attempt) | Self::Open(attempt) => Some(*attempt),
        }
    }

    /// Returns `true` if no connection object exists.
    #[inline]
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Returns `true` if the connection is open.
    #[inline]
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::Connecting(attempt) => write!(f, "connecting ({attempt})"),
            Self::Open(attempt) => write!(f, "open ({attempt})"),
        }
    }
}

// ============================================================================
// LinkEvent
// ============================================================================

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A listener was added; `listeners` is the registry size afterwards.
    ListenerAdded {
        /// Registry size after the insert.
        listeners: usize,
    },
    /// A listener was removed; `listeners` is the registry size afterwards.
    ListenerRemoved {
        /// Registry size after the removal.
        listeners: usize,
    },
    /// The attempt's connection opened.
    Opened(AttemptId),
    /// The attempt's connection reported a transport error.
    TransportError(AttemptId),
    /// The attempt's connection ended.
    Closed {
        /// Attempt that ended.
        attempt: AttemptId,
        /// How it ended.
        kind: CloseKind,
    },
    /// A reconnect timer elapsed.
    ReconnectDue(TimerId),
}

// ============================================================================
// Effect
// ============================================================================

/// Work the runtime must carry out after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Resolve the endpoint and start a connection for this attempt.
    Connect(AttemptId),
    /// Send the handshake payload on this attempt's connection.
    SendHandshake(AttemptId),
    /// Close this attempt's connection with `code` and release its handle.
    Close {
        /// Attempt to close.
        attempt: AttemptId,
        /// Close code to send.
        code: u16,
    },
    /// Release this attempt's handle; the connection is already gone.
    Release(AttemptId),
    /// Start a reconnect timer.
    ScheduleReconnect {
        /// Identifies the timer.
        timer: TimerId,
        /// Delay before [`LinkEvent::ReconnectDue`] fires.
        delay: Duration,
    },
    /// Cancel a pending reconnect timer.
    CancelReconnect(TimerId),
}

// ============================================================================
// Machine
// ============================================================================

/// The connection state machine.
#[derive(Debug, Clone)]
pub struct Machine {
    /// Connection state.
    state: LinkState,
    /// Registry size as last reported.
    listeners: usize,
    /// Pending reconnect timer.
    pending_timer: Option<TimerId>,
    /// How the most recent connection ended.
    last_close: Option<CloseKind>,
    /// Backoff used for reconnect timers.
    reconnect_delay: Duration,
    /// Next attempt ID.
    next_attempt: u64,
    /// Next timer ID.
    next_timer: u64,
}

impl Machine {
    /// Creates a machine in [`LinkState::Absent`] with no listeners.
    #[must_use]
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            state: LinkState::Absent,
            listeners: 0,
            pending_timer: None,
            last_close: None,
            reconnect_delay,
            next_attempt: 1,
            next_timer: 1,
        }
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Returns the registry size as last reported.
    #[inline]
    #[must_use]
    pub fn listeners(&self) -> usize {
        self.listeners
    }

    /// Returns the pending reconnect timer, if any.
    #[inline]
    #[must_use]
    pub fn pending_timer(&self) -> Option<TimerId> {
        self.pending_timer
    }

    /// Returns how the most recent connection ended.
    #[inline]
    #[must_use]
    pub fn last_close(&self) -> Option<CloseKind> {
        self.last_close
    }

    /// Returns `true` if `attempt` is the live attempt.
    #[inline]
    #[must_use]
    pub fn is_current(&self, attempt: AttemptId) -> bool {
        self.state.attempt() == Some(attempt)
    }

    /// Applies one event and returns the resulting effects.
    pub fn step(&mut self, event: LinkEvent) -> Vec<Effect> {
        let mut effects = Vec::new();

        match event {
            LinkEvent::ListenerAdded { listeners } => {
                self.listeners = listeners;
                if listeners == 1 && self.state.is_absent() {
                    self.start_attempt(&mut effects);
                }
            }

            LinkEvent::ListenerRemoved { listeners } => {
                self.listeners = listeners;
                if listeners == 0 {
                    self.teardown(&mut effects);
                }
            }

            LinkEvent::Opened(attempt) => {
                if self.state == LinkState::Connecting(attempt) {
                    self.state = LinkState::Open(attempt);
                    effects.push(Effect::SendHandshake(attempt));
                    self.cancel_timer(&mut effects);
                }
            }

            // Reconnects are driven by the close that follows.
            LinkEvent::TransportError(_) => {}

            LinkEvent::Closed { attempt, kind } => {
                if self.is_current(attempt) {
                    self.state = LinkState::Absent;
                    self.last_close = Some(kind);
                    effects.push(Effect::Release(attempt));

                    if kind.is_abnormal() && self.listeners > 0 && self.pending_timer.is_none() {
                        let timer = TimerId::new(self.next_timer);
                        self.next_timer += 1;
                        self.pending_timer = Some(timer);
                        effects.push(Effect::ScheduleReconnect {
                            timer,
                            delay: self.reconnect_delay,
                        });
                    }
                }
            }

            LinkEvent::ReconnectDue(timer) => {
                if self.pending_timer == Some(timer) {
                    self.pending_timer = None;
                    if self.state.is_absent() {
                        self.start_attempt(&mut effects);
                    }
                }
            }
        }

        effects
    }

    /// Starts a new attempt unless the registry is empty.
    fn start_attempt(&mut self, effects: &mut Vec<Effect>) {
        if self.listeners == 0 {
            return;
        }

        self.cancel_timer(effects);

        let attempt = AttemptId::new(self.next_attempt);
        self.next_attempt += 1;
        self.state = LinkState::Connecting(attempt);
        effects.push(Effect::Connect(attempt));
    }

    /// Releases everything once the registry is empty.
    fn teardown(&mut self, effects: &mut Vec<Effect>) {
        self.cancel_timer(effects);

        if let Some(attempt) = self.state.attempt() {
            effects.push(Effect::Close {
                attempt,
                code: CLEAN_CLOSE_CODE,
            });
            self.last_close = Some(CloseKind::Clean);
        }

        self.state = LinkState::Absent;
    }

    /// Cancels the pending timer, if any.
    fn cancel_timer(&mut self, effects: &mut Vec<Effect>) {
        if let Some(timer) = self.pending_timer.take() {
            effects.push(Effect::CancelReconnect(timer));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    const DELAY: Duration = Duration::from_secs(3);

    fn connects(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, Effect::Connect(_)))
            .count()
    }

    /// Registers one listener and opens the resulting attempt.
    fn open_with_one_listener() -> (Machine, AttemptId) {
        let mut machine = Machine::new(DELAY);
        let effects = machine.step(LinkEvent::ListenerAdded { listeners: 1 });
        let Some(Effect::Connect(attempt)) = effects.first().copied() else {
            panic!("expected a connect effect, got {effects:?}");
        };
        machine.step(LinkEvent::Opened(attempt));
        (machine, attempt)
    }

    #[test]
    fn test_initial_state() {
        let machine = Machine::new(DELAY);
        assert_eq!(machine.state(), LinkState::Absent);
        assert_eq!(machine.listeners(), 0);
        assert!(machine.pending_timer().is_none());
        assert!(machine.last_close().is_none());
    }

    #[test]
    fn test_first_listener_connects_once() {
        let mut machine = Machine::new(DELAY);

        let effects = machine.step(LinkEvent::ListenerAdded { listeners: 1 });
        assert_eq!(connects(&effects), 1);
        assert!(matches!(machine.state(), LinkState::Connecting(_)));

        let effects = machine.step(LinkEvent::ListenerAdded { listeners: 2 });
        assert!(effects.is_empty());
    }

    #[test]
    fn test_second_listener_while_open_does_not_connect() {
        let (mut machine, attempt) = open_with_one_listener();
        assert_eq!(machine.state(), LinkState::Open(attempt));

        let effects = machine.step(LinkEvent::ListenerAdded { listeners: 2 });
        assert!(effects.is_empty());
    }

    #[test]
    fn test_open_sends_handshake() {
        let mut machine = Machine::new(DELAY);
        machine.step(LinkEvent::ListenerAdded { listeners: 1 });
        let attempt = machine.state().attempt().expect("attempt");

        let effects = machine.step(LinkEvent::Opened(attempt));
        assert_eq!(effects, vec![Effect::SendHandshake(attempt)]);
        assert!(machine.state().is_open());
    }

    #[test]
    fn test_last_listener_closes_cleanly() {
        let (mut machine, attempt) = open_with_one_listener();

        let effects = machine.step(LinkEvent::ListenerRemoved { listeners: 0 });
        assert_eq!(
            effects,
            vec![Effect::Close {
                attempt,
                code: CLEAN_CLOSE_CODE
            }]
        );
        assert_eq!(machine.state(), LinkState::Absent);

        // The close report of the released attempt changes nothing.
        let effects = machine.step(LinkEvent::Closed {
            attempt,
            kind: CloseKind::Clean,
        });
        assert!(effects.is_empty());
        assert!(machine.pending_timer().is_none());
    }

    #[test]
    fn test_last_listener_while_connecting_closes() {
        let mut machine = Machine::new(DELAY);
        machine.step(LinkEvent::ListenerAdded { listeners: 1 });
        let attempt = machine.state().attempt().expect("attempt");

        let effects = machine.step(LinkEvent::ListenerRemoved { listeners: 0 });
        assert!(effects.contains(&Effect::Close {
            attempt,
            code: CLEAN_CLOSE_CODE
        }));

        // A late open of the abandoned attempt is ignored.
        assert!(machine.step(LinkEvent::Opened(attempt)).is_empty());
        assert_eq!(machine.state(), LinkState::Absent);
    }

    #[test]
    fn test_register_after_teardown_connects_fresh() {
        let (mut machine, first) = open_with_one_listener();
        machine.step(LinkEvent::ListenerRemoved { listeners: 0 });

        let effects = machine.step(LinkEvent::ListenerAdded { listeners: 1 });
        let Some(Effect::Connect(second)) = effects.first().copied() else {
            panic!("expected connect, got {effects:?}");
        };
        assert_ne!(first, second);
    }

    #[test]
    fn test_abnormal_close_schedules_reconnect() {
        let (mut machine, attempt) = open_with_one_listener();

        let effects = machine.step(LinkEvent::Closed {
            attempt,
            kind: CloseKind::Abnormal,
        });

        let timer = machine.pending_timer().expect("timer pending");
        assert_eq!(
            effects,
            vec![
                Effect::Release(attempt),
                Effect::ScheduleReconnect {
                    timer,
                    delay: DELAY
                },
            ]
        );
        assert_eq!(machine.state(), LinkState::Absent);

        let effects = machine.step(LinkEvent::ReconnectDue(timer));
        assert_eq!(connects(&effects), 1);
        assert!(matches!(machine.state(), LinkState::Connecting(next) if next != attempt));
        assert!(machine.pending_timer().is_none());
    }

    #[test]
    fn test_clean_close_does_not_reconnect() {
        let (mut machine, attempt) = open_with_one_listener();

        let effects = machine.step(LinkEvent::Closed {
            attempt,
            kind: CloseKind::Clean,
        });
        assert_eq!(effects, vec![Effect::Release(attempt)]);
        assert!(machine.pending_timer().is_none());
    }

    #[test]
    fn test_unregister_during_backoff_cancels_timer() {
        let (mut machine, attempt) = open_with_one_listener();
        machine.step(LinkEvent::Closed {
            attempt,
            kind: CloseKind::Abnormal,
        });
        let timer = machine.pending_timer().expect("timer pending");

        let effects = machine.step(LinkEvent::ListenerRemoved { listeners: 0 });
        assert_eq!(effects, vec![Effect::CancelReconnect(timer)]);

        // Even if the timer fires anyway, nothing connects.
        assert!(machine.step(LinkEvent::ReconnectDue(timer)).is_empty());
        assert_eq!(machine.state(), LinkState::Absent);
    }

    #[test]
    fn test_duplicate_close_schedules_one_timer() {
        let (mut machine, attempt) = open_with_one_listener();

        machine.step(LinkEvent::TransportError(attempt));
        let first = machine.step(LinkEvent::Closed {
            attempt,
            kind: CloseKind::Abnormal,
        });
        let second = machine.step(LinkEvent::Closed {
            attempt,
            kind: CloseKind::Abnormal,
        });

        let scheduled = first
            .iter()
            .chain(second.iter())
            .filter(|e| matches!(e, Effect::ScheduleReconnect { .. }))
            .count();
        assert_eq!(scheduled, 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_transport_error_alone_does_nothing() {
        let (mut machine, attempt) = open_with_one_listener();
        assert!(machine.step(LinkEvent::TransportError(attempt)).is_empty());
        assert_eq!(machine.state(), LinkState::Open(attempt));
    }

    #[test]
    fn test_failed_connect_reconnects() {
        let mut machine = Machine::new(DELAY);
        machine.step(LinkEvent::ListenerAdded { listeners: 1 });
        let attempt = machine.state().attempt().expect("attempt");

        let effects = machine.step(LinkEvent::Closed {
            attempt,
            kind: CloseKind::Abnormal,
        });
        assert!(
            effects
                .iter()
                .any(|e| matches!(e, Effect::ScheduleReconnect { .. }))
        );
    }

    #[test]
    fn test_listener_added_during_backoff_waits_for_timer() {
        let (mut machine, attempt) = open_with_one_listener();
        machine.step(LinkEvent::ListenerAdded { listeners: 2 });
        machine.step(LinkEvent::Closed {
            attempt,
            kind: CloseKind::Abnormal,
        });

        let effects = machine.step(LinkEvent::ListenerAdded { listeners: 3 });
        assert!(effects.is_empty());
        assert!(machine.pending_timer().is_some());
    }

    #[test]
    fn test_example_scenario() {
        let mut machine = Machine::new(DELAY);

        // A registers; the connection opens.
        let effects = machine.step(LinkEvent::ListenerAdded { listeners: 1 });
        assert_eq!(connects(&effects), 1);
        let attempt = machine.state().attempt().expect("attempt");
        machine.step(LinkEvent::Opened(attempt));

        // B registers; no second attempt.
        assert!(machine.step(LinkEvent::ListenerAdded { listeners: 2 }).is_empty());

        // A leaves; connection stays.
        assert!(machine.step(LinkEvent::ListenerRemoved { listeners: 1 }).is_empty());
        assert!(machine.state().is_open());

        // B leaves; clean close, no reconnect.
        let effects = machine.step(LinkEvent::ListenerRemoved { listeners: 0 });
        assert!(matches!(effects.as_slice(), [Effect::Close { code: 1000, .. }]));
        assert!(machine.pending_timer().is_none());

        // C registers; fresh attempt.
        let effects = machine.step(LinkEvent::ListenerAdded { listeners: 1 });
        assert_eq!(connects(&effects), 1);
    }

    // ------------------------------------------------------------------------
    // Invariants over arbitrary event sequences
    // ------------------------------------------------------------------------

    /// Abstract inputs; IDs are filled in from the machine's current view.
    #[derive(Debug, Clone)]
    enum Input {
        Add,
        Remove,
        Open { stale: bool },
        Error,
        Close { clean: bool, stale: bool },
        Fire { stale: bool },
    }

    fn input() -> impl Strategy<Value = Input> {
        prop_oneof![
            Just(Input::Add),
            Just(Input::Remove),
            any::<bool>().prop_map(|stale| Input::Open { stale }),
            Just(Input::Error),
            (any::<bool>(), any::<bool>()).prop_map(|(clean, stale)| Input::Close { clean, stale }),
            any::<bool>().prop_map(|stale| Input::Fire { stale }),
        ]
    }

    proptest! {
        #[test]
        fn prop_invariants_hold(inputs in proptest::collection::vec(input(), 1..64)) {
            let mut machine = Machine::new(DELAY);
            let mut listeners = 0usize;
            let mut live_attempts = 0usize;
            let mut live_timers = 0usize;
            let stale_attempt = AttemptId::new(u64::MAX);
            let stale_timer = TimerId::new(u64::MAX);

            for input in inputs {
                let current = machine.state().attempt().unwrap_or(stale_attempt);
                let event = match input {
                    Input::Add => {
                        listeners += 1;
                        LinkEvent::ListenerAdded { listeners }
                    }
                    Input::Remove => {
                        listeners = listeners.saturating_sub(1);
                        LinkEvent::ListenerRemoved { listeners }
                    }
                    Input::Open { stale } => {
                        LinkEvent::Opened(if stale { stale_attempt } else { current })
                    }
                    Input::Error => LinkEvent::TransportError(current),
                    Input::Close { clean, stale } => LinkEvent::Closed {
                        attempt: if stale { stale_attempt } else { current },
                        kind: if clean { CloseKind::Clean } else { CloseKind::Abnormal },
                    },
                    Input::Fire { stale } => LinkEvent::ReconnectDue(if stale {
                        stale_timer
                    } else {
                        machine.pending_timer().unwrap_or(stale_timer)
                    }),
                };

                for effect in machine.step(event) {
                    match effect {
                        Effect::Connect(_) => live_attempts += 1,
                        Effect::Close { .. } | Effect::Release(_) => live_attempts -= 1,
                        Effect::ScheduleReconnect { .. } => live_timers += 1,
                        Effect::CancelReconnect(_) => live_timers -= 1,
                        Effect::SendHandshake(_) => {}
                    }
                }
                if matches!(event, LinkEvent::ReconnectDue(t) if t != stale_timer) {
                    // A fired timer is spent whether or not it connected.
                    live_timers = usize::from(machine.pending_timer().is_some());
                }

                // I1: a connection exists only while listeners exist.
                prop_assert!(machine.state().is_absent() || machine.listeners() > 0);
                // I2: at most one connection and one timer.
                prop_assert!(live_attempts <= 1);
                prop_assert!(live_timers <= 1);
                prop_assert_eq!(live_attempts, usize::from(!machine.state().is_absent()));
                // A pending timer only exists while waiting to reconnect.
                if machine.pending_timer().is_some() {
                    prop_assert!(machine.state().is_absent());
                    prop_assert!(machine.listeners() > 0);
                }
                // I4: no listeners means nothing survives.
                if machine.listeners() == 0 {
                    prop_assert!(machine.state().is_absent());
                    prop_assert!(machine.pending_timer().is_none());
                }
            }
        }
    }
}
