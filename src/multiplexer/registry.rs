//! Listener registry.
//!
//! Fan-out always iterates a snapshot taken once per message, never the live
//! map, so listeners may register or unregister from inside a callback.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::identifiers::ListenerId;
use crate::protocol::InboundMessage;

// ============================================================================
// Types
// ============================================================================

/// Callback invoked for every inbound message.
pub type Listener = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Listeners captured for one message's fan-out.
pub type Snapshot = Vec<(ListenerId, Listener)>;

// ============================================================================
// ListenerRegistry
// ============================================================================

/// Set of registered listeners keyed by registration.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: FxHashMap<ListenerId, Listener>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener under a fresh ID and returns that ID.
    pub fn insert(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.insert(id, listener);
        id
    }

    /// Removes a listener and hands it back.
    ///
    /// The caller decides where the listener is dropped. Its captures may
    /// own other registrations, so it must not be dropped under a lock that
    /// their release needs.
    pub fn remove(&mut self, id: ListenerId) -> Option<Listener> {
        self.listeners.remove(&id)
    }

    /// Returns `true` if `id` is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ListenerId) -> bool {
        self.listeners.contains_key(&id)
    }

    /// Returns the number of registered listeners.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns `true` if no listeners are registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Copies the current listeners for a fan-out.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.listeners
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.listeners.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop() -> Listener {
        Arc::new(|_: &InboundMessage| {})
    }

    #[test]
    fn test_insert_and_remove() {
        let mut registry = ListenerRegistry::new();
        assert!(registry.is_empty());

        let id = registry.insert(noop());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(id));

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_same_callback_registers_twice() {
        let mut registry = ListenerRegistry::new();
        let listener = noop();

        let a = registry.insert(Arc::clone(&listener));
        let b = registry.insert(listener);

        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        registry.remove(a);
        assert!(registry.contains(b));
    }

    #[test]
    fn test_snapshot_is_detached_from_registry() {
        let mut registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let id = registry.insert(Arc::new(move |_: &InboundMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let snapshot = registry.snapshot();
        registry.remove(id);
        registry.insert(noop());

        let message = InboundMessage::decode(r#"{"type":"x"}"#).expect("decode");
        for (_, listener) in &snapshot {
            listener(&message);
        }

        assert_eq!(snapshot.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
