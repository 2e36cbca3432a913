//! Connection-status observers.
//!
//! Registration hands back a [`ListenerHandle`] carrying a stable id; removal
//! goes through that id, never through closure identity. Notification order
//! is registration order and duplicates are allowed.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, error};

pub type Listener = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    entries: Vec<(ListenerId, Listener)>,
}

impl ListenerRegistry {
    pub fn add(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        before != self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Listeners in notification order, cloned so they can run unlocked.
    pub fn snapshot(&self) -> Vec<Listener> {
        self.entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}

pub(crate) type SharedRegistry = Arc<Mutex<ListenerRegistry>>;

/// Returned by `on_connection_change`; call [`unsubscribe`](Self::unsubscribe)
/// to stop receiving notifications.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    id: ListenerId,
    registry: Weak<Mutex<ListenerRegistry>>,
}

impl ListenerHandle {
    pub(crate) fn new(id: ListenerId, registry: &SharedRegistry) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(self.id),
            None => false,
        }
    }
}

/// Calls each listener in order; a panicking listener does not stop the rest.
pub fn notify_all(listeners: &[Listener], connected: bool) {
    debug!("Notifying {} listener(s): connected={}", listeners.len(), connected);
    for listener in listeners {
        if panic::catch_unwind(AssertUnwindSafe(|| listener(connected))).is_err() {
            error!("Connection listener panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifies_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::default();
        for tag in ["a", "b", "c"] {
            let order = order.clone();
            registry.add(Arc::new(move |connected: bool| {
                order.lock().unwrap().push((tag, connected));
            }));
        }

        notify_all(&registry.snapshot(), true);

        assert_eq!(
            *order.lock().unwrap(),
            vec![("a", true), ("b", true), ("c", true)]
        );
    }

    #[test]
    fn handles_remove_only_their_own_entry() {
        let registry: SharedRegistry = Arc::new(Mutex::new(ListenerRegistry::default()));
        let listener: Listener = Arc::new(|_: bool| {});
        let first = {
            let mut guard = registry.lock().unwrap();
            ListenerHandle::new(guard.add(listener.clone()), &registry)
        };
        let second = {
            let mut guard = registry.lock().unwrap();
            ListenerHandle::new(guard.add(listener), &registry)
        };
        assert_ne!(first.id(), second.id());

        assert!(first.unsubscribe());
        assert!(!first.unsubscribe());
        assert_eq!(registry.lock().unwrap().len(), 1);
        assert!(second.unsubscribe());
        assert!(registry.lock().unwrap().is_empty());

        drop(registry);
        assert!(!first.unsubscribe());
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        let listeners: Vec<Listener> = vec![
            Arc::new(|_: bool| panic!("listener bug")),
            Arc::new(move |_: bool| *counter.lock().unwrap() += 1),
        ];

        notify_all(&listeners, false);

        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
