//! # Status Publisher
//!
//! Push-based status for UI layers: online/offline and syncing/idle.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ConnectivityMonitor ──set_online──▶ ┌─────────────────┐                │
//! │                                      │ StatusPublisher │──▶ listeners   │
//! │  SyncOrchestrator ───set_syncing──▶  └─────────────────┘   (UI badge)   │
//! │                                                                         │
//! │  • Listeners get the current snapshot immediately on subscribe         │
//! │  • Unchanged updates are swallowed (no duplicate notifications)        │
//! │  • Dropping the Subscription guard unsubscribes                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use lumen_core::ServiceStatus;

type Listener = Arc<dyn Fn(ServiceStatus) + Send + Sync>;

struct Registry {
    next_id: u64,
    listeners: HashMap<u64, Listener>,
    current: ServiceStatus,
}

// =============================================================================
// Status Publisher
// =============================================================================

/// Broadcasts [`ServiceStatus`] changes to registered listeners.
///
/// Listeners are called synchronously after the internal lock is released,
/// so a listener may re-enter the publisher (e.g. to read `current`).
pub struct StatusPublisher {
    registry: Mutex<Registry>,
}

impl StatusPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(StatusPublisher {
            registry: Mutex::new(Registry {
                next_id: 0,
                listeners: HashMap::new(),
                current: ServiceStatus::default(),
            }),
        })
    }

    /// Registers a listener; it immediately receives the current snapshot.
    ///
    /// The listener stays registered until the returned guard is dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(ServiceStatus) + Send + Sync + 'static,
    ) -> Subscription {
        let listener: Listener = Arc::new(listener);
        let (id, snapshot) = {
            let mut registry = self.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.insert(id, listener.clone());
            (id, registry.current)
        };

        listener(snapshot);

        Subscription {
            id,
            publisher: Arc::downgrade(self),
        }
    }

    /// Current status snapshot.
    pub fn current(&self) -> ServiceStatus {
        self.lock().current
    }

    pub fn set_online(&self, is_online: bool) {
        self.update(|s| s.is_online = is_online);
    }

    pub fn set_syncing(&self, is_syncing: bool) {
        self.update(|s| s.is_syncing = is_syncing);
    }

    fn update(&self, apply: impl FnOnce(&mut ServiceStatus)) {
        let (snapshot, listeners) = {
            let mut registry = self.lock();
            let before = registry.current;
            apply(&mut registry.current);
            if registry.current == before {
                return;
            }
            let listeners: Vec<Listener> = registry.listeners.values().cloned().collect();
            (registry.current, listeners)
        };

        debug!(
            is_online = snapshot.is_online,
            is_syncing = snapshot.is_syncing,
            "status changed"
        );

        // Notify outside the lock.
        for listener in listeners {
            listener(snapshot);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn unsubscribe(&self, id: u64) {
        self.lock().listeners.remove(&id);
    }
}

// =============================================================================
// Subscription Guard
// =============================================================================

/// RAII guard for a registered listener.
pub struct Subscription {
    id: u64,
    publisher: Weak<StatusPublisher>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(publisher) = self.publisher.upgrade() {
            publisher.unsubscribe(self.id);
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_receives_current_snapshot() {
        let publisher = StatusPublisher::new();
        publisher.set_online(true);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let _sub = publisher.subscribe(move |s| seen2.lock().unwrap().push(s));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_online);
        assert!(!seen[0].is_syncing);
    }

    #[test]
    fn test_unchanged_updates_are_swallowed() {
        let publisher = StatusPublisher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let _sub = publisher.subscribe(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        // Initial snapshot.
        assert_eq!(count.load(Ordering::SeqCst), 1);

        publisher.set_online(false); // already false
        assert_eq!(count.load(Ordering::SeqCst), 1);

        publisher.set_online(true);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        publisher.set_syncing(true);
        publisher.set_syncing(true);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let publisher = StatusPublisher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();

        let sub = publisher.subscribe(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        drop(sub);

        publisher.set_online(true);
        assert_eq!(count.load(Ordering::SeqCst), 1); // only the initial snapshot
    }

    #[test]
    fn test_listener_can_read_current() {
        let publisher = StatusPublisher::new();
        let publisher2 = publisher.clone();
        let _sub = publisher.subscribe(move |s| {
            assert_eq!(publisher2.current(), s);
        });
        publisher.set_online(true);
    }
}
