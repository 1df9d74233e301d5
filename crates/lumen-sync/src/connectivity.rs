//! # Connectivity Monitor
//!
//! Tracks reachability of the remote authority and exposes transitions.
//!
//! ## Signal Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  call results ──▶ set_online(bool) ──▶ watch channel ──▶ service loop   │
//! │  (orchestrator)          │                                              │
//! │                          └──▶ StatusPublisher (UI badge)                │
//! │                                                                         │
//! │  The engine infers reachability from real call outcomes rather than    │
//! │  probing: a successful remote call marks online, a network-class       │
//! │  failure marks offline. The offline→online edge wakes the service      │
//! │  loop so queued work drains promptly after an outage.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::status::StatusPublisher;

/// Shared connectivity state.
///
/// Cheap to clone; all clones observe the same channel.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
    publisher: Arc<StatusPublisher>,
}

impl ConnectivityMonitor {
    /// Starts offline; the first successful remote call flips it online.
    pub fn new(publisher: Arc<StatusPublisher>) -> Self {
        let (tx, _rx) = watch::channel(false);
        ConnectivityMonitor {
            tx: Arc::new(tx),
            publisher,
        }
    }

    /// Records an observed reachability state.
    ///
    /// Idempotent: repeated reports of the same state notify no one.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                info!("remote authority reachable");
            } else {
                info!("remote authority unreachable, queuing locally");
            }
            self.publisher.set_online(online);
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Channel for observing transitions (used by the service loop to
    /// trigger a pass on the offline→online edge).
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
