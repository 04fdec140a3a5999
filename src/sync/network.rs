//! Network monitor
//!
//! Tracks connectivity as reported by the embedding shell. The shell
//! forwards the platform's online/offline events via [`NetworkMonitor::
//! set_online`]; there is no polling here. Each state change is signalled
//! exactly once over a watch channel, so a subscriber sees one
//! notification per offline-to-online transition regardless of how many
//! times the platform repeats the event.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

pub struct NetworkMonitor {
    online: AtomicBool,
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    /// Create a monitor with the connectivity state observed at startup.
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self {
            online: AtomicBool::new(initially_online),
            tx,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    /// Record a connectivity change. Repeated reports of the same state
    /// are ignored; returns whether the state actually changed.
    pub fn set_online(&self, online: bool) -> bool {
        let previous = self.online.swap(online, Ordering::Relaxed);
        if previous == online {
            return false;
        }

        log::info!(
            "Connectivity changed: {}",
            if online { "online" } else { "offline" }
        );
        // Send fails only when no subscriber exists, which is fine
        let _ = self.tx.send(online);
        true
    }

    /// Subscribe to connectivity changes. The receiver yields the new
    /// state on every transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
