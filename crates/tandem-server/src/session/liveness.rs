//! Heartbeat tracking and the stale-connection sweep.
//!
//! Backstop for transports that do not report dead peers promptly: any
//! connection silent for longer than the timeout is force-disconnected
//! through the ordinary disconnect path.

use super::registry::SessionRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::ConnectionId;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
pub struct LivenessMonitor {
    timeout: Duration,
    last_seen: HashMap<ConnectionId, Instant>,
}

impl LivenessMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_seen: HashMap::new(),
        }
    }

    /// Record a heartbeat (or the initial connect).
    pub fn touch(&mut self, id: &ConnectionId, now: Instant) {
        self.last_seen.insert(id.clone(), now);
    }

    pub fn forget(&mut self, id: &ConnectionId) {
        self.last_seen.remove(id);
    }

    pub fn clear(&mut self) {
        self.last_seen.clear();
    }

    /// Remove and return every connection silent for longer than the timeout.
    pub fn take_stale(&mut self, now: Instant) -> Vec<ConnectionId> {
        let timeout = self.timeout;
        let mut stale = Vec::new();
        self.last_seen.retain(|id, seen| {
            if now.duration_since(*seen) > timeout {
                stale.push(id.clone());
                false
            } else {
                true
            }
        });
        stale
    }

    #[cfg(test)]
    fn last_seen(&self, id: &ConnectionId) -> Option<Instant> {
        self.last_seen.get(id).copied()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.last_seen.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

/// Run the stale-connection sweep every `interval` until the task is aborted.
pub fn spawn_sweep(registry: Arc<SessionRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let evicted = registry.sweep_stale().await;
            if !evicted.is_empty() {
                debug!(count = evicted.len(), "liveness sweep evicted connections");
            }
        }
    })
}
