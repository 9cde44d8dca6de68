//! Readiness barrier: gates the host notification on every client being ready.

use super::state::Member;
use std::collections::HashSet;
use tandem_core::ConnectionId;

#[derive(Debug, Clone, Default)]
pub struct ReadinessBarrier {
    ready: HashSet<ConnectionId>,
    /// Set once the host has been told about the current satisfied episode.
    notified: bool,
    /// Roster of the last notification sent to the host.
    last_notified: Option<Vec<ConnectionId>>,
}

impl ReadinessBarrier {
    pub fn mark_ready(&mut self, id: &ConnectionId) {
        self.ready.insert(id.clone());
    }

    pub fn mark_not_ready(&mut self, id: &ConnectionId, clients: &[Member]) {
        self.ready.remove(id);
        self.refresh(clients);
    }

    /// Prune a departed client.
    pub fn remove(&mut self, id: &ConnectionId, clients: &[Member]) {
        self.ready.remove(id);
        self.refresh(clients);
    }

    /// Ready IDs in roster order.
    pub fn ready_clients(&self, clients: &[Member]) -> Vec<ConnectionId> {
        clients
            .iter()
            .filter(|c| self.ready.contains(&c.id))
            .map(|c| c.id.clone())
            .collect()
    }

    /// Every current client is ready (and there is at least one).
    pub fn is_satisfied(&self, clients: &[Member]) -> bool {
        !clients.is_empty() && clients.iter().all(|c| self.ready.contains(&c.id))
    }

    /// Evaluate after a ready signal.
    ///
    /// Returns the ready roster while the barrier is satisfied with a host
    /// attached and the host has not been told yet. The barrier stays armed
    /// until [`commit`](Self::commit) records the notification.
    pub fn check(&mut self, clients: &[Member], host_present: bool) -> Option<Vec<ConnectionId>> {
        if !self.is_satisfied(clients) {
            self.notified = false;
            return None;
        }
        if !host_present || self.notified {
            return None;
        }
        Some(self.ready_clients(clients))
    }

    /// The host was sent `roster`. Disarms until the barrier is unsatisfied.
    pub fn commit(&mut self, roster: Vec<ConnectionId>) {
        self.notified = true;
        self.last_notified = Some(roster);
    }

    /// Whether `roster` is exactly what the host was last told.
    pub fn repeats_last(&self, roster: &[ConnectionId]) -> bool {
        self.last_notified.as_deref() == Some(roster)
    }

    /// Drop IDs that are no longer clients and re-arm the notification if
    /// the barrier is no longer satisfied. Never notifies.
    pub fn refresh(&mut self, clients: &[Member]) {
        self.ready.retain(|id| clients.iter().any(|c| &c.id == id));
        if !self.is_satisfied(clients) {
            self.notified = false;
        }
    }

    #[cfg(test)]
    fn is_ready(&self, id: &ConnectionId) -> bool {
        self.ready.contains(id)
    }

    #[cfg(test)]
    fn ready_count(&self) -> usize {
        self.ready.len()
    }
}
