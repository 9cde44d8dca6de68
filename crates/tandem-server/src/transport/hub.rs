//! In-process connection table backing the [`Transport`] trait.
//!
//! Each accepted socket registers here and gets a bounded outbound queue.
//! Dropping a connection's sender is how it gets closed: the socket loop
//! drains what is left and then sees the end of the queue.

use super::Transport;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tandem_core::{ConnectionId, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default per-connection outbound queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

pub struct ConnectionHub {
    /// Outbound queues keyed by connection.
    connections: RwLock<HashMap<ConnectionId, mpsc::Sender<ServerEvent>>>,
    /// Channel name → subscribed connections.
    channels: RwLock<HashMap<String, HashSet<ConnectionId>>>,
    queue_depth: usize,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

impl ConnectionHub {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            queue_depth,
        }
    }

    /// Accept a new connection: assign it an identity and an outbound queue.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let id = ConnectionId::generate();
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.connections.write().insert(id.clone(), tx);
        debug!(conn_id = %id, "connection registered");
        (id, rx)
    }

    /// Drop a connection and all of its channel subscriptions.
    pub fn unregister(&self, conn: &ConnectionId) {
        {
            let mut channels = self.channels.write();
            channels.retain(|_, members| {
                members.remove(conn);
                !members.is_empty()
            });
        }
        if self.connections.write().remove(conn).is_some() {
            debug!(conn_id = %conn, "connection unregistered");
        }
    }

    /// Close every connection (server shutdown).
    pub fn close_all(&self) {
        self.channels.write().clear();
        let closed = {
            let mut connections = self.connections.write();
            let n = connections.len();
            connections.clear();
            n
        };
        debug!(count = closed, "closed all connections");
    }

    pub fn is_connected(&self, conn: &ConnectionId) -> bool {
        self.connections.read().contains_key(conn)
    }

    /// Number of open connections.
    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    /// Connections currently subscribed to a channel.
    pub fn subscribers(&self, channel: &str) -> Vec<ConnectionId> {
        self.channels
            .read()
            .get(channel)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn push(&self, conn: &ConnectionId, event: ServerEvent) {
        let connections = self.connections.read();
        let Some(tx) = connections.get(conn) else {
            debug!(conn_id = %conn, event = event.name(), "send to unknown connection dropped");
            return;
        };
        if let Err(e) = tx.try_send(event) {
            // A full queue means a stalled peer; the liveness sweep reaps it.
            warn!(conn_id = %conn, error = %e, "outbound queue rejected event");
        }
    }
}

impl Transport for ConnectionHub {
    fn send(&self, conn: &ConnectionId, event: ServerEvent) {
        self.push(conn, event);
    }

    fn broadcast(&self, channel: &str, event: ServerEvent, exclude: Option<&ConnectionId>) {
        let targets = self.subscribers(channel);
        for conn in targets.iter().filter(|c| Some(*c) != exclude) {
            self.push(conn, event.clone());
        }
    }

    fn subscribe(&self, conn: &ConnectionId, channel: &str) {
        self.channels
            .write()
            .entry(channel.to_string())
            .or_default()
            .insert(conn.clone());
    }

    fn unsubscribe(&self, conn: &ConnectionId, channel: &str) {
        let mut channels = self.channels.write();
        if let Some(members) = channels.get_mut(channel) {
            members.remove(conn);
            if members.is_empty() {
                channels.remove(channel);
            }
        }
    }

    fn close(&self, conn: &ConnectionId) {
        self.unregister(conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::messages::Notice;

    fn notice(msg: &str) -> ServerEvent {
        ServerEvent::Error(Notice::new(msg))
    }

    #[test]
    fn send_reaches_only_target() {
        let hub = ConnectionHub::default();
        let (a, mut rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();

        hub.send(&a, notice("hi"));
        assert_eq!(rx_a.try_recv().unwrap(), notice("hi"));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn broadcast_respects_channel_and_exclusion() {
        let hub = ConnectionHub::default();
        let (a, mut rx_a) = hub.register();
        let (b, mut rx_b) = hub.register();
        let (_c, mut rx_c) = hub.register();
        hub.subscribe(&a, "ABC1");
        hub.subscribe(&b, "ABC1");

        hub.broadcast("ABC1", notice("all"), None);
        hub.broadcast("ABC1", notice("not a"), Some(&a));

        assert_eq!(rx_a.try_recv().unwrap(), notice("all"));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), notice("all"));
        assert_eq!(rx_b.try_recv().unwrap(), notice("not a"));
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_drops_empty_channel() {
        let hub = ConnectionHub::default();
        let (a, _rx) = hub.register();
        hub.subscribe(&a, "ABC1");
        assert_eq!(hub.subscribers("ABC1"), vec![a.clone()]);
        hub.unsubscribe(&a, "ABC1");
        assert!(hub.subscribers("ABC1").is_empty());
    }

    #[tokio::test]
    async fn close_flushes_queue_then_ends() {
        let hub = ConnectionHub::default();
        let (a, mut rx) = hub.register();
        hub.subscribe(&a, "ABC1");
        hub.send(&a, notice("bye"));
        hub.close(&a);

        assert!(!hub.is_connected(&a));
        assert!(hub.subscribers("ABC1").is_empty());
        assert_eq!(rx.recv().await, Some(notice("bye")));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let hub = ConnectionHub::new(1);
        let (a, mut rx) = hub.register();
        hub.send(&a, notice("one"));
        hub.send(&a, notice("two"));
        assert_eq!(rx.try_recv().unwrap(), notice("one"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn close_all_empties_hub() {
        let hub = ConnectionHub::default();
        let (a, _ra) = hub.register();
        let (_b, _rb) = hub.register();
        hub.subscribe(&a, "ABC1");
        assert_eq!(hub.count(), 2);
        hub.close_all();
        assert_eq!(hub.count(), 0);
        assert!(hub.subscribers("ABC1").is_empty());
    }
}
