//! Transport collaborator: per-connection delivery and named-channel broadcast.
//!
//! The coordination layer only talks to a [`Transport`]. Sends are
//! fire-and-forget queue pushes, so they never block the caller.

pub mod hub;
pub mod websocket;

pub use hub::ConnectionHub;

use tandem_core::{ConnectionId, ServerEvent};

/// Capabilities the session layer needs from whatever carries the bytes.
pub trait Transport: Send + Sync {
    /// Deliver an event to one connection.
    fn send(&self, conn: &ConnectionId, event: ServerEvent);

    /// Deliver an event to every connection subscribed to `channel`,
    /// optionally skipping one.
    fn broadcast(&self, channel: &str, event: ServerEvent, exclude: Option<&ConnectionId>);

    /// Add a connection to a channel.
    fn subscribe(&self, conn: &ConnectionId, channel: &str);

    /// Remove a connection from a channel.
    fn unsubscribe(&self, conn: &ConnectionId, channel: &str);

    /// Force a connection closed. Events already queued are still flushed.
    fn close(&self, conn: &ConnectionId);
}
