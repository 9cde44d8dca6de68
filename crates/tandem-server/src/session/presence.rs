//! Presence protocol: the canonical membership view of a session.

use super::state::Session;
use crate::transport::Transport;
use tandem_core::messages::{PresenceEntry, PresenceView};
use tandem_core::ServerEvent;

/// Derive the view from the session as it is right now.
pub fn view(session: &Session) -> PresenceView {
    PresenceView {
        host: session.host().map(|h| h.name.clone()),
        clients: session
            .clients()
            .iter()
            .map(|c| PresenceEntry {
                id: c.id.clone(),
                name: c.name.clone(),
            })
            .collect(),
    }
}

/// Send a freshly derived view to everyone in the session.
pub fn broadcast(transport: &dyn Transport, session: &Session) {
    transport.broadcast(
        session.code(),
        ServerEvent::PresenceUpdate(view(session)),
        None,
    );
}
