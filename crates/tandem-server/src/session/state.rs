//! Session data model.

use super::barrier::ReadinessBarrier;
use super::grace::HostSlot;
use std::time::Duration;
use tandem_core::messages::AudioPayload;
use tandem_core::{ConnectionId, Role};
use tokio::time::Instant;

/// A connection's seat in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: ConnectionId,
    pub name: String,
}

/// Side-table entry: which session a connection belongs to and as what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub code: String,
    pub role: Role,
    pub name: String,
}

/// One playback session.
#[derive(Debug, Clone)]
pub struct Session {
    pub(super) code: String,
    pub(super) host: HostSlot,
    /// Insertion order, unique by connection ID.
    pub(super) clients: Vec<Member>,
    /// Last uploaded audio metadata, replayed to late joiners.
    pub(super) shared_payload: Option<AudioPayload>,
    pub(super) readiness: ReadinessBarrier,
    pub(super) created_at: Instant,
    pub(super) last_activity_at: Instant,
}

impl Session {
    pub(super) fn new(code: &str, now: Instant) -> Self {
        Self {
            code: code.to_string(),
            host: HostSlot::default(),
            clients: Vec::new(),
            shared_payload: None,
            readiness: ReadinessBarrier::default(),
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn host(&self) -> Option<&Member> {
        self.host.member()
    }

    pub fn host_slot(&self) -> &HostSlot {
        &self.host
    }

    pub fn host_disconnected_at(&self) -> Option<Instant> {
        self.host.disconnected_at()
    }

    pub fn clients(&self) -> &[Member] {
        &self.clients
    }

    pub fn client(&self, id: &ConnectionId) -> Option<&Member> {
        self.clients.iter().find(|c| &c.id == id)
    }

    pub fn shared_payload(&self) -> Option<&AudioPayload> {
        self.shared_payload.as_ref()
    }

    pub fn ready_clients(&self) -> Vec<ConnectionId> {
        self.readiness.ready_clients(&self.clients)
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.duration_since(self.created_at)
    }

    /// No host, no clients and no pending grace period.
    pub fn is_abandoned(&self) -> bool {
        self.clients.is_empty() && !self.host.is_present() && !self.host.in_grace()
    }
}
