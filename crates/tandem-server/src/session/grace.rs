//! Host reconnection grace period.
//!
//! `Present → Grace(deadline) → Present | ended`. A host drop never evicts
//! clients right away; a deadline task fires later and only ends the session
//! if the slot is still in the same grace episode. Timers are never
//! cancelled, the fire-time check makes a late timer a no-op.

use super::registry::SessionRegistry;
use super::state::Member;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum HostState {
    /// Never had a host (only possible under the create-on-join policy).
    Vacant,
    Present(Member),
    Grace { since: Instant, generation: u64 },
}

/// The host slot of one session.
#[derive(Debug, Clone)]
pub struct HostSlot {
    state: HostState,
    generation: u64,
}

impl Default for HostSlot {
    fn default() -> Self {
        Self {
            state: HostState::Vacant,
            generation: 0,
        }
    }
}

impl HostSlot {
    pub fn member(&self) -> Option<&Member> {
        match &self.state {
            HostState::Present(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self.state, HostState::Present(_))
    }

    pub fn in_grace(&self) -> bool {
        matches!(self.state, HostState::Grace { .. })
    }

    /// When the host dropped, while in grace.
    pub fn disconnected_at(&self) -> Option<Instant> {
        match self.state {
            HostState::Grace { since, .. } => Some(since),
            _ => None,
        }
    }

    /// Install a host. Returns the previous holder when it was a different
    /// connection; the caller must evict it.
    pub fn install(&mut self, member: Member) -> Option<Member> {
        let previous = std::mem::replace(&mut self.state, HostState::Present(member));
        match previous {
            HostState::Present(old) => {
                let same = matches!(&self.state, HostState::Present(new) if new.id == old.id);
                (!same).then_some(old)
            }
            HostState::Grace { .. } | HostState::Vacant => None,
        }
    }

    /// Enter grace after the host dropped. Returns the departed host and the
    /// generation the deadline must match.
    pub fn begin_grace(&mut self, now: Instant) -> Option<(Member, u64)> {
        if !self.is_present() {
            return None;
        }
        self.generation += 1;
        let generation = self.generation;
        match std::mem::replace(&mut self.state, HostState::Grace { since: now, generation }) {
            HostState::Present(m) => Some((m, generation)),
            _ => None,
        }
    }

    /// Whether a deadline armed for `generation` should end the session now.
    pub fn grace_expired(&self, generation: u64) -> bool {
        matches!(self.state, HostState::Grace { generation: g, .. } if g == generation)
    }
}

/// Arm the deadline for a grace episode.
pub fn arm(registry: Arc<SessionRegistry>, code: String, generation: u64, period: Duration) {
    debug!(session = %code, generation, period_secs = period.as_secs(), "grace period armed");
    tokio::spawn(async move {
        tokio::time::sleep(period).await;
        registry.expire_grace(&code, generation).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::ConnectionId;

    fn member(id: &str) -> Member {
        Member {
            id: ConnectionId::from(id),
            name: format!("host-{id}"),
        }
    }

    #[test]
    fn install_evicts_only_a_different_holder() {
        let mut slot = HostSlot::default();
        assert!(slot.install(member("h1")).is_none());
        assert!(slot.install(member("h1")).is_none());
        let evicted = slot.install(member("h2")).unwrap();
        assert_eq!(evicted.id, ConnectionId::from("h1"));
        assert_eq!(slot.member().unwrap().id, ConnectionId::from("h2"));
    }

    #[test]
    fn grace_then_return() {
        let mut slot = HostSlot::default();
        slot.install(member("h1"));
        let now = Instant::now();
        let (left, generation) = slot.begin_grace(now).unwrap();
        assert_eq!(left.id, ConnectionId::from("h1"));
        assert!(slot.in_grace());
        assert_eq!(slot.disconnected_at(), Some(now));
        assert!(slot.grace_expired(generation));

        assert!(slot.install(member("h2")).is_none());
        assert!(slot.disconnected_at().is_none());
        assert!(!slot.grace_expired(generation));
    }

    #[test]
    fn stale_generation_does_not_expire() {
        let mut slot = HostSlot::default();
        slot.install(member("h1"));
        let (_, first) = slot.begin_grace(Instant::now()).unwrap();
        slot.install(member("h1"));
        let (_, second) = slot.begin_grace(Instant::now()).unwrap();
        assert!(!slot.grace_expired(first));
        assert!(slot.grace_expired(second));
    }

    #[test]
    fn begin_grace_needs_a_host() {
        let mut slot = HostSlot::default();
        assert!(slot.begin_grace(Instant::now()).is_none());
        assert!(!slot.in_grace());
    }
}
