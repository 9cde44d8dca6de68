//! Session registry: the single authority over sessions and memberships.
//!
//! All mutations go through one async mutex, so operations on a session are
//! linearized. Transport sends are non-blocking queue pushes and happen while
//! the lock is held, which keeps every presence broadcast in mutation order.

use super::debounce::CommandDebouncer;
use super::grace;
use super::liveness::LivenessMonitor;
use super::presence;
use super::state::{Member, Membership, Session};
use crate::config::JoinPolicy;
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tandem_core::messages::{
    AllClientsReady, AudioPayload, CommandKind, CommandPayload, HostDisconnect,
    HostDisconnectReason, JoinRequest, MicStatusUpdate, MutedNotice, Notice, PresenceView,
    RelayedCommand, SessionStatus, StatusReport, UploadReceipt, UserNotice,
};
use tandem_core::{validate, ConnectionId, Role, ServerEvent, TandemError, TandemResult};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Tunables for the coordination layer.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub max_clients: usize,
    pub grace_period: Duration,
    /// Sessions older than this are swept.
    pub max_age: Duration,
    pub join_policy: JoinPolicy,
    pub play_debounce: Duration,
    pub ready_dedupe: Duration,
    pub heartbeat_timeout: Duration,
    pub max_upload_bytes: u64,
    pub upload_type_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_clients: 50,
            grace_period: Duration::from_secs(30),
            max_age: Duration::from_secs(86_400),
            join_policy: JoinPolicy::RequireHost,
            play_debounce: Duration::from_millis(50),
            ready_dedupe: Duration::from_millis(1000),
            heartbeat_timeout: Duration::from_secs(60),
            max_upload_bytes: 30 * 1024 * 1024,
            upload_type_prefix: "audio/".to_string(),
        }
    }
}

struct RegistryState {
    sessions: HashMap<String, Session>,
    /// connection → seat. The only record of who belongs where.
    members: HashMap<ConnectionId, Membership>,
    debouncer: CommandDebouncer,
}

/// Deadline to arm once the lock is released.
struct GraceTicket {
    code: String,
    generation: u64,
}

pub struct SessionRegistry {
    config: RegistryConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<RegistryState>,
    liveness: Mutex<LivenessMonitor>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig, transport: Arc<dyn Transport>) -> Self {
        let debouncer = CommandDebouncer::new(config.play_debounce, config.ready_dedupe);
        let liveness = LivenessMonitor::new(config.heartbeat_timeout);
        Self {
            config,
            transport,
            state: Mutex::new(RegistryState {
                sessions: HashMap::new(),
                members: HashMap::new(),
                debouncer,
            }),
            liveness: Mutex::new(liveness),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Start tracking a freshly accepted connection.
    pub async fn connect(&self, id: &ConnectionId) {
        self.liveness.lock().await.touch(id, Instant::now());
    }

    pub async fn heartbeat(&self, id: &ConnectionId) {
        let now = Instant::now();
        self.liveness.lock().await.touch(id, now);

        let mut state = self.state.lock().await;
        let RegistryState {
            sessions, members, ..
        } = &mut *state;
        if let Some(membership) = members.get(id) {
            if let Some(session) = sessions.get_mut(&membership.code) {
                session.last_activity_at = now;
            }
        }
    }

    /// Seat a connection in a session, creating the session on first use.
    pub async fn join(
        self: &Arc<Self>,
        id: &ConnectionId,
        request: &JoinRequest,
    ) -> TandemResult<PresenceView> {
        validate::session_code(&request.session)?;
        let name = validate::name(&request.name)?;
        let role = validate::role(&request.role)?;
        let code = request.session.as_str();
        let now = Instant::now();

        let mut state = self.state.lock().await;
        self.admit(&state, id, code, role, &name)?;

        let mut ticket = None;
        if let Some(previous) = state.members.get(id).cloned() {
            if previous.code != code || previous.role != role {
                debug!(conn_id = %id, from = %previous.code, to = %code, "connection changing seats");
                ticket = self.depart(&mut state, id, now);
            }
        }

        let RegistryState {
            sessions, members, ..
        } = &mut *state;
        let session = sessions.entry(code.to_string()).or_insert_with(|| {
            info!(session = %code, "session created");
            Session::new(code, now)
        });
        let member = Member {
            id: id.clone(),
            name: name.clone(),
        };

        match role {
            Role::Host => {
                let returning = session.host.in_grace();
                if let Some(evicted) = session.host.install(member) {
                    warn!(session = %code, conn_id = %id, evicted = %evicted.id, "replacing host connection");
                    members.remove(&evicted.id);
                    self.evict(
                        &evicted.id,
                        code,
                        ServerEvent::Disconnected(Notice::new(
                            "replaced by a new host connection",
                        )),
                    );
                }
                if returning {
                    info!(session = %code, conn_id = %id, "host returned within grace period");
                }
            }
            Role::Client => {
                let stale: Vec<Member> = session
                    .clients
                    .iter()
                    .filter(|c| c.id != *id && c.name == name)
                    .cloned()
                    .collect();
                session.clients.retain(|c| c.id != *id && c.name != name);
                session.readiness.refresh(&session.clients);
                for old in stale {
                    debug!(session = %code, stale = %old.id, conn_id = %id, "replacing stale client entry");
                    members.remove(&old.id);
                    self.transport.unsubscribe(&old.id, code);
                    self.transport.send(
                        &old.id,
                        ServerEvent::Disconnected(Notice::new("replaced by a newer connection")),
                    );
                }
                session.clients.push(member);
                session.readiness.refresh(&session.clients);
            }
        }

        session.last_activity_at = now;
        members.insert(
            id.clone(),
            Membership {
                code: code.to_string(),
                role,
                name: name.clone(),
            },
        );
        self.transport.subscribe(id, code);

        if let Some(payload) = &session.shared_payload {
            self.transport
                .send(id, ServerEvent::AudioSync(payload.clone()));
        }
        self.transport.broadcast(
            code,
            ServerEvent::UserJoined(UserNotice {
                id: id.clone(),
                name,
                role,
            }),
            Some(id),
        );
        let view = presence::view(session);
        presence::broadcast(self.transport.as_ref(), session);
        info!(session = %code, conn_id = %id, %role, clients = session.clients.len(), "joined session");
        drop(state);

        if let Some(ticket) = ticket {
            self.arm_grace(ticket);
        }
        Ok(view)
    }

    /// Admission checks, run before anything is mutated.
    fn admit(
        &self,
        state: &RegistryState,
        id: &ConnectionId,
        code: &str,
        role: Role,
        name: &str,
    ) -> TandemResult<()> {
        if role == Role::Host {
            return Ok(());
        }
        let require_host = self.config.join_policy == JoinPolicy::RequireHost;
        match state.sessions.get(code) {
            None if require_host => Err(TandemError::SessionNotFound(code.to_string())),
            None => Ok(()),
            Some(session) => {
                // A host re-seating itself as a client would leave the session hostless.
                let other_host = session.host.member().is_some_and(|h| h.id != *id);
                if require_host && !other_host {
                    return Err(TandemError::SessionNotFound(code.to_string()));
                }
                let seated = session
                    .clients
                    .iter()
                    .filter(|c| c.id != *id && c.name != name)
                    .count();
                if seated >= self.config.max_clients {
                    return Err(TandemError::SessionFull(code.to_string()));
                }
                Ok(())
            }
        }
    }

    /// Remove a connection from whatever seat it holds.
    pub async fn leave(self: &Arc<Self>, id: &ConnectionId) {
        let ticket = {
            let mut state = self.state.lock().await;
            self.depart(&mut state, id, Instant::now())
        };
        if let Some(ticket) = ticket {
            self.arm_grace(ticket);
        }
    }

    /// Transport close notification: stop tracking liveness and leave.
    pub async fn disconnect(self: &Arc<Self>, id: &ConnectionId) {
        self.liveness.lock().await.forget(id);
        self.leave(id).await;
    }

    /// The ordinary leave path. A departing host puts the session into its
    /// grace period and yields the deadline to arm.
    fn depart(
        &self,
        state: &mut RegistryState,
        id: &ConnectionId,
        now: Instant,
    ) -> Option<GraceTicket> {
        let membership = state.members.remove(id)?;
        let code = membership.code;
        self.transport.unsubscribe(id, &code);
        let session = state.sessions.get_mut(&code)?;
        session.last_activity_at = now;

        let mut ticket = None;
        match membership.role {
            Role::Host => {
                let holds_slot = session.host.member().is_some_and(|h| &h.id == id);
                let grace = if holds_slot {
                    session.host.begin_grace(now)
                } else {
                    None
                };
                if let Some((_, generation)) = grace {
                    let grace_secs = self.config.grace_period.as_secs();
                    warn!(session = %code, conn_id = %id, grace_secs, "host disconnected, holding session");
                    self.transport.broadcast(
                        &code,
                        ServerEvent::HostDisconnect(HostDisconnect {
                            message: "host disconnected, waiting for reconnect".into(),
                            reason: HostDisconnectReason::Waiting,
                            grace_period: Some(grace_secs),
                        }),
                        None,
                    );
                    ticket = Some(GraceTicket {
                        code: code.clone(),
                        generation,
                    });
                }
            }
            Role::Client => {
                session.clients.retain(|c| &c.id != id);
                session.readiness.remove(id, &session.clients);
            }
        }

        self.transport.broadcast(
            &code,
            ServerEvent::UserLeft(UserNotice {
                id: id.clone(),
                name: membership.name,
                role: membership.role,
            }),
            None,
        );

        if session.is_abandoned() {
            state.sessions.remove(&code);
            state.debouncer.forget(&code);
            info!(session = %code, "session closed (empty)");
        } else {
            presence::broadcast(self.transport.as_ref(), session);
        }
        info!(session = %code, conn_id = %id, role = %membership.role, "left session");
        ticket
    }

    fn arm_grace(self: &Arc<Self>, ticket: GraceTicket) {
        grace::arm(
            Arc::clone(self),
            ticket.code,
            ticket.generation,
            self.config.grace_period,
        );
    }

    /// Grace deadline. Ends the session only if the host slot is still in
    /// the grace episode the timer was armed for. Returns whether it did.
    pub async fn expire_grace(&self, code: &str, generation: u64) -> bool {
        let mut state = self.state.lock().await;
        let expired = state
            .sessions
            .get(code)
            .is_some_and(|s| s.host.grace_expired(generation));
        if !expired {
            debug!(session = %code, generation, "grace deadline passed, nothing to end");
            return false;
        }
        let Some(session) = state.sessions.remove(code) else {
            return false;
        };
        state.debouncer.forget(code);

        let ended = HostDisconnect {
            message: "host did not return, session ended".into(),
            reason: HostDisconnectReason::Ended,
            grace_period: None,
        };
        for client in &session.clients {
            state.members.remove(&client.id);
            self.evict(&client.id, code, ServerEvent::HostDisconnect(ended.clone()));
        }
        warn!(session = %code, clients = session.clients.len(), "grace period expired, session ended");
        true
    }

    /// Queue a final event, then drop the connection from the channel and
    /// close it. The caller owns the membership bookkeeping.
    fn evict(&self, id: &ConnectionId, code: &str, last_word: ServerEvent) {
        self.transport.send(id, last_word);
        self.transport.unsubscribe(id, code);
        self.transport.close(id);
    }

    /// Snapshot of a session.
    pub async fn get(&self, code: &str) -> Option<Session> {
        self.state.lock().await.sessions.get(code).cloned()
    }

    pub async fn membership(&self, id: &ConnectionId) -> Option<Membership> {
        self.state.lock().await.members.get(id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Cache a payload on a session and push it to every member except `from`.
    fn store_payload(
        &self,
        state: &mut RegistryState,
        code: &str,
        payload: AudioPayload,
        from: Option<&ConnectionId>,
    ) -> TandemResult<()> {
        let session = state
            .sessions
            .get_mut(code)
            .ok_or_else(|| TandemError::SessionNotFound(code.to_string()))?;
        session.shared_payload = Some(payload.clone());
        session.last_activity_at = Instant::now();
        self.transport
            .broadcast(code, ServerEvent::AudioSync(payload), from);
        Ok(())
    }

    /// Host upload: validate, cache, fan out, acknowledge.
    /// The size limit applies to whichever is larger of the declared
    /// `fileSize` and the encoded payload.
    pub async fn upload_audio(&self, id: &ConnectionId, payload: AudioPayload) -> TandemResult<()> {
        let encoded = serde_json::to_vec(&payload.payload)?.len() as u64;
        validate::upload(
            payload.file_size.max(encoded),
            &payload.file_type,
            self.config.max_upload_bytes,
            &self.config.upload_type_prefix,
        )?;
        let mut state = self.state.lock().await;
        let code = host_session(&state, id)?;
        let receipt = UploadReceipt {
            file_size: payload.file_size,
            file_type: payload.file_type.clone(),
        };
        self.store_payload(&mut state, &code, payload, Some(id))?;
        info!(session = %code, conn_id = %id, size = receipt.file_size, file_type = %receipt.file_type, "audio uploaded");
        self.transport.send(id, ServerEvent::AudioUploaded(receipt));
        Ok(())
    }

    /// Stamp a playback command and forward it to the rest of the session.
    /// Returns `false` when a `play` was swallowed by the debounce gate.
    pub async fn relay_command(
        &self,
        id: &ConnectionId,
        kind: CommandKind,
        payload: CommandPayload,
    ) -> TandemResult<bool> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let code = membership_of(&state, id)?.code.clone();

        if kind == CommandKind::Play && !state.debouncer.allow_play(&code, now) {
            debug!(session = %code, conn_id = %id, "play command debounced");
            return Ok(false);
        }
        if let Some(session) = state.sessions.get_mut(&code) {
            session.last_activity_at = now;
        }

        // Server-owned keys are stamped below, never taken from the sender.
        let mut fields = payload.0;
        fields.remove("serverTimestamp");
        fields.remove("senderId");
        let relayed = RelayedCommand {
            fields,
            server_timestamp: server_timestamp(),
            sender_id: id.clone(),
        };
        self.transport
            .broadcast(&code, ServerEvent::relayed(kind, relayed), Some(id));
        debug!(session = %code, conn_id = %id, command = kind.event_name(), "command relayed");
        Ok(true)
    }

    pub async fn mark_ready(&self, id: &ConnectionId) -> TandemResult<()> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let code = client_session(&state, id)?;
        let RegistryState {
            sessions,
            debouncer,
            ..
        } = &mut *state;
        let Some(session) = sessions.get_mut(&code) else {
            return Ok(());
        };

        session.readiness.mark_ready(id);
        let host = session.host.member().map(|h| h.id.clone());
        let Some(ready_clients) = session.readiness.check(&session.clients, host.is_some()) else {
            return Ok(());
        };
        let Some(host) = host else {
            return Ok(());
        };
        // The window only absorbs repeats of the roster the host already has;
        // a suppressed repeat leaves the barrier armed.
        if session.readiness.repeats_last(&ready_clients) {
            if !debouncer.allow_all_ready(&code, now) {
                debug!(session = %code, "duplicate all-clients-ready suppressed");
                return Ok(());
            }
        } else {
            debouncer.record_all_ready(&code, now);
        }
        session.readiness.commit(ready_clients.clone());
        info!(session = %code, ready = ready_clients.len(), "all clients ready");
        self.transport.send(
            &host,
            ServerEvent::AllClientsReady(AllClientsReady {
                session_code: code.clone(),
                ready_clients,
            }),
        );
        Ok(())
    }

    pub async fn mark_not_ready(&self, id: &ConnectionId) -> TandemResult<()> {
        let mut state = self.state.lock().await;
        let code = client_session(&state, id)?;
        if let Some(session) = state.sessions.get_mut(&code) {
            session.readiness.mark_not_ready(id, &session.clients);
        }
        Ok(())
    }

    pub async fn mic_status(&self, id: &ConnectionId, is_muted: bool) -> TandemResult<()> {
        let state = self.state.lock().await;
        let membership = membership_of(&state, id)?;
        self.transport.broadcast(
            &membership.code,
            ServerEvent::MicStatusUpdate(MicStatusUpdate {
                user_id: id.clone(),
                name: membership.name.clone(),
                is_muted,
            }),
            Some(id),
        );
        Ok(())
    }

    /// Host asks a client to mute itself.
    pub async fn mute_client(&self, id: &ConnectionId, target: &ConnectionId) -> TandemResult<()> {
        let state = self.state.lock().await;
        let code = host_session(&state, id)?;
        ensure_client(&state, &code, target)?;
        let by = membership_of(&state, id)?.name.clone();
        self.transport
            .send(target, ServerEvent::Muted(MutedNotice { by }));
        debug!(session = %code, conn_id = %id, target = %target, "client muted");
        Ok(())
    }

    /// Host removes a client from the session and closes its connection.
    pub async fn disconnect_client(
        self: &Arc<Self>,
        id: &ConnectionId,
        target: &ConnectionId,
    ) -> TandemResult<()> {
        let ticket = {
            let mut state = self.state.lock().await;
            let code = host_session(&state, id)?;
            ensure_client(&state, &code, target)?;
            self.transport.send(
                target,
                ServerEvent::Disconnected(Notice::new("removed from the session by the host")),
            );
            let ticket = self.depart(&mut state, target, Instant::now());
            self.transport.close(target);
            info!(session = %code, conn_id = %id, target = %target, "client removed by host");
            ticket
        };
        if let Some(ticket) = ticket {
            self.arm_grace(ticket);
        }
        Ok(())
    }

    /// Force out every connection whose heartbeat has lapsed.
    pub async fn sweep_stale(self: &Arc<Self>) -> Vec<ConnectionId> {
        let stale = self.liveness.lock().await.take_stale(Instant::now());
        for id in &stale {
            warn!(conn_id = %id, "heartbeat timeout, disconnecting");
            self.transport.close(id);
            self.leave(id).await;
        }
        stale
    }

    /// Delete sessions older than the retention window.
    pub async fn sweep_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let max_age = self.config.max_age;
        let mut state = self.state.lock().await;
        let expired: Vec<String> = state
            .sessions
            .iter()
            .filter(|(_, s)| s.age(now) > max_age)
            .map(|(code, _)| code.clone())
            .collect();

        for code in &expired {
            let Some(session) = state.sessions.remove(code) else {
                continue;
            };
            state.debouncer.forget(code);
            let seated = session
                .host()
                .map(|h| &h.id)
                .into_iter()
                .chain(session.clients.iter().map(|c| &c.id));
            for id in seated {
                state.members.remove(id);
                self.evict(
                    id,
                    code,
                    ServerEvent::Disconnected(Notice::new("session expired")),
                );
            }
            warn!(session = %code, age_secs = session.age(now).as_secs(), "session expired");
        }
        expired
    }

    /// Operational snapshot, sorted by session code.
    pub async fn status(&self) -> StatusReport {
        let now = Instant::now();
        let state = self.state.lock().await;
        let mut sessions: Vec<SessionStatus> = state
            .sessions
            .values()
            .map(|s| SessionStatus {
                code: s.code.clone(),
                host: s.host().map(|h| h.name.clone()),
                clients: s.clients.iter().map(|c| c.name.clone()).collect(),
                has_payload: s.shared_payload.is_some(),
                in_grace_period: s.host.in_grace(),
                age_secs: s.age(now).as_secs(),
                idle_secs: now.duration_since(s.last_activity_at).as_secs(),
            })
            .collect();
        sessions.sort_by(|a, b| a.code.cmp(&b.code));
        StatusReport {
            active_sessions: sessions.len(),
            sessions,
        }
    }

    /// Disconnect every member and drop all state.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        let RegistryState {
            sessions,
            members,
            debouncer,
        } = &mut *state;
        for (id, membership) in members.drain() {
            self.evict(
                &id,
                &membership.code,
                ServerEvent::Disconnected(Notice::new("server shutting down")),
            );
        }
        let count = sessions.len();
        sessions.clear();
        debouncer.clear();
        drop(state);

        self.liveness.lock().await.clear();
        info!(sessions = count, "session registry shut down");
    }
}

fn membership_of<'a>(state: &'a RegistryState, id: &ConnectionId) -> TandemResult<&'a Membership> {
    state
        .members
        .get(id)
        .ok_or_else(|| TandemError::NotPermitted("join a session first".into()))
}

fn host_session(state: &RegistryState, id: &ConnectionId) -> TandemResult<String> {
    let membership = membership_of(state, id)?;
    if membership.role != Role::Host {
        return Err(TandemError::NotPermitted("only the host can do that".into()));
    }
    Ok(membership.code.clone())
}

fn client_session(state: &RegistryState, id: &ConnectionId) -> TandemResult<String> {
    let membership = membership_of(state, id)?;
    if membership.role != Role::Client {
        return Err(TandemError::NotPermitted(
            "only clients report readiness".into(),
        ));
    }
    Ok(membership.code.clone())
}

fn ensure_client(state: &RegistryState, code: &str, target: &ConnectionId) -> TandemResult<()> {
    let seated = state
        .sessions
        .get(code)
        .is_some_and(|s| s.client(target).is_some());
    if seated {
        Ok(())
    } else {
        Err(TandemError::InvalidInput(format!("unknown client: {target}")))
    }
}

/// Milliseconds since the Unix epoch.
fn server_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
