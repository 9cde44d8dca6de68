//! Event messages exchanged over a tandem connection.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}`. Inbound
//! frames decode to [`ClientEvent`], outbound frames encode from
//! [`ServerEvent`]. Field names on the wire are camelCase.

use crate::identity::{ConnectionId, Role};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload for events that carry no fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Empty {}

/// `join{session, role, name}`. Fields stay raw strings until validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub session: String,
    pub role: String,
    pub name: String,
}

/// Shared audio metadata relayed opaquely to the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPayload {
    pub payload: Value,
    pub file_size: u64,
    pub file_type: String,
}

/// Free-form playback command fields (`timestamp`, `position`, `volume`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandPayload(pub Map<String, Value>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicStatus {
    pub is_muted: bool,
}

/// Host request targeting one client (`mute-client`, `disconnect-client`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTarget {
    pub client_id: ConnectionId,
}

/// Events sent by hosts and clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join")]
    Join(JoinRequest),
    #[serde(rename = "heartbeat")]
    Heartbeat(Empty),
    #[serde(rename = "audio_upload")]
    AudioUpload(AudioPayload),
    #[serde(rename = "play_command")]
    PlayCommand(CommandPayload),
    #[serde(rename = "pause_command")]
    PauseCommand(CommandPayload),
    #[serde(rename = "seek_command")]
    SeekCommand(CommandPayload),
    #[serde(rename = "volume_command")]
    VolumeCommand(CommandPayload),
    #[serde(rename = "sync_all_command")]
    SyncAllCommand(CommandPayload),
    #[serde(rename = "mic-status")]
    MicStatus(MicStatus),
    #[serde(rename = "mute-client")]
    MuteClient(ClientTarget),
    #[serde(rename = "disconnect-client")]
    DisconnectClient(ClientTarget),
    #[serde(rename = "client-ready")]
    ClientReady(Empty),
    #[serde(rename = "client-not-ready")]
    ClientNotReady(Empty),
    #[serde(rename = "status")]
    Status(Empty),
}

/// Playback commands relayed verbatim to the rest of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Play,
    Pause,
    Seek,
    Volume,
    SyncAll,
}

impl CommandKind {
    pub fn event_name(&self) -> &'static str {
        match self {
            CommandKind::Play => "play_command",
            CommandKind::Pause => "pause_command",
            CommandKind::Seek => "seek_command",
            CommandKind::Volume => "volume_command",
            CommandKind::SyncAll => "sync_all_command",
        }
    }
}

impl ClientEvent {
    /// Split a playback command into its kind and payload.
    pub fn as_command(&self) -> Option<(CommandKind, &CommandPayload)> {
        match self {
            ClientEvent::PlayCommand(p) => Some((CommandKind::Play, p)),
            ClientEvent::PauseCommand(p) => Some((CommandKind::Pause, p)),
            ClientEvent::SeekCommand(p) => Some((CommandKind::Seek, p)),
            ClientEvent::VolumeCommand(p) => Some((CommandKind::Volume, p)),
            ClientEvent::SyncAllCommand(p) => Some((CommandKind::SyncAll, p)),
            _ => None,
        }
    }
}

/// One roster entry in a presence view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub id: ConnectionId,
    pub name: String,
}

/// Canonical membership snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceView {
    pub host: Option<String>,
    pub clients: Vec<PresenceEntry>,
}

/// A playback command as delivered to the other members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedCommand {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub server_timestamp: u64,
    pub sender_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub file_size: u64,
    pub file_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicStatusUpdate {
    pub user_id: ConnectionId,
    pub name: String,
    pub is_muted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutedNotice {
    pub by: String,
}

/// `user-joined` / `user-left`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserNotice {
    pub id: ConnectionId,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostDisconnectReason {
    /// Host dropped; the session waits for it to return.
    Waiting,
    /// Host did not return in time; the session is over.
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDisconnect {
    pub message: String,
    pub reason: HostDisconnectReason,
    /// Grace period in seconds, present while waiting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllClientsReady {
    pub session_code: String,
    pub ready_clients: Vec<ConnectionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub session_code: String,
}

/// A human-readable message (errors, refusals, disconnect reasons).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub message: String,
}

impl Notice {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Operational view of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub code: String,
    pub host: Option<String>,
    pub clients: Vec<String>,
    pub has_payload: bool,
    pub in_grace_period: bool,
    pub age_secs: u64,
    pub idle_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub active_sessions: usize,
    pub sessions: Vec<SessionStatus>,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "presence-update")]
    PresenceUpdate(PresenceView),
    #[serde(rename = "audio-uploaded")]
    AudioUploaded(UploadReceipt),
    #[serde(rename = "audio_sync")]
    AudioSync(AudioPayload),
    #[serde(rename = "play_command")]
    PlayCommand(RelayedCommand),
    #[serde(rename = "pause_command")]
    PauseCommand(RelayedCommand),
    #[serde(rename = "seek_command")]
    SeekCommand(RelayedCommand),
    #[serde(rename = "volume_command")]
    VolumeCommand(RelayedCommand),
    #[serde(rename = "sync_all_command")]
    SyncAllCommand(RelayedCommand),
    #[serde(rename = "mic-status-update")]
    MicStatusUpdate(MicStatusUpdate),
    #[serde(rename = "muted")]
    Muted(MutedNotice),
    #[serde(rename = "disconnected")]
    Disconnected(Notice),
    #[serde(rename = "user-joined")]
    UserJoined(UserNotice),
    #[serde(rename = "user-left")]
    UserLeft(UserNotice),
    #[serde(rename = "host_disconnect")]
    HostDisconnect(HostDisconnect),
    #[serde(rename = "all-clients-ready")]
    AllClientsReady(AllClientsReady),
    #[serde(rename = "session-not-found")]
    SessionNotFound(SessionRef),
    #[serde(rename = "session-full")]
    SessionFull(SessionRef),
    #[serde(rename = "join-error")]
    JoinError(Notice),
    #[serde(rename = "audio-upload-error")]
    AudioUploadError(Notice),
    #[serde(rename = "rate-limited")]
    RateLimited(Notice),
    #[serde(rename = "error")]
    Error(Notice),
    #[serde(rename = "status")]
    Status(StatusReport),
}

impl ServerEvent {
    /// Wrap a relayed command in the event named after its kind.
    pub fn relayed(kind: CommandKind, command: RelayedCommand) -> Self {
        match kind {
            CommandKind::Play => ServerEvent::PlayCommand(command),
            CommandKind::Pause => ServerEvent::PauseCommand(command),
            CommandKind::Seek => ServerEvent::SeekCommand(command),
            CommandKind::Volume => ServerEvent::VolumeCommand(command),
            CommandKind::SyncAll => ServerEvent::SyncAllCommand(command),
        }
    }

    /// Wire name of this event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::PresenceUpdate(_) => "presence-update",
            ServerEvent::AudioUploaded(_) => "audio-uploaded",
            ServerEvent::AudioSync(_) => "audio_sync",
            ServerEvent::PlayCommand(_) => "play_command",
            ServerEvent::PauseCommand(_) => "pause_command",
            ServerEvent::SeekCommand(_) => "seek_command",
            ServerEvent::VolumeCommand(_) => "volume_command",
            ServerEvent::SyncAllCommand(_) => "sync_all_command",
            ServerEvent::MicStatusUpdate(_) => "mic-status-update",
            ServerEvent::Muted(_) => "muted",
            ServerEvent::Disconnected(_) => "disconnected",
            ServerEvent::UserJoined(_) => "user-joined",
            ServerEvent::UserLeft(_) => "user-left",
            ServerEvent::HostDisconnect(_) => "host_disconnect",
            ServerEvent::AllClientsReady(_) => "all-clients-ready",
            ServerEvent::SessionNotFound(_) => "session-not-found",
            ServerEvent::SessionFull(_) => "session-full",
            ServerEvent::JoinError(_) => "join-error",
            ServerEvent::AudioUploadError(_) => "audio-upload-error",
            ServerEvent::RateLimited(_) => "rate-limited",
            ServerEvent::Error(_) => "error",
            ServerEvent::Status(_) => "status",
        }
    }
}
