//! JSON text framing for tandem events.
//!
//! Wire format: one JSON object per WebSocket text frame,
//! `{"event": "<name>", "data": {...}}`. `data` may be omitted or `null`
//! for events without fields.

use crate::error::{TandemError, TandemResult};
use crate::messages::{ClientEvent, ServerEvent};
use serde_json::{Map, Value};

/// Encode an outbound event into a text frame.
pub fn encode_event(event: &ServerEvent) -> TandemResult<String> {
    Ok(serde_json::to_string(event)?)
}

/// Decode an inbound text frame.
///
/// Malformed JSON, unknown event names and missing fields are all reported as
/// [`TandemError::InvalidInput`]; the sender gets an error event back and the
/// connection stays open.
pub fn decode_event(text: &str) -> TandemResult<ClientEvent> {
    let mut value: Value = serde_json::from_str(text)
        .map_err(|e| TandemError::InvalidInput(format!("malformed frame: {e}")))?;

    let obj = value
        .as_object_mut()
        .ok_or_else(|| TandemError::InvalidInput("frame must be a JSON object".into()))?;
    if matches!(obj.get("data"), None | Some(Value::Null)) {
        obj.insert("data".into(), Value::Object(Map::new()));
    }

    serde_json::from_value(value)
        .map_err(|e| TandemError::InvalidInput(format!("malformed event: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ConnectionId;
    use crate::messages::*;
    use serde_json::json;

    #[test]
    fn decode_join() {
        let event =
            decode_event(r#"{"event":"join","data":{"session":"ABC1","role":"host","name":"Ana"}}"#)
                .unwrap();
        assert_eq!(
            event,
            ClientEvent::Join(JoinRequest {
                session: "ABC1".into(),
                role: "host".into(),
                name: "Ana".into(),
            })
        );
    }

    #[test]
    fn decode_payloadless_events_with_or_without_data() {
        assert_eq!(
            decode_event(r#"{"event":"heartbeat"}"#).unwrap(),
            ClientEvent::Heartbeat(Empty {})
        );
        assert_eq!(
            decode_event(r#"{"event":"client-ready","data":null}"#).unwrap(),
            ClientEvent::ClientReady(Empty {})
        );
        assert_eq!(
            decode_event(r#"{"event":"client-not-ready","data":{}}"#).unwrap(),
            ClientEvent::ClientNotReady(Empty {})
        );
    }

    #[test]
    fn decode_command_keeps_fields_verbatim() {
        let event =
            decode_event(r#"{"event":"seek_command","data":{"position":12.5,"timestamp":99}}"#)
                .unwrap();
        let (kind, payload) = event.as_command().unwrap();
        assert_eq!(kind, CommandKind::Seek);
        assert_eq!(payload.0.get("position"), Some(&json!(12.5)));
        assert_eq!(payload.0.get("timestamp"), Some(&json!(99)));
    }

    #[test]
    fn decode_camel_case_fields() {
        let event = decode_event(
            r#"{"event":"audio_upload","data":{"payload":{"title":"x"},"fileSize":10,"fileType":"audio/ogg"}}"#,
        )
        .unwrap();
        match event {
            ClientEvent::AudioUpload(p) => {
                assert_eq!(p.file_size, 10);
                assert_eq!(p.file_type, "audio/ogg");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let event = decode_event(r#"{"event":"mute-client","data":{"clientId":"abc"}}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::MuteClient(ClientTarget {
                client_id: ConnectionId::from("abc")
            })
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_event("not json"),
            Err(TandemError::InvalidInput(_))
        ));
        assert!(matches!(
            decode_event("[1,2]"),
            Err(TandemError::InvalidInput(_))
        ));
        assert!(matches!(
            decode_event(r#"{"event":"teleport"}"#),
            Err(TandemError::InvalidInput(_))
        ));
        assert!(matches!(
            decode_event(r#"{"event":"join","data":{"session":"ABC1"}}"#),
            Err(TandemError::InvalidInput(_))
        ));
    }

    #[test]
    fn encode_relayed_command_flattens_fields() {
        let mut fields = Map::new();
        fields.insert("timestamp".into(), json!(5));
        let event = ServerEvent::relayed(
            CommandKind::Play,
            RelayedCommand {
                fields,
                server_timestamp: 1_700_000_000_000,
                sender_id: ConnectionId::from("host1"),
            },
        );
        let value: Value = serde_json::from_str(&encode_event(&event).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "play_command",
                "data": {"timestamp": 5, "serverTimestamp": 1_700_000_000_000u64, "senderId": "host1"}
            })
        );
    }

    #[test]
    fn encode_host_disconnect_omits_missing_grace() {
        let event = ServerEvent::HostDisconnect(HostDisconnect {
            message: "session ended".into(),
            reason: HostDisconnectReason::Ended,
            grace_period: None,
        });
        let value: Value = serde_json::from_str(&encode_event(&event).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "host_disconnect", "data": {"message": "session ended", "reason": "ended"}})
        );
    }

    #[test]
    fn encode_presence_update() {
        let event = ServerEvent::PresenceUpdate(PresenceView {
            host: Some("Ana".into()),
            clients: vec![PresenceEntry {
                id: ConnectionId::from("c1"),
                name: "Bo".into(),
            }],
        });
        let value: Value = serde_json::from_str(&encode_event(&event).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "presence-update", "data": {"host": "Ana", "clients": [{"id": "c1", "name": "Bo"}]}})
        );
    }
}
