// JSON frames exchanged over the relay websocket.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TYPE_DIRECT_MESSAGE: &str = "direct_message";
pub const TYPE_MESSAGE_ACK: &str = "message_ack";
pub const TYPE_USER_ONLINE: &str = "user_online";
pub const TYPE_USER_OFFLINE: &str = "user_offline";
pub const TYPE_ERROR: &str = "error";

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("{frame_type} frame is malformed: {source}")]
    Fields {
        frame_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Every frame the relay can push to us. Unrecognized or missing `type` tags
/// land in `Unknown` instead of failing the parse.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    DirectMessage {
        from: String,
        body: String,
        created_at_ms: Option<i64>,
        id: Option<String>,
    },
    MessageAck {
        id: String,
    },
    UserOnline {
        from: String,
    },
    UserOffline {
        from: String,
    },
    Error {
        body: String,
    },
    Unknown {
        type_tag: Option<String>,
    },
}

impl InboundFrame {
    pub fn tag(&self) -> &str {
        match self {
            InboundFrame::DirectMessage { .. } => TYPE_DIRECT_MESSAGE,
            InboundFrame::MessageAck { .. } => TYPE_MESSAGE_ACK,
            InboundFrame::UserOnline { .. } => TYPE_USER_ONLINE,
            InboundFrame::UserOffline { .. } => TYPE_USER_OFFLINE,
            InboundFrame::Error { .. } => TYPE_ERROR,
            InboundFrame::Unknown { type_tag } => type_tag.as_deref().unwrap_or("<none>"),
        }
    }
}

// The reference relay serializes ids as int64; our own ids are UUID strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DirectMessageFields {
    from: String,
    #[serde(default)]
    body: String,
    #[serde(default, rename = "createdAt")]
    created_at: Option<Value>,
    #[serde(default)]
    id: Option<RawId>,
}

#[derive(Debug, Deserialize)]
struct AckFields {
    id: RawId,
}

#[derive(Debug, Deserialize)]
struct PresenceFields {
    from: String,
}

#[derive(Debug, Deserialize)]
struct ErrorFields {
    #[serde(default)]
    body: String,
}

fn fields<T: serde::de::DeserializeOwned>(
    frame_type: &'static str,
    value: Value,
) -> Result<T, WireError> {
    serde_json::from_value(value).map_err(|source| WireError::Fields { frame_type, source })
}

pub fn parse_inbound(text: &str) -> Result<InboundFrame, WireError> {
    let value: Value = serde_json::from_str(text)?;
    let Some(obj) = value.as_object() else {
        return Err(WireError::NotAnObject);
    };
    let type_tag = obj.get("type").and_then(Value::as_str).map(str::to_owned);

    let frame = match type_tag.as_deref() {
        Some(TYPE_DIRECT_MESSAGE) => {
            let f: DirectMessageFields = fields(TYPE_DIRECT_MESSAGE, value)?;
            // 0 is what the relay sends when it had no id to forward.
            let id = f
                .id
                .map(RawId::into_string)
                .filter(|id| !id.is_empty() && id != "0");
            InboundFrame::DirectMessage {
                from: f.from,
                body: f.body,
                created_at_ms: f.created_at.as_ref().and_then(parse_created_at),
                id,
            }
        }
        Some(TYPE_MESSAGE_ACK) => {
            let f: AckFields = fields(TYPE_MESSAGE_ACK, value)?;
            InboundFrame::MessageAck {
                id: f.id.into_string(),
            }
        }
        Some(TYPE_USER_ONLINE) => {
            let f: PresenceFields = fields(TYPE_USER_ONLINE, value)?;
            InboundFrame::UserOnline { from: f.from }
        }
        Some(TYPE_USER_OFFLINE) => {
            let f: PresenceFields = fields(TYPE_USER_OFFLINE, value)?;
            InboundFrame::UserOffline { from: f.from }
        }
        Some(TYPE_ERROR) => {
            let f: ErrorFields = fields(TYPE_ERROR, value)?;
            InboundFrame::Error { body: f.body }
        }
        _ => InboundFrame::Unknown { type_tag },
    };
    Ok(frame)
}

fn parse_created_at(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

pub fn format_created_at(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

// Ids stay within the range a JavaScript number holds exactly.
const MAX_WIRE_ID: u64 = (1 << 53) - 1;

/// A random positive message id. The relay decodes ids as int64 and drops the
/// connection on anything else.
pub fn random_wire_id() -> i64 {
    let (hi, _) = uuid::Uuid::new_v4().as_u64_pair();
    (hi & MAX_WIRE_ID).max(1) as i64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundDirectMessage {
    pub id: i64,
    #[serde(rename = "type")]
    pub frame_type: String,
    pub to: String,
    pub body: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

impl OutboundDirectMessage {
    pub fn new(id: i64, to: &str, body: &str, created_at_ms: i64) -> Self {
        Self {
            id,
            frame_type: TYPE_DIRECT_MESSAGE.to_string(),
            to: to.to_string(),
            body: body.to_string(),
            created_at: format_created_at(created_at_ms),
        }
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_direct_message_with_string_id() {
        let frame = parse_inbound(
            r#"{"type":"direct_message","from":"alice","body":"hey","createdAt":"2024-05-01T12:00:00Z","id":"m-1"}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            InboundFrame::DirectMessage {
                from: "alice".into(),
                body: "hey".into(),
                created_at_ms: Some(1_714_564_800_000),
                id: Some("m-1".into()),
            }
        );
    }

    #[test]
    fn relay_forward_without_id_or_timestamp_is_accepted() {
        let frame = parse_inbound(r#"{"type":"direct_message","from":"bob","body":"yo"}"#).unwrap();
        match frame {
            InboundFrame::DirectMessage { id, created_at_ms, .. } => {
                assert_eq!(id, None);
                assert_eq!(created_at_ms, None);
            }
            other => panic!("unexpected frame {other:?}"),
        }
        let frame = parse_inbound(r#"{"type":"direct_message","from":"bob","body":"yo","id":0}"#).unwrap();
        assert!(matches!(frame, InboundFrame::DirectMessage { id: None, .. }));
    }

    #[test]
    fn numeric_ack_ids_become_strings() {
        assert_eq!(
            parse_inbound(r#"{"type":"message_ack","id":42}"#).unwrap(),
            InboundFrame::MessageAck { id: "42".into() }
        );
    }

    #[test]
    fn presence_and_error_frames() {
        assert_eq!(
            parse_inbound(r#"{"type":"user_online","from":"carol"}"#).unwrap(),
            InboundFrame::UserOnline { from: "carol".into() }
        );
        assert_eq!(
            parse_inbound(r#"{"type":"user_offline","from":"carol"}"#).unwrap(),
            InboundFrame::UserOffline { from: "carol".into() }
        );
        assert_eq!(
            parse_inbound(r#"{"type":"error","body":"User is not online: dave"}"#).unwrap(),
            InboundFrame::Error {
                body: "User is not online: dave".into()
            }
        );
    }

    #[test]
    fn unknown_or_missing_type_is_not_an_error() {
        assert_eq!(
            parse_inbound(r#"{"type":"typing","from":"x"}"#).unwrap(),
            InboundFrame::Unknown {
                type_tag: Some("typing".into())
            }
        );
        assert_eq!(
            parse_inbound(r#"{"from":"x"}"#).unwrap(),
            InboundFrame::Unknown { type_tag: None }
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(parse_inbound("not json"), Err(WireError::Json(_))));
        assert!(matches!(parse_inbound("[1]"), Err(WireError::NotAnObject)));
        assert!(matches!(
            parse_inbound(r#"{"type":"message_ack"}"#),
            Err(WireError::Fields { .. })
        ));
        assert!(matches!(
            parse_inbound(r#"{"type":"user_online","from":7}"#),
            Err(WireError::Fields { .. })
        ));
    }

    #[test]
    fn outbound_frame_shape() {
        let frame = OutboundDirectMessage::new(41, "bob", "hi", 1_714_564_800_000);
        let json: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "direct_message");
        assert_eq!(json["id"], 41);
        assert_eq!(json["to"], "bob");
        assert_eq!(json["body"], "hi");
        assert_eq!(json["createdAt"], "2024-05-01T12:00:00.000Z");
    }

    #[test]
    fn wire_ids_are_positive_int64_numbers() {
        for _ in 0..1_000 {
            let id = random_wire_id();
            assert!(id > 0);
            assert!(id as u64 <= MAX_WIRE_ID);
        }
        let text = OutboundDirectMessage::new(random_wire_id(), "bob", "hi", 0)
            .to_json()
            .unwrap();
        let json: Value = serde_json::from_str(&text).unwrap();
        assert!(json["id"].is_i64());
    }
}
