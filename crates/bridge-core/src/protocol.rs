//! Envelope protocol shared by both ends of the channel.
//!
//! Every message on the wire is a JSON object:
//!
//! ```text
//! { "messageId": "ipcbridge_<uuid>", "originId": 4242,
//!   "kind": "event" | "call" | "command" | "response",
//!   "actionName": "save",                       // absent for responses
//!   "payload": [..] | {"response": ..} | {"error": {"message": ".."}} }
//! ```
//!
//! The channel may carry unrelated traffic, so [`validate`] never fails loudly:
//! it returns a [`Rejection`] that the dispatcher logs and skips.

use crate::config::ProtocolConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Closed set of envelope kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Event,
    Call,
    Command,
    Response,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Event => "event",
            Kind::Call => "call",
            Kind::Command => "command",
            Kind::Response => "response",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "event" => Some(Kind::Event),
            "call" => Some(Kind::Call),
            "command" => Some(Kind::Command),
            "response" => Some(Kind::Response),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds a handler can observe. Responses never reach handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Event,
    Call,
    Command,
}

impl From<HandlerKind> for Kind {
    fn from(kind: HandlerKind) -> Self {
        match kind {
            HandlerKind::Event => Kind::Event,
            HandlerKind::Call => Kind::Call,
            HandlerKind::Command => Kind::Command,
        }
    }
}

/// Error carried by a failed response. Only the message crosses the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub message: String,
}

/// Envelope payload, shaped by kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Ordered argument list of an event, call or command.
    Args(Vec<Value>),
    /// Successful command result.
    Success { response: Value },
    /// Failed command result.
    Failure { error: ErrorDescriptor },
}

impl Payload {
    pub fn success(value: Value) -> Self {
        Payload::Success { response: value }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Payload::Failure {
            error: ErrorDescriptor {
                message: message.into(),
            },
        }
    }
}

/// The unit of wire transmission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub message_id: String,
    pub origin_id: u32,
    pub kind: Kind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,
    pub payload: Payload,
}

impl Envelope {
    /// Build an event, call or command envelope with a fresh message id.
    pub fn build(
        kind: HandlerKind,
        action_name: impl Into<String>,
        args: Vec<Value>,
        origin_id: u32,
    ) -> Self {
        Self {
            message_id: new_message_id(),
            origin_id,
            kind: kind.into(),
            action_name: Some(action_name.into()),
            payload: Payload::Args(args),
        }
    }

    /// Build the response to a command, reusing the command's message id.
    pub fn response(
        message_id: impl Into<String>,
        origin_id: u32,
        result: std::result::Result<Value, String>,
    ) -> Self {
        let payload = match result {
            Ok(value) => Payload::success(value),
            Err(message) => Payload::failure(message),
        };
        Self {
            message_id: message_id.into(),
            origin_id,
            kind: Kind::Response,
            action_name: None,
            payload,
        }
    }

    /// Serialize for the transport.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Generate a namespaced message id: `<prefix>_<random>`.
///
/// Uniqueness relies on the v4 UUID; collisions are not checked.
pub fn new_message_id() -> String {
    format!(
        "{}{}{}",
        ProtocolConfig::MESSAGE_ID_PREFIX,
        ProtocolConfig::MESSAGE_ID_SEPARATOR,
        Uuid::new_v4().simple()
    )
}

/// Whether a message id carries this protocol's prefix.
pub fn has_protocol_prefix(message_id: &str) -> bool {
    message_id
        .strip_prefix(ProtocolConfig::MESSAGE_ID_PREFIX)
        .is_some_and(|rest| rest.starts_with(ProtocolConfig::MESSAGE_ID_SEPARATOR))
}

/// Why an inbound value was not accepted as an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotAnObject,
    MissingMessageId,
    ForeignMessageId(String),
    MissingKind,
    UnknownKind(String),
    MissingPayload,
    MalformedPayload(Kind),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotAnObject => write!(f, "not an object"),
            Rejection::MissingMessageId => write!(f, "missing string messageId"),
            Rejection::ForeignMessageId(id) => write!(f, "foreign messageId '{}'", id),
            Rejection::MissingKind => write!(f, "missing kind"),
            Rejection::UnknownKind(kind) => write!(f, "unknown kind '{}'", kind),
            Rejection::MissingPayload => write!(f, "missing payload"),
            Rejection::MalformedPayload(kind) => write!(f, "payload does not fit kind {}", kind),
        }
    }
}

/// Validate an inbound value and decode it into an [`Envelope`].
///
/// Pure: returns a tagged result and never panics on foreign input.
pub fn validate(raw: &Value) -> std::result::Result<Envelope, Rejection> {
    let obj = raw.as_object().ok_or(Rejection::NotAnObject)?;

    let message_id = obj
        .get("messageId")
        .and_then(Value::as_str)
        .ok_or(Rejection::MissingMessageId)?;
    if !has_protocol_prefix(message_id) {
        return Err(Rejection::ForeignMessageId(message_id.to_string()));
    }

    let kind = match obj.get("kind") {
        Some(Value::String(s)) => {
            Kind::parse(s).ok_or_else(|| Rejection::UnknownKind(s.clone()))?
        }
        Some(other) => return Err(Rejection::UnknownKind(other.to_string())),
        None => return Err(Rejection::MissingKind),
    };

    let payload = match obj.get("payload") {
        None | Some(Value::Null) => return Err(Rejection::MissingPayload),
        Some(payload) => decode_payload(kind, payload)?,
    };

    // A non-numeric origin is tolerated; it is informational only.
    let origin_id = obj
        .get("originId")
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .unwrap_or(0);

    let action_name = match kind {
        Kind::Response => None,
        _ => Some(
            obj.get("actionName")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
    };

    Ok(Envelope {
        message_id: message_id.to_string(),
        origin_id,
        kind,
        action_name,
        payload,
    })
}

fn decode_payload(kind: Kind, payload: &Value) -> std::result::Result<Payload, Rejection> {
    match kind {
        Kind::Event | Kind::Call | Kind::Command => match payload {
            Value::Array(args) => Ok(Payload::Args(args.clone())),
            _ => Err(Rejection::MalformedPayload(kind)),
        },
        Kind::Response => match payload {
            Value::Object(map) => Ok(decode_response(map)),
            _ => Err(Rejection::MalformedPayload(kind)),
        },
    }
}

fn decode_response(map: &Map<String, Value>) -> Payload {
    if let Some(error) = map.get("error").filter(|e| !e.is_null()) {
        let message = match (error, error.get("message")) {
            (Value::String(message), _) | (_, Some(Value::String(message))) => message.clone(),
            (_, Some(other)) => other.to_string(),
            (other, None) => other.to_string(),
        };
        return Payload::failure(message);
    }
    // A peer whose handler produced nothing may omit `response` entirely.
    Payload::success(map.get("response").cloned().unwrap_or(Value::Null))
}

/// Handler-visible view of an inbound event, call or command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcEvent {
    message_id: String,
    origin_id: u32,
    action_name: String,
    kind: HandlerKind,
}

impl IpcEvent {
    pub(crate) fn new(
        message_id: impl Into<String>,
        origin_id: u32,
        action_name: impl Into<String>,
        kind: HandlerKind,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            origin_id,
            action_name: action_name.into(),
            kind,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Process id of the sender.
    pub fn origin_id(&self) -> u32 {
        self.origin_id
    }

    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    pub fn kind(&self) -> HandlerKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_ids_are_prefixed_and_distinct() {
        let a = new_message_id();
        let b = new_message_id();
        assert!(a.starts_with("ipcbridge_"));
        assert!(has_protocol_prefix(&a));
        assert_ne!(a, b);
    }

    #[test]
    fn test_prefix_requires_separator() {
        assert!(!has_protocol_prefix("ipcbridgeX123"));
        assert!(!has_protocol_prefix("other_123"));
        assert!(has_protocol_prefix("ipcbridge_123"));
    }

    #[test]
    fn test_event_envelope_wire_shape() {
        let env = Envelope::build(HandlerKind::Event, "ready", vec![json!(1), json!("a")], 42);
        let value = env.to_value().unwrap();

        assert_eq!(value["kind"], "event");
        assert_eq!(value["originId"], 42);
        assert_eq!(value["actionName"], "ready");
        assert_eq!(value["payload"], json!([1, "a"]));
        assert_eq!(value["messageId"], json!(env.message_id));
    }

    #[test]
    fn test_response_envelope_omits_action_name() {
        let ok = Envelope::response("ipcbridge_abc", 7, Ok(json!({"n": 3})));
        let value = ok.to_value().unwrap();
        assert!(value.get("actionName").is_none());
        assert_eq!(value["payload"], json!({"response": {"n": 3}}));

        let err = Envelope::response("ipcbridge_abc", 7, Err("boom".to_string()));
        let value = err.to_value().unwrap();
        assert_eq!(value["payload"], json!({"error": {"message": "boom"}}));
    }

    #[test]
    fn test_validate_accepts_own_envelopes() {
        let env = Envelope::build(HandlerKind::Command, "sum", vec![json!(2), json!(3)], 9);
        let decoded = validate(&env.to_value().unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_validate_rejects_foreign_traffic() {
        assert_eq!(validate(&json!("hello")), Err(Rejection::NotAnObject));
        assert_eq!(validate(&json!({"kind": "event"})), Err(Rejection::MissingMessageId));
        assert_eq!(
            validate(&json!({"messageId": "rpc_1", "kind": "event", "payload": []})),
            Err(Rejection::ForeignMessageId("rpc_1".to_string()))
        );
        assert_eq!(
            validate(&json!({"messageId": "ipcbridge_1", "payload": []})),
            Err(Rejection::MissingKind)
        );
        assert_eq!(
            validate(&json!({"messageId": "ipcbridge_1", "kind": "broadcast", "payload": []})),
            Err(Rejection::UnknownKind("broadcast".to_string()))
        );
        assert_eq!(
            validate(&json!({"messageId": "ipcbridge_1", "kind": "event"})),
            Err(Rejection::MissingPayload)
        );
        assert_eq!(
            validate(&json!({"messageId": "ipcbridge_1", "kind": "call", "payload": {"a": 1}})),
            Err(Rejection::MalformedPayload(Kind::Call))
        );
    }

    #[test]
    fn test_validate_decodes_response_payloads() {
        let ok = validate(&json!({
            "messageId": "ipcbridge_1", "originId": 1, "kind": "response",
            "payload": {"response": [1, 2]}
        }))
        .unwrap();
        assert_eq!(ok.payload, Payload::success(json!([1, 2])));
        assert_eq!(ok.action_name, None);

        let empty = validate(&json!({
            "messageId": "ipcbridge_2", "kind": "response", "payload": {}
        }))
        .unwrap();
        assert_eq!(empty.payload, Payload::success(Value::Null));

        let failed = validate(&json!({
            "messageId": "ipcbridge_3", "kind": "response",
            "payload": {"error": {"message": "X", "stack": "ignored"}}
        }))
        .unwrap();
        assert_eq!(failed.payload, Payload::failure("X"));
    }

    #[test]
    fn test_validate_error_descriptor_shapes() {
        let response = |error: Value| {
            validate(&json!({
                "messageId": "ipcbridge_4", "kind": "response", "payload": {"error": error}
            }))
            .unwrap()
            .payload
        };

        assert_eq!(response(json!("oops")), Payload::failure("oops"));
        assert_eq!(response(json!({"message": 42})), Payload::failure("42"));
        assert_eq!(response(json!({"code": 7})), Payload::failure(r#"{"code":7}"#));
    }

    #[test]
    fn test_validate_rejects_argument_list_as_response() {
        assert_eq!(
            validate(&json!({"messageId": "ipcbridge_5", "kind": "response", "payload": [1]})),
            Err(Rejection::MalformedPayload(Kind::Response))
        );
    }

    #[test]
    fn test_ipc_event_accessors() {
        let event = IpcEvent::new("ipcbridge_1", 5, "save", HandlerKind::Call);
        assert_eq!(event.message_id(), "ipcbridge_1");
        assert_eq!(event.origin_id(), 5);
        assert_eq!(event.action_name(), "save");
        assert_eq!(event.kind(), HandlerKind::Call);
        assert_eq!(Kind::from(event.kind()), Kind::Call);
    }
}
