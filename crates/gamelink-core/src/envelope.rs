//! Wire envelope codec.
//!
//! Every frame on the wire is one JSON object:
//!
//! ```text
//! { "t": "cmd", "id": "42", "kind": "Player.give", "payload": { ... } }
//! ```
//!
//! The type tag is written as `t`; `type` is accepted on input too. Unknown
//! top-level fields are ignored so newer clients can talk to older servers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version advertised in `hello_ack`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Open document carried in `payload`.
pub type Payload = Map<String, Value>;

/// Closed set of envelope types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    /// Client greeting; must precede any `cmd`.
    Hello,
    /// Server answer to `hello`.
    HelloAck,
    /// Request from the controller.
    Cmd,
    /// Successful reply to a `cmd`.
    Res,
    /// Failed reply to a `cmd`, or a connection-level fault.
    Err,
    /// Unsolicited server event.
    Evt,
}

impl EnvelopeType {
    /// Wire spelling of the type tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::HelloAck => "hello_ack",
            Self::Cmd => "cmd",
            Self::Res => "res",
            Self::Err => "err",
            Self::Evt => "evt",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "hello" => Self::Hello,
            "hello_ack" => Self::HelloAck,
            "cmd" => Self::Cmd,
            "res" => Self::Res,
            "err" => Self::Err,
            "evt" => Self::Evt,
            _ => return None,
        })
    }
}

/// Reasons a frame could not be turned into an [`Envelope`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Frame is not JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Top level is not an object.
    #[error("envelope must be a JSON object")]
    NotAnObject,
    /// Neither `t` nor `type` is present.
    #[error("envelope has no type")]
    MissingType,
    /// Type tag outside the closed set.
    #[error("unknown envelope type: {0}")]
    UnknownType(String),
    /// A known field holds a value of the wrong JSON type.
    #[error("field `{0}` has the wrong type")]
    InvalidField(&'static str),
}

/// One wire message.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Type tag, `t` on the wire.
    #[serde(rename = "t")]
    pub envelope_type: EnvelopeType,
    /// Correlation id; `cmd`/`res`/`err` only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Dotted operation or event name, e.g. `Command.register`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Operation arguments, result or event body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    /// Set on `hello_ack` only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<u32>,
    /// Shared-secret credential sent with `hello`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl Envelope {
    fn bare(envelope_type: EnvelopeType) -> Self {
        Self {
            envelope_type,
            id: None,
            kind: None,
            payload: None,
            protocol_version: None,
            sig: None,
        }
    }

    /// Client greeting, optionally carrying a credential.
    pub fn hello(sig: Option<String>) -> Self {
        Self {
            sig,
            ..Self::bare(EnvelopeType::Hello)
        }
    }

    /// Handshake acknowledgement advertising [`PROTOCOL_VERSION`].
    pub fn hello_ack() -> Self {
        Self {
            protocol_version: Some(PROTOCOL_VERSION),
            ..Self::bare(EnvelopeType::HelloAck)
        }
    }

    /// Request envelope.
    pub fn cmd(id: impl Into<String>, kind: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: Some(id.into()),
            kind: Some(kind.into()),
            payload: Some(payload),
            ..Self::bare(EnvelopeType::Cmd)
        }
    }

    /// Successful reply to request `id`.
    pub fn res(id: impl Into<String>, kind: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: Some(id.into()),
            kind: Some(kind.into()),
            payload: Some(payload),
            ..Self::bare(EnvelopeType::Res)
        }
    }

    /// Error reply; the payload is always `{code, message}`.
    pub fn err(
        id: impl Into<String>,
        kind: Option<String>,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        let mut payload = Payload::new();
        let _ = payload.insert("code".into(), Value::String(code.to_owned()));
        let _ = payload.insert("message".into(), Value::String(message.into()));
        Self {
            id: Some(id.into()),
            kind,
            payload: Some(payload),
            ..Self::bare(EnvelopeType::Err)
        }
    }

    /// Error that answers no particular request, such as a rejected handshake.
    pub fn fault(code: &str, message: impl Into<String>) -> Self {
        Self {
            id: None,
            ..Self::err(String::new(), None, code, message)
        }
    }

    /// Unsolicited event. Never carries an id.
    pub fn evt(kind: impl Into<String>, payload: Payload) -> Self {
        Self {
            kind: Some(kind.into()),
            payload: Some(payload),
            ..Self::bare(EnvelopeType::Evt)
        }
    }

    /// The payload, or an empty document when absent.
    pub fn take_payload(&mut self) -> Payload {
        self.payload.take().unwrap_or_default()
    }
}

/// Serialize an envelope to a text frame.
pub fn encode(envelope: &Envelope) -> serde_json::Result<String> {
    serde_json::to_string(envelope)
}

/// Parse a frame into an envelope.
///
/// `id` may be a string or a number (numbers are kept in their decimal form).
/// A `null` field is the same as an absent one.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Object(mut map) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let tag = map
        .remove("t")
        .filter(|v| !v.is_null())
        .or_else(|| map.remove("type").filter(|v| !v.is_null()))
        .ok_or(DecodeError::MissingType)?;
    let tag = tag.as_str().ok_or(DecodeError::InvalidField("t"))?;
    let envelope_type =
        EnvelopeType::parse(tag).ok_or_else(|| DecodeError::UnknownType(tag.to_owned()))?;

    let id = match map.remove("id") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(_) => return Err(DecodeError::InvalidField("id")),
    };

    let kind = optional_string(&mut map, "kind")?;
    let sig = optional_string(&mut map, "sig")?;

    let payload = match map.remove("payload") {
        None | Some(Value::Null) => None,
        Some(Value::Object(p)) => Some(p),
        Some(_) => return Err(DecodeError::InvalidField("payload")),
    };

    let protocol_version = match map.remove("protocolVersion") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or(DecodeError::InvalidField("protocolVersion"))?,
        ),
    };

    Ok(Envelope {
        envelope_type,
        id,
        kind,
        payload,
        protocol_version,
        sig,
    })
}

fn optional_string(map: &mut Payload, key: &'static str) -> Result<Option<String>, DecodeError> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(DecodeError::InvalidField(key)),
    }
}

/// Coerce a handler result into a payload document.
///
/// Objects pass through, `null` becomes an empty document and any other value
/// is wrapped as `{"value": ...}`.
pub fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        Value::Null => Payload::new(),
        other => {
            let mut map = Payload::new();
            let _ = map.insert("value".into(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_str(s: &str) -> Result<Envelope, DecodeError> {
        decode(s.as_bytes())
    }

    #[test]
    fn hello_ack_wire_shape() {
        let text = encode(&Envelope::hello_ack()).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v, json!({"t": "hello_ack", "protocolVersion": 1}));
    }

    #[test]
    fn err_wire_shape() {
        let env = Envelope::err("7", Some("Bogus.Thing".into()), "UNKNOWN_KIND", "no handler");
        let v: Value = serde_json::from_str(&encode(&env).unwrap()).unwrap();
        assert_eq!(
            v,
            json!({
                "t": "err",
                "id": "7",
                "kind": "Bogus.Thing",
                "payload": {"code": "UNKNOWN_KIND", "message": "no handler"}
            })
        );
    }

    #[test]
    fn fault_has_no_id() {
        let v: Value =
            serde_json::from_str(&encode(&Envelope::fault("UNAUTHORIZED", "bad sig")).unwrap())
                .unwrap();
        assert_eq!(
            v,
            json!({"t": "err", "payload": {"code": "UNAUTHORIZED", "message": "bad sig"}})
        );
    }

    #[test]
    fn evt_has_no_id() {
        let mut payload = Payload::new();
        let _ = payload.insert("name".into(), json!("Steve"));
        let v: Value =
            serde_json::from_str(&encode(&Envelope::evt("Player.Join", payload)).unwrap()).unwrap();
        assert!(v.get("id").is_none());
        assert_eq!(v["t"], "evt");
        assert_eq!(v["payload"]["name"], "Steve");
    }

    #[test]
    fn decodes_cmd() {
        let env = decode_str(r#"{"t":"cmd","id":"a1","kind":"Player.give","payload":{"n":3}}"#)
            .unwrap();
        assert_eq!(env.envelope_type, EnvelopeType::Cmd);
        assert_eq!(env.id.as_deref(), Some("a1"));
        assert_eq!(env.kind.as_deref(), Some("Player.give"));
        assert_eq!(env.payload.unwrap()["n"], 3);
    }

    #[test]
    fn accepts_type_alias() {
        let env = decode_str(r#"{"type":"hello","sig":"s3cret"}"#).unwrap();
        assert_eq!(env.envelope_type, EnvelopeType::Hello);
        assert_eq!(env.sig.as_deref(), Some("s3cret"));
    }

    #[test]
    fn numeric_id_kept_as_text() {
        let env = decode_str(r#"{"t":"cmd","id":17,"kind":"X.y"}"#).unwrap();
        assert_eq!(env.id.as_deref(), Some("17"));
    }

    #[test]
    fn ignores_unknown_fields() {
        let env = decode_str(r#"{"t":"hello","client":"bot","extra":{"a":1}}"#).unwrap();
        assert_eq!(env.envelope_type, EnvelopeType::Hello);
    }

    #[test]
    fn null_payload_is_absent() {
        let mut env = decode_str(r#"{"t":"cmd","kind":"X.y","payload":null}"#).unwrap();
        assert!(env.payload.is_none());
        assert!(env.take_payload().is_empty());
    }

    #[test]
    fn missing_type_fails() {
        assert!(matches!(decode_str(r#"{"id":"1"}"#), Err(DecodeError::MissingType)));
    }

    #[test]
    fn unknown_type_fails() {
        match decode_str(r#"{"t":"shout"}"#) {
            Err(DecodeError::UnknownType(t)) => assert_eq!(t, "shout"),
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn non_object_fails() {
        assert!(matches!(decode_str("[1,2]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode_str("not json"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn wrong_field_types_fail() {
        assert!(matches!(
            decode_str(r#"{"t":"cmd","payload":[1]}"#),
            Err(DecodeError::InvalidField("payload"))
        ));
        assert!(matches!(
            decode_str(r#"{"t":"cmd","kind":5}"#),
            Err(DecodeError::InvalidField("kind"))
        ));
        assert!(matches!(
            decode_str(r#"{"t":"cmd","id":true}"#),
            Err(DecodeError::InvalidField("id"))
        ));
    }

    #[test]
    fn decode_accepts_encoded_output() {
        let mut payload = Payload::new();
        let _ = payload.insert("ok".into(), json!(true));
        let original = Envelope::res("r-1", "Command.register", payload);
        let decoded = decode(encode(&original).unwrap().as_bytes()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn into_payload_coercions() {
        assert!(into_payload(Value::Null).is_empty());
        assert_eq!(into_payload(json!({"a": 1}))["a"], 1);
        assert_eq!(into_payload(json!(42))["value"], 42);
    }
}
