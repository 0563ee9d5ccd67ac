//! Wire message model.
//!
//! Messages are JSON objects discriminated by their `message` field. The
//! discriminator is modelled as a closed enum (with an escape hatch for result
//! payloads the client does not interpret) and the rest of the object is kept
//! as an open map; optional nested fields are read as `Option`s.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{NcsError, Result};

/// Discriminator field name
pub const MESSAGE_FIELD: &str = "message";
/// Identifier field for transaction-scoped messages
pub const TRANSACTION_ID: &str = "transaction_id";
/// Identifier field for audio-transfer-scoped messages
pub const AUDIO_ID: &str = "audio_id";
/// Identifier returned once on `connected`
pub const SESSION_ID: &str = "session_id";

/// Message discriminator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Connect,
    Connected,
    QueryBegin,
    QueryParameter,
    QueryEnd,
    Audio,
    AudioEnd,
    Disconnect,
    QueryError,
    /// Any other payload, e.g. `query_response`
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Connect => "connect",
            MessageKind::Connected => "connected",
            MessageKind::QueryBegin => "query_begin",
            MessageKind::QueryParameter => "query_parameter",
            MessageKind::QueryEnd => "query_end",
            MessageKind::Audio => "audio",
            MessageKind::AudioEnd => "audio_end",
            MessageKind::Disconnect => "disconnect",
            MessageKind::QueryError => "query_error",
            MessageKind::Other(name) => name,
        }
    }

    /// True for the messages that terminate a transaction
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageKind::QueryEnd | MessageKind::Disconnect)
    }
}

impl From<&str> for MessageKind {
    fn from(value: &str) -> Self {
        match value {
            "connect" => MessageKind::Connect,
            "connected" => MessageKind::Connected,
            "query_begin" => MessageKind::QueryBegin,
            "query_parameter" => MessageKind::QueryParameter,
            "query_end" => MessageKind::QueryEnd,
            "audio" => MessageKind::Audio,
            "audio_end" => MessageKind::AudioEnd,
            "disconnect" => MessageKind::Disconnect,
            "query_error" => MessageKind::QueryError,
            other => MessageKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured protocol message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    kind: MessageKind,
    body: Map<String, Value>,
}

impl Message {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            body: Map::new(),
        }
    }

    /// Build a message of `kind` carrying `fields`
    ///
    /// A `message` key inside `fields` is ignored; the discriminator always
    /// comes from `kind`.
    pub fn with_fields(kind: MessageKind, fields: Map<String, Value>) -> Self {
        let mut message = Self::new(kind);
        message.merge(fields);
        message
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Set a single field, replacing any previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        if key != MESSAGE_FIELD {
            self.body.insert(key, value.into());
        }
        self
    }

    /// Merge caller-supplied fields, later keys overwrite earlier ones
    pub fn merge(&mut self, fields: Map<String, Value>) -> &mut Self {
        for (key, value) in fields {
            self.insert(key, value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Read a nested field with a JSON pointer such as `/a/0/b`
    pub fn pointer(&self, path: &str) -> Option<&Value> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let (head, rest) = match trimmed.split_once('/') {
            Some((head, rest)) => (head, Some(rest)),
            None => (trimmed, None),
        };
        let value = self.body.get(head)?;
        match rest {
            Some(rest) => value.pointer(&format!("/{}", rest)),
            None => Some(value),
        }
    }

    pub fn transaction_id(&self) -> Option<u64> {
        self.get(TRANSACTION_ID).and_then(Value::as_u64)
    }

    pub fn audio_id(&self) -> Option<u64> {
        self.get(AUDIO_ID).and_then(Value::as_u64)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.get(SESSION_ID).and_then(Value::as_str)
    }

    /// Reason attached to a `query_error`
    pub fn reason(&self) -> Option<&str> {
        self.get("reason").and_then(Value::as_str)
    }

    pub fn to_json(&self) -> Value {
        let mut object = Map::with_capacity(self.body.len() + 1);
        object.insert(MESSAGE_FIELD.to_string(), Value::String(self.kind.as_str().to_string()));
        for (key, value) in &self.body {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }

    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(NcsError::protocol("message is not a JSON object"));
        };
        let kind = match object.remove(MESSAGE_FIELD) {
            Some(Value::String(name)) => MessageKind::from(name.as_str()),
            Some(_) => return Err(NcsError::protocol("message discriminator is not a string")),
            None => return Err(NcsError::protocol("message has no discriminator")),
        };
        Ok(Self { kind, body: object })
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_json())?)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        Self::from_json(serde_json::from_str(text)?)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Message::from_json(value).map_err(serde::de::Error::custom)
    }
}

/// Convert a `json!({...})` literal into a field map, dropping non-objects
pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
