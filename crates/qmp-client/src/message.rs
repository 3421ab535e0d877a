//! QMP wire messages.
//!
//! Every message is a single JSON object terminated by a newline. Outbound
//! commands are encoded from [`CommandRequest`]; inbound lines are classified
//! into an [`InboundMessage`] by a tolerant decoder that never fails the
//! session on shapes it does not recognise.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{Map, Value};

/// An outbound `execute` message.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct CommandRequest<'a> {
    /// Command name.
    pub execute: &'a str,
    /// Command arguments, omitted from the wire when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<&'a Map<String, Value>>,
}

impl<'a> CommandRequest<'a> {
    pub(crate) const fn new(execute: &'a str, arguments: Option<&'a Map<String, Value>>) -> Self {
        Self { execute, arguments }
    }

    /// Encodes the request as a newline-terminated line.
    pub(crate) fn to_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// An asynchronous notification emitted by the VM.
#[derive(Debug, Clone, PartialEq)]
pub struct QmpEvent {
    /// Event name, for example `DEVICE_DELETED`.
    pub name: String,
    /// Unprocessed event payload; empty when the VM sent none.
    pub data: Map<String, Value>,
    /// When the VM emitted the event, if it said.
    pub timestamp: Option<SystemTime>,
}

impl QmpEvent {
    fn from_parts(name: String, payload: Option<Value>, timestamp: Option<&Value>) -> Self {
        let data = match payload {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            name,
            data,
            timestamp: timestamp.and_then(decode_timestamp),
        }
    }

    /// Returns the string stored under `key` in the event data.
    #[must_use]
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

fn decode_timestamp(value: &Value) -> Option<SystemTime> {
    let stamp = value.as_object()?;
    let seconds = stamp.get("seconds").and_then(Value::as_u64).unwrap_or(0);
    let micros = stamp
        .get("microseconds")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    UNIX_EPOCH
        .checked_add(Duration::from_secs(seconds))
        .and_then(|instant| instant.checked_add(Duration::from_micros(micros)))
}

/// Error body carried by an `error` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ReplyError {
    pub(crate) class: String,
    pub(crate) desc: String,
}

impl ReplyError {
    fn from_value(value: &Value) -> Self {
        let field = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        Self {
            class: field("class"),
            desc: field("desc"),
        }
    }
}

/// Outcome carried by a command reply.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Reply {
    /// `{"return": ...}`
    Success(Value),
    /// `{"error": ...}`
    Failure(ReplyError),
}

/// Classification of an inbound line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum InboundMessage {
    Event(QmpEvent),
    Reply(Reply),
    /// Valid JSON object that is neither an event nor a reply.
    Unrecognised,
}

impl InboundMessage {
    /// Decodes a raw line.
    ///
    /// Only lines that are not JSON objects produce an error.
    pub(crate) fn from_bytes(line: &[u8]) -> Result<Self, serde_json::Error> {
        let object: Map<String, Value> = serde_json::from_slice(line)?;
        Ok(Self::from_object(object))
    }

    fn from_object(mut object: Map<String, Value>) -> Self {
        if let Some(name) = object.remove("event") {
            return match name {
                Value::String(name) => Self::Event(QmpEvent::from_parts(
                    name,
                    object.remove("data"),
                    object.get("timestamp"),
                )),
                _ => Self::Unrecognised,
            };
        }

        if let Some(payload) = object.remove("return") {
            return Self::Reply(Reply::Success(payload));
        }

        match object.get("error") {
            Some(error) => Self::Reply(Reply::Failure(ReplyError::from_value(error))),
            None => Self::Unrecognised,
        }
    }
}
