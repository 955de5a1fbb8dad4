//! Typed file-service requests and replies.
//!
//! Requests are `[id, verb, args...]`; replies echo the id followed by a status
//! (`"ok"` or `"error"`) and verb-specific results.  Server pushes during a
//! subscription look like `[push_id, "subscriptionupdate", content]` and are
//! answered with `[push_id, "ack"]`.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::codec::WireValue;

/// Correlator echoed by the server in every reply.
pub type RequestId = i64;

/// Request ids are drawn uniformly from `0..=REQUEST_ID_SPACE`.
pub const REQUEST_ID_SPACE: RequestId = 1 << 20;

pub const VERB_ACK: &str = "ack";
pub const VERB_SUBSCRIPTION_UPDATE: &str = "subscriptionupdate";

/// Draw a fresh request id.  Only needs to differ from ids still in flight.
pub fn next_request_id() -> RequestId {
    rand::rng().random_range(0..=REQUEST_ID_SPACE)
}

/// A logical request to the file service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Chmod { file: String, mode: i64 },
    Write { file: String, offset: i64, data: Vec<u8> },
    Append { file: String, data: Vec<u8> },
    Read { file: String, offset: i64, length: i64 },
    /// Stay subscribed to `file` for `duration`, acking every update pushed.
    Subscribe { file: String, duration: Duration },
    LastWrite { file: String },
}

impl Request {
    pub fn verb(&self) -> &'static str {
        match self {
            Request::Chmod { .. } => "chmod",
            Request::Write { .. } => "write",
            Request::Append { .. } => "append",
            Request::Read { .. } => "read",
            Request::Subscribe { .. } => "subscribe",
            Request::LastWrite { .. } => "lastWrite",
        }
    }

    pub fn file(&self) -> &str {
        match self {
            Request::Chmod { file, .. }
            | Request::Write { file, .. }
            | Request::Append { file, .. }
            | Request::Read { file, .. }
            | Request::Subscribe { file, .. }
            | Request::LastWrite { file } => file,
        }
    }

    /// How long the exchange must stay open after the first matching reply.
    pub fn subscription_window(&self) -> Option<Duration> {
        match self {
            Request::Subscribe { duration, .. } => Some(*duration),
            _ => None,
        }
    }

    /// Build the wire message `[id, verb, args...]`.
    pub fn to_message(&self, id: RequestId) -> Vec<WireValue> {
        let mut msg = vec![WireValue::Int(id), WireValue::from(self.verb()), WireValue::from(self.file())];
        match self {
            Request::Chmod { mode, .. } => msg.push(WireValue::Int(*mode)),
            Request::Write { offset, data, .. } => {
                msg.push(WireValue::Int(*offset));
                msg.push(WireValue::from(data.as_slice()));
            }
            Request::Append { data, .. } => msg.push(WireValue::from(data.as_slice())),
            Request::Read { offset, length, .. } => {
                msg.push(WireValue::Int(*offset));
                msg.push(WireValue::Int(*length));
            }
            Request::Subscribe { duration, .. } => {
                let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
                msg.push(WireValue::Int(millis));
            }
            Request::LastWrite { .. } => {}
        }
        msg
    }
}

/// Acknowledgement for a server push.
pub fn ack_message(push_id: RequestId) -> Vec<WireValue> {
    vec![WireValue::Int(push_id), WireValue::from(VERB_ACK)]
}

/// Outcome reported in the second field of every reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error(String),
    /// Missing or not one of the known markers.
    Unknown,
}

/// A reply whose first field is the id of the request it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: RequestId,
    /// Everything after the id, status first.
    pub fields: Vec<WireValue>,
}

impl Response {
    pub fn status(&self) -> Status {
        match self.fields.first() {
            Some(v) if v.is_text("ok") => Status::Ok,
            Some(v) if v.is_text("error") => {
                let reason = self
                    .fields
                    .get(1)
                    .and_then(WireValue::as_bytes)
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                Status::Error(reason)
            }
            _ => Status::Unknown,
        }
    }

    /// The `index`-th result after the status field.
    pub fn result(&self, index: usize) -> Option<&WireValue> {
        self.fields.get(index + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("message has no leading integer id")]
    MissingId,
}

/// A decoded datagram from the server side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Server push during a subscription; must always be acked.
    Update { push_id: RequestId, content: Vec<u8> },
    Reply(Response),
}

impl Inbound {
    pub fn from_message(mut values: Vec<WireValue>) -> Result<Self, MessageError> {
        let id = values
            .first()
            .and_then(WireValue::as_int)
            .ok_or(MessageError::MissingId)?;
        if values.get(1).is_some_and(|v| v.is_text(VERB_SUBSCRIPTION_UPDATE)) {
            let content = match values.get_mut(2) {
                Some(WireValue::Bytes(b)) => std::mem::take(b),
                _ => Vec::new(),
            };
            return Ok(Inbound::Update { push_id: id, content });
        }
        values.remove(0);
        Ok(Inbound::Reply(Response { id, fields: values }))
    }
}
