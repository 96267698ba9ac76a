use crate::error::{DecodeError, LinkError};
use crate::model::{InboundMessage, OutboundBatch};
use serde_json::Value;

// Upper bound of one receive. The peer sends no length prefix or delimiter,
// so each read is decoded as exactly one JSON document.
pub const MAX_CHUNK_SIZE: usize = 1024;

pub fn encode(batch: &OutboundBatch) -> Result<Vec<u8>, LinkError> {
    serde_json::to_vec(batch).map_err(LinkError::Encode)
}

pub fn try_decode(bytes: &[u8]) -> Result<InboundMessage, DecodeError> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(map) => Ok(map),
        other => Err(DecodeError::NotAnObject(json_kind(&other))),
    }
}

pub fn decode(bytes: &[u8]) -> InboundMessage {
    match try_decode(bytes) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(error = %err, len = bytes.len(), "unable to parse inbound data");
            InboundMessage::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
