use crate::model::Token;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("no response from peer for {} seconds", elapsed.as_secs())]
    ConnectionTimeout { elapsed: Duration },

    #[error("peer disconnected")]
    PeerDisconnected,

    #[error("socket error: {0}")]
    Socket(#[from] io::Error),

    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

impl LinkError {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, LinkError::PeerDisconnected | LinkError::Socket(_))
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("{0} requires a payload")]
    PayloadRequired(Token),

    #[error("{0} does not take a payload")]
    PayloadNotAccepted(Token),

    #[error("session closed, command refused")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProducerError {
    #[error("no active session")]
    NotConnected,

    #[error("manual key control requires manual mode")]
    NotManualMode,

    #[error("manual command line is empty")]
    EmptyLine,

    #[error("mode {0} is not available yet")]
    UnsupportedMode(&'static str),

    #[error("motor is already {0}")]
    MotorState(&'static str),

    #[error("unmapped key: {0}")]
    UnmappedKey(char),

    #[error("invalid power level: {0}")]
    InvalidPower(String),

    #[error(transparent)]
    Batch(#[from] BatchError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SentenceError {
    #[error("telemetry value is not a string")]
    NotText,

    #[error("unknown sentence identifier: {0}")]
    UnknownIdentifier(String),

    #[error("missing *crc terminator")]
    MissingCrc,

    #[error("invalid crc: {0}")]
    BadCrc(String),

    #[error("expected {expected} data fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("invalid {field}: {value:?}")]
    BadField { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("unknown command: {0} (try `help`)")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}
