use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Token {
    Gps,
    Imu,
    SetMode,
    MtrCmd,
    ManLineCmd,
    ManKeyCmd,
}

impl Token {
    pub fn as_str(self) -> &'static str {
        match self {
            Token::Gps => "GPS",
            Token::Imu => "IMU",
            Token::SetMode => "SETMODE",
            Token::MtrCmd => "MTRCMD",
            Token::ManLineCmd => "MANLINECMD",
            Token::ManKeyCmd => "MANKEYCMD",
        }
    }

    pub fn takes_payload(self) -> bool {
        !matches!(self, Token::Gps | Token::Imu)
    }

    pub fn once_per_cycle(self) -> bool {
        matches!(self, Token::ManLineCmd | Token::ManKeyCmd)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundBatch {
    #[serde(rename = "cmd")]
    pub commands: Vec<Token>,
    #[serde(rename = "msg_data")]
    pub payloads: BTreeMap<Token, String>,
}

impl OutboundBatch {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.payloads.is_empty()
    }
}

pub type InboundMessage = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone)]
pub enum LinkEvent {
    Started {
        session_id: Uuid,
        peer: SocketAddr,
    },
    Stopped {
        session_id: Uuid,
    },
    ConnectionTimeout {
        session_id: Uuid,
        elapsed: Duration,
    },
    DataReceived(Arc<InboundMessage>),
    DataSent(Arc<OutboundBatch>),
}

pub type EventSender = broadcast::Sender<LinkEvent>;

pub fn event_channel(capacity: usize) -> EventSender {
    let (tx, _rx) = broadcast::channel(capacity.max(1));
    tx
}

pub fn publish(events: &EventSender, event: LinkEvent) {
    let _ = events.send(event);
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStatus {
    pub connected: bool,
    pub session_id: Option<Uuid>,
    pub peer: Option<SocketAddr>,
    pub consecutive_timeouts: u32,
    pub cycles: u64,
    pub last_activity_unix_ms: Option<u64>,
    pub updated_ts_unix_ms: Option<u64>,
}

pub type SessionStatusHandle = Arc<Mutex<SessionStatus>>;

pub fn new_session_status() -> SessionStatusHandle {
    Arc::new(Mutex::new(SessionStatus::default()))
}

pub fn update_session_status<F>(status: &SessionStatusHandle, f: F)
where
    F: FnOnce(&mut SessionStatus),
{
    let mut s = status.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut s);
    s.updated_ts_unix_ms = Some(now_unix_ms());
}

pub fn read_session_status(status: &SessionStatusHandle) -> SessionStatus {
    status.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
