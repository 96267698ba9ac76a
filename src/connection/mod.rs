use crate::error::LinkError;
use crate::liveness::LivenessMonitor;
use crate::model::{publish, EventSender, LinkEvent};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub stream: TcpStream,
    pub liveness: LivenessMonitor,
}

#[derive(Debug)]
pub enum AcceptOutcome {
    Connected(Session),
    NoPeer,
}

// Listening socket that serves a single session. `accept` consumes the
// manager; serving another peer means listening again.
#[derive(Debug)]
pub struct ConnectionManager {
    listener: TcpListener,
    local_addr: SocketAddr,
    accept_timeout: Duration,
    events: EventSender,
}

impl ConnectionManager {
    pub async fn listen(
        host: &str,
        port: u16,
        accept_timeout: Duration,
        events: EventSender,
    ) -> Result<Self, LinkError> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(addr.as_str())
            .await
            .map_err(|source| LinkError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| LinkError::Bind {
            addr: addr.clone(),
            source,
        })?;
        tracing::info!(addr = %local_addr, "listening for vehicle");
        Ok(Self {
            listener,
            local_addr,
            accept_timeout,
            events,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn accept(self, liveness: LivenessMonitor) -> Result<AcceptOutcome, LinkError> {
        let (stream, peer) =
            match tokio::time::timeout(self.accept_timeout, self.listener.accept()).await {
                Err(_) => {
                    tracing::debug!(
                        timeout_ms = self.accept_timeout.as_millis() as u64,
                        "no peer connected before accept timeout"
                    );
                    return Ok(AcceptOutcome::NoPeer);
                }
                Ok(res) => res.map_err(LinkError::Accept)?,
            };
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(error = %err, "unable to disable nagle on session socket");
        }

        let session = Session {
            id: Uuid::new_v4(),
            peer,
            stream,
            liveness,
        };
        tracing::info!(session_id = %session.id, peer = %peer, "vehicle connected");
        publish(
            &self.events,
            LinkEvent::Started {
                session_id: session.id,
                peer,
            },
        );
        Ok(AcceptOutcome::Connected(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event_channel;

    #[tokio::test]
    async fn accept_yields_session_and_started_event() {
        let events = event_channel(8);
        let mut rx = events.subscribe();
        let manager = ConnectionManager::listen("127.0.0.1", 0, Duration::from_secs(2), events)
            .await
            .unwrap();
        let addr = manager.local_addr();

        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let outcome = manager.accept(LivenessMonitor::default()).await.unwrap();
        let _client = client.await.unwrap();

        let session = match outcome {
            AcceptOutcome::Connected(session) => session,
            AcceptOutcome::NoPeer => panic!("expected a session"),
        };
        match rx.recv().await.unwrap() {
            LinkEvent::Started { session_id, peer } => {
                assert_eq!(session_id, session.id);
                assert_eq!(peer, session.peer);
            }
            other => panic!("expected started event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn accept_times_out_without_peer() {
        let events = event_channel(8);
        let manager =
            ConnectionManager::listen("127.0.0.1", 0, Duration::from_millis(30), events)
                .await
                .unwrap();
        let outcome = manager.accept(LivenessMonitor::default()).await.unwrap();
        assert!(matches!(outcome, AcceptOutcome::NoPeer));
    }

    #[tokio::test]
    async fn bind_conflict_is_surfaced() {
        let events = event_channel(8);
        let first = ConnectionManager::listen("127.0.0.1", 0, DEFAULT_ACCEPT_TIMEOUT, events.clone())
            .await
            .unwrap();
        let port = first.local_addr().port();

        let err = ConnectionManager::listen("127.0.0.1", port, DEFAULT_ACCEPT_TIMEOUT, events)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Bind { .. }));
    }
}
