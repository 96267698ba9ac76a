use crate::batch::CommandBatch;
use crate::codec;
use crate::connection::Session;
use crate::error::LinkError;
use crate::liveness::{LivenessMonitor, Wait};
use crate::model::{
    now_unix_ms, publish, update_session_status, EventSender, LinkEvent, SessionStatusHandle,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExchangeContext {
    pub batch: CommandBatch,
    pub events: EventSender,
    pub status: SessionStatusHandle,
    pub shutdown: watch::Receiver<bool>,
    pub recv_buffer_bytes: usize,
}

#[derive(Debug)]
pub enum SessionEnd {
    ConnectionTimeout { elapsed: Duration },
    PeerDisconnected,
    Shutdown,
    Failed(LinkError),
}

pub async fn run(session: Session, ctx: ExchangeContext) -> SessionEnd {
    let Session {
        id,
        peer,
        stream,
        liveness,
    } = session;
    let (mut reader, mut writer) = stream.into_split();
    serve_session(id, peer, &mut reader, &mut writer, liveness, ctx).await
}

pub async fn serve_session<R, W>(
    session_id: Uuid,
    peer: SocketAddr,
    reader: &mut R,
    writer: &mut W,
    liveness: LivenessMonitor,
    ctx: ExchangeContext,
) -> SessionEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let ExchangeContext {
        batch,
        events,
        status,
        mut shutdown,
        recv_buffer_bytes,
    } = ctx;

    batch.reopen();
    update_session_status(&status, |s| {
        s.connected = true;
        s.session_id = Some(session_id);
        s.peer = Some(peer);
        s.consecutive_timeouts = 0;
        s.cycles = 0;
    });

    let end = exchange_cycles(
        reader,
        writer,
        liveness,
        &batch,
        &events,
        &status,
        &mut shutdown,
        recv_buffer_bytes,
    )
    .await;

    if let Err(err) = writer.shutdown().await {
        tracing::debug!(session_id = %session_id, error = %err, "socket already closed");
    }

    update_session_status(&status, |s| {
        s.connected = false;
        s.session_id = None;
        s.peer = None;
        s.consecutive_timeouts = 0;
    });

    // Closing refuses producers that checked the status before it flipped.
    let stale = batch.close();
    if !stale.commands.is_empty() {
        tracing::warn!(
            session_id = %session_id,
            discarded = stale.commands.len(),
            "discarding commands queued after the last send"
        );
    }

    match &end {
        SessionEnd::ConnectionTimeout { elapsed } => {
            tracing::warn!(
                session_id = %session_id,
                elapsed_s = elapsed.as_secs(),
                "no response from peer, closing session"
            );
            publish(
                &events,
                LinkEvent::ConnectionTimeout {
                    session_id,
                    elapsed: *elapsed,
                },
            );
        }
        SessionEnd::PeerDisconnected => {
            tracing::info!(session_id = %session_id, "vehicle disconnected")
        }
        SessionEnd::Shutdown => tracing::info!(session_id = %session_id, "session shut down"),
        SessionEnd::Failed(err) => {
            tracing::error!(session_id = %session_id, error = %err, "session failed")
        }
    }
    publish(&events, LinkEvent::Stopped { session_id });
    end
}

#[allow(clippy::too_many_arguments)]
async fn exchange_cycles<R, W>(
    reader: &mut R,
    writer: &mut W,
    mut liveness: LivenessMonitor,
    batch: &CommandBatch,
    events: &EventSender,
    status: &SessionStatusHandle,
    shutdown: &mut watch::Receiver<bool>,
    recv_buffer_bytes: usize,
) -> SessionEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; recv_buffer_bytes.max(1)];
    loop {
        let waited = tokio::select! {
            res = liveness.wait_inbound(reader, &mut buf) => res,
            _ = shutdown_requested(shutdown) => return SessionEnd::Shutdown,
        };
        let len = match waited {
            Ok(Wait::Data(len)) => len,
            Ok(Wait::Silent { missed }) => {
                tracing::debug!(missed, "no inbound data within liveness window");
                update_session_status(status, |s| s.consecutive_timeouts = missed);
                continue;
            }
            Err(LinkError::ConnectionTimeout { elapsed }) => {
                return SessionEnd::ConnectionTimeout { elapsed }
            }
            Err(err) if err.is_disconnect() => {
                tracing::debug!(error = %err, "session socket closed");
                return SessionEnd::PeerDisconnected;
            }
            Err(err) => return SessionEnd::Failed(err),
        };

        let inbound = codec::decode(&buf[..len]);
        publish(events, LinkEvent::DataReceived(Arc::new(inbound)));

        let outbound = batch.drain_and_clear();
        let bytes = match codec::encode(&outbound) {
            Ok(bytes) => bytes,
            Err(err) => return SessionEnd::Failed(err),
        };
        if let Err(err) = send_all(writer, &bytes).await {
            tracing::debug!(error = %err, "send failed");
            return SessionEnd::PeerDisconnected;
        }

        let missed = liveness.consecutive_timeouts();
        update_session_status(status, |s| {
            s.consecutive_timeouts = missed;
            s.cycles += 1;
            s.last_activity_unix_ms = Some(now_unix_ms());
        });
        publish(events, LinkEvent::DataSent(Arc::new(outbound)));
    }
}

async fn send_all<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

// Resolves once `true` is published. A dropped sender never resolves.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
