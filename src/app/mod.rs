use crate::batch::CommandBatch;
use crate::config::{Config, LinkConfig};
use crate::connection::{AcceptOutcome, ConnectionManager};
use crate::error::LinkError;
use crate::exchange::{self, ExchangeContext, SessionEnd};
use crate::liveness::LivenessMonitor;
use crate::model::{event_channel, new_session_status, EventSender, SessionStatusHandle};
use crate::producers::{OperatorStation, ProducerLink};
use tokio::sync::watch;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    if let Some(ref command) = std::env::args().nth(1) {
        if command == "config-init" {
            return handle_config_init();
        }
        if command == "config-show" {
            return handle_config_show(&config);
        }
    }

    let events = event_channel(config.events.capacity);
    let batch = CommandBatch::new();
    let status = new_session_status();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let display_task = crate::display::spawn(events.subscribe());

    let link = ProducerLink::new(batch.clone(), status.clone());
    let station = OperatorStation::new(link, &config);
    let poll_task = station
        .telemetry
        .clone()
        .spawn(config.telemetry.auto_poll_interval());

    let console_events = events.subscribe();
    let console_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        crate::console::run(stdin, station, console_events, console_shutdown).await;
    });

    let signal_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("shutdown: ctrl-c");
            let _ = signal_shutdown.send(true);
        }
    });

    println!("Operator console ready, type `help` for commands");

    let res = serve_link(&config.link, &events, &batch, &status, shutdown_rx).await;

    poll_task.abort();
    drop(events);
    let _ = display_task.await;
    res?;
    Ok(())
}

async fn serve_link(
    link: &LinkConfig,
    events: &EventSender,
    batch: &CommandBatch,
    status: &SessionStatusHandle,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), LinkError> {
    loop {
        let manager = ConnectionManager::listen(
            &link.host,
            link.port,
            link.accept_timeout(),
            events.clone(),
        )
        .await?;

        tracing::debug!(addr = %manager.local_addr(), "awaiting vehicle");
        let liveness = LivenessMonitor::new(link.liveness_window(), link.max_consecutive_timeouts);
        let outcome = tokio::select! {
            res = manager.accept(liveness) => res?,
            _ = exchange::shutdown_requested(&mut shutdown) => return Ok(()),
        };

        match outcome {
            AcceptOutcome::NoPeer => {
                tracing::info!(
                    timeout_ms = link.accept_timeout_ms,
                    "no vehicle connected"
                );
            }
            AcceptOutcome::Connected(session) => {
                let ctx = ExchangeContext {
                    batch: batch.clone(),
                    events: events.clone(),
                    status: status.clone(),
                    shutdown: shutdown.clone(),
                    recv_buffer_bytes: link.recv_buffer_bytes,
                };
                if let SessionEnd::Shutdown = exchange::run(session, ctx).await {
                    return Ok(());
                }
            }
        }

        if !link.relisten || *shutdown.borrow() {
            return Ok(());
        }
    }
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn handle_config_show(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{read_session_status, LinkEvent};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn link_config(port: u16) -> LinkConfig {
        LinkConfig {
            host: "127.0.0.1".to_string(),
            port,
            accept_timeout_ms: 100,
            liveness_window_ms: 100,
            max_consecutive_timeouts: 3,
            recv_buffer_bytes: 1024,
            relisten: false,
        }
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn returns_after_one_empty_accept_window_without_relisten() {
        let events = event_channel(8);
        let (_tx, rx) = watch::channel(false);
        let res = tokio::time::timeout(
            Duration::from_secs(2),
            serve_link(
                &link_config(0),
                &events,
                &CommandBatch::new(),
                &new_session_status(),
                rx,
            ),
        )
        .await
        .unwrap();
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn shutdown_interrupts_accept() {
        let mut link = link_config(0);
        link.accept_timeout_ms = 60_000;
        link.relisten = true;
        let events = event_channel(8);
        let (tx, rx) = watch::channel(false);
        let batch = CommandBatch::new();
        let status = new_session_status();
        let serve = serve_link(&link, &events, &batch, &status, rx);
        tokio::pin!(serve);

        tokio::select! {
            _ = &mut serve => panic!("serve returned before shutdown"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        tx.send(true).unwrap();
        let res = tokio::time::timeout(Duration::from_secs(2), serve)
            .await
            .unwrap();
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn serves_a_vehicle_and_delivers_queued_commands() {
        let port = free_port();
        let mut link = link_config(port);
        link.accept_timeout_ms = 2_000;
        let events = event_channel(32);
        let mut rx = events.subscribe();
        let (_tx, shutdown_rx) = watch::channel(false);
        let batch = CommandBatch::new();
        let status = new_session_status();
        batch.add_simple(crate::model::Token::Gps).unwrap();

        let server = {
            let events = events.clone();
            let batch = batch.clone();
            let status = status.clone();
            tokio::spawn(async move {
                serve_link(&link, &events, &batch, &status, shutdown_rx)
                    .await
                    .map_err(|err| err.to_string())
            })
        };

        let mut stream = None;
        for _ in 0..50 {
            match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
        let mut stream = stream.expect("bridge never started listening");
        stream.write_all(br#"{"status":"PING"}"#).await.unwrap();
        let mut buf = [0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        let batch_json: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(batch_json["cmd"], serde_json::json!(["GPS"]));
        drop(stream);

        let res = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap();
        assert!(res.is_ok());
        assert!(!read_session_status(&status).connected);

        let mut saw_started = false;
        let mut saw_stopped = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                LinkEvent::Started { .. } => saw_started = true,
                LinkEvent::Stopped { .. } => saw_stopped = true,
                _ => {}
            }
        }
        assert!(saw_started && saw_stopped);
    }
}
