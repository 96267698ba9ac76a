use crate::error::{CommandParseError, ProducerError};
use crate::model::{read_session_status, LinkEvent};
use crate::producers::{
    CommandSource, ModeRequest, OperatorStation, PowerLevel, TelemetryKind,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;

const HELP: &str = "\
commands:
  gps | imu                 request telemetry once
  auto gps|imu on|off       toggle periodic telemetry requests
  mode man|rmt|auto         select control mode (same mode again releases it)
  motor start|stop          motor command
  line <text>               send a manual command line
  key w|a|s|d               manual drive key (manual mode only)
  power <0-100>             set manual drive power
  status                    show session status
  quit                      shut the bridge down";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Request(TelemetryKind),
    Auto(TelemetryKind, bool),
    Mode(ModeRequest),
    MotorStart,
    MotorStop,
    Line(String),
    Key(char),
    Power(String),
    Status,
    Help,
    Quit,
}

pub fn parse(input: &str) -> Result<OperatorCommand, CommandParseError> {
    let input = input.trim_start();
    let (head, rest) = input.split_once(' ').unwrap_or((input, ""));
    let args: Vec<&str> = rest.split_whitespace().collect();
    let command = match (head.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("gps", []) => OperatorCommand::Request(TelemetryKind::Gps),
        ("imu", []) => OperatorCommand::Request(TelemetryKind::Imu),
        ("auto", [kind, state]) => {
            OperatorCommand::Auto(parse_kind(kind)?, parse_switch(state)?)
        }
        ("auto", _) => return Err(CommandParseError::Usage("auto gps|imu on|off")),
        ("mode", [mode]) => OperatorCommand::Mode(match mode.to_ascii_lowercase().as_str() {
            "man" | "manual" => ModeRequest::Manual,
            "rmt" | "remote" => ModeRequest::Remote,
            "auto" => ModeRequest::Auto,
            _ => return Err(CommandParseError::Usage("mode man|rmt|auto")),
        }),
        ("mode", _) => return Err(CommandParseError::Usage("mode man|rmt|auto")),
        ("motor", ["start"]) => OperatorCommand::MotorStart,
        ("motor", ["stop"]) => OperatorCommand::MotorStop,
        ("motor", _) => return Err(CommandParseError::Usage("motor start|stop")),
        // The line is sent verbatim, inner spacing included.
        ("line", _) => OperatorCommand::Line(rest.to_string()),
        ("key", [key]) if key.chars().count() == 1 => {
            OperatorCommand::Key(key.chars().next().unwrap_or_default())
        }
        ("key", _) => return Err(CommandParseError::Usage("key w|a|s|d")),
        ("power", _) => OperatorCommand::Power(rest.trim().to_string()),
        ("status", []) => OperatorCommand::Status,
        ("help", _) | ("?", _) => OperatorCommand::Help,
        ("quit", []) | ("exit", []) => OperatorCommand::Quit,
        _ => return Err(CommandParseError::Unknown(head.to_string())),
    };
    Ok(command)
}

fn parse_kind(kind: &str) -> Result<TelemetryKind, CommandParseError> {
    match kind.to_ascii_lowercase().as_str() {
        "gps" => Ok(TelemetryKind::Gps),
        "imu" => Ok(TelemetryKind::Imu),
        _ => Err(CommandParseError::Usage("auto gps|imu on|off")),
    }
}

fn parse_switch(state: &str) -> Result<bool, CommandParseError> {
    match state.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        _ => Err(CommandParseError::Usage("auto gps|imu on|off")),
    }
}

pub fn execute(station: &mut OperatorStation, command: OperatorCommand) -> Result<String, ProducerError> {
    let reply = match command {
        OperatorCommand::Request(kind) => {
            station.telemetry.request(kind)?;
            format!("{} requested", kind.token())
        }
        OperatorCommand::Auto(kind, enabled) => {
            station.telemetry.set_auto(kind, enabled);
            format!(
                "auto {} {}",
                kind.token(),
                if enabled { "enabled" } else { "disabled" }
            )
        }
        OperatorCommand::Mode(request) => {
            let mode = station.mode.select(request)?;
            format!("mode: {}", mode.label())
        }
        OperatorCommand::MotorStart => {
            station.motor.start()?;
            "motor start sent".to_string()
        }
        OperatorCommand::MotorStop => {
            station.motor.stop()?;
            "motor stop sent".to_string()
        }
        OperatorCommand::Line(line) => {
            station.line.send(&line)?;
            format!("line queued: {line}")
        }
        OperatorCommand::Key(key) => {
            station.press_key(key)?;
            format!("key {key} at power {}", station.power.get())
        }
        OperatorCommand::Power(input) => {
            station.power = PowerLevel::parse_input(&input)?;
            format!("power: {}", station.power.get())
        }
        OperatorCommand::Status => {
            let link = station.telemetry.link();
            let status = read_session_status(link.status());
            let peer = status
                .peer
                .map(|p| p.ip().to_string())
                .unwrap_or_else(|| "not connected".to_string());
            format!(
                "link: {peer} | mode: {} | motor: {} | power: {} | queued: {} | cycles: {} | missed windows: {}",
                station.mode.current().label(),
                if station.motor.is_running() { "running" } else { "stopped" },
                station.power.get(),
                link.pending(),
                status.cycles,
                status.consecutive_timeouts,
            )
        }
        OperatorCommand::Help => HELP.to_string(),
        OperatorCommand::Quit => "shutting down".to_string(),
    };
    Ok(reply)
}

pub async fn run<R>(
    input: R,
    mut station: OperatorStation,
    mut events: broadcast::Receiver<LinkEvent>,
    shutdown: watch::Sender<bool>,
) -> OperatorStation
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        tracing::debug!("operator input closed");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "operator input failed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match parse(&line) {
                    Ok(command) => command,
                    Err(err) => {
                        println!("{err}");
                        continue;
                    }
                };
                let quit = command == OperatorCommand::Quit;
                match execute(&mut station, command) {
                    Ok(reply) => println!("{reply}"),
                    Err(err) => println!("refused: {err}"),
                }
                if quit {
                    let _ = shutdown.send(true);
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(LinkEvent::Stopped { .. }) => station.session_ended(),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }
    station
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::CommandBatch;
    use crate::config::Config;
    use crate::model::{event_channel, new_session_status, publish, update_session_status, Token};
    use crate::producers::ProducerLink;

    fn station(connected: bool) -> (OperatorStation, CommandBatch) {
        let batch = CommandBatch::new();
        let status = new_session_status();
        update_session_status(&status, |s| s.connected = connected);
        let link = ProducerLink::new(batch.clone(), status);
        (OperatorStation::new(link, &Config::default()), batch)
    }

    #[test]
    fn parses_operator_commands() {
        assert_eq!(parse("gps"), Ok(OperatorCommand::Request(TelemetryKind::Gps)));
        assert_eq!(
            parse("auto imu on"),
            Ok(OperatorCommand::Auto(TelemetryKind::Imu, true))
        );
        assert_eq!(parse("mode RMT"), Ok(OperatorCommand::Mode(ModeRequest::Remote)));
        assert_eq!(parse("motor stop"), Ok(OperatorCommand::MotorStop));
        assert_eq!(parse("key d"), Ok(OperatorCommand::Key('d')));
        assert_eq!(parse("power 75"), Ok(OperatorCommand::Power("75".to_string())));
        assert_eq!(parse("quit"), Ok(OperatorCommand::Quit));
    }

    #[test]
    fn line_text_is_kept_verbatim() {
        assert_eq!(
            parse("line SET  SPEED 5"),
            Ok(OperatorCommand::Line("SET  SPEED 5".to_string()))
        );
        assert_eq!(parse("line"), Ok(OperatorCommand::Line(String::new())));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(parse("warp 9"), Err(CommandParseError::Unknown(_))));
        assert!(matches!(parse("mode fly"), Err(CommandParseError::Usage(_))));
        assert!(matches!(parse("key wa"), Err(CommandParseError::Usage(_))));
        assert!(matches!(parse("auto gps maybe"), Err(CommandParseError::Usage(_))));
    }

    #[test]
    fn execute_queues_commands_on_the_batch() {
        let (mut station, batch) = station(true);
        execute(&mut station, OperatorCommand::Mode(ModeRequest::Manual)).unwrap();
        execute(&mut station, OperatorCommand::Power("120".to_string())).unwrap();
        execute(&mut station, OperatorCommand::Key('w')).unwrap();
        execute(&mut station, OperatorCommand::Request(TelemetryKind::Gps)).unwrap();

        let drained = batch.drain_and_clear();
        assert_eq!(
            drained.commands,
            vec![Token::SetMode, Token::ManKeyCmd, Token::Gps]
        );
        assert_eq!(drained.payloads[&Token::ManKeyCmd], "F100");
        assert_eq!(drained.payloads[&Token::SetMode], "MAN");
    }

    #[test]
    fn execute_reports_refusals() {
        let (mut station, _batch) = station(false);
        assert_eq!(
            execute(&mut station, OperatorCommand::MotorStart),
            Err(ProducerError::NotConnected)
        );
        let status = execute(&mut station, OperatorCommand::Status).unwrap();
        assert!(status.contains("not connected"));
    }

    #[tokio::test]
    async fn console_quits_and_signals_shutdown() {
        let (station, batch) = station(true);
        let events = event_channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let input: &[u8] = b"imu\n\nbogus\nquit\ngps\n";

        run(input, station, events.subscribe(), shutdown_tx).await;

        assert!(*shutdown_rx.borrow());
        assert_eq!(batch.drain_and_clear().commands, vec![Token::Imu]);
    }

    #[tokio::test]
    async fn session_stop_resets_motor_state() {
        let (mut station, _batch) = station(true);
        station.motor.start().unwrap();
        let events = event_channel(8);
        let rx = events.subscribe();
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        publish(
            &events,
            LinkEvent::Stopped {
                session_id: uuid::Uuid::new_v4(),
            },
        );
        drop(events);

        let (_writer, reader) = tokio::io::duplex(64);
        let station = run(tokio::io::BufReader::new(reader), station, rx, shutdown_tx).await;
        assert!(!station.motor.is_running());
    }
}
