use crate::batch::{Admission, CommandBatch};
use crate::config::Config;
use crate::error::{BatchError, ProducerError};
use crate::model::{read_session_status, SessionStatusHandle, Token};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct ProducerLink {
    batch: CommandBatch,
    status: SessionStatusHandle,
}

impl ProducerLink {
    pub fn new(batch: CommandBatch, status: SessionStatusHandle) -> Self {
        Self { batch, status }
    }

    pub fn is_connected(&self) -> bool {
        read_session_status(&self.status).connected
    }

    pub fn status(&self) -> &SessionStatusHandle {
        &self.status
    }

    pub fn pending(&self) -> usize {
        self.batch.pending_len()
    }
}

pub trait CommandSource {
    fn name(&self) -> &'static str;

    fn link(&self) -> &ProducerLink;

    fn submit(&self, token: Token, payload: Option<String>) -> Result<Admission, ProducerError> {
        let link = self.link();
        if !link.is_connected() {
            tracing::debug!(source = self.name(), token = %token, "no active session, command dropped");
            return Err(ProducerError::NotConnected);
        }
        let added = match payload {
            Some(value) => link.batch.add_with_payload(token, value),
            None => link.batch.add_simple(token),
        };
        let admission = match added {
            Ok(admission) => admission,
            Err(BatchError::Closed) => return Err(ProducerError::NotConnected),
            Err(err) => return Err(err.into()),
        };
        tracing::debug!(source = self.name(), token = %token, ?admission, "command queued");
        Ok(admission)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Manual,
    Remote,
    Undefined,
}

impl ControlMode {
    pub fn label(self) -> &'static str {
        match self {
            ControlMode::Manual => "Manual",
            ControlMode::Remote => "Remote",
            ControlMode::Undefined => "Undefined",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeRequest {
    Manual,
    Remote,
    Auto,
}

#[derive(Debug)]
pub struct ModeControl {
    link: ProducerLink,
    mode: ControlMode,
}

impl ModeControl {
    pub fn new(link: ProducerLink) -> Self {
        Self {
            link,
            mode: ControlMode::Undefined,
        }
    }

    pub fn current(&self) -> ControlMode {
        self.mode
    }

    // Picking the active mode again releases it without telling the vehicle.
    pub fn select(&mut self, request: ModeRequest) -> Result<ControlMode, ProducerError> {
        let (target, wire_id) = match request {
            ModeRequest::Manual => (ControlMode::Manual, "MAN"),
            ModeRequest::Remote => (ControlMode::Remote, "RMT"),
            ModeRequest::Auto => {
                self.mode = ControlMode::Undefined;
                return Err(ProducerError::UnsupportedMode("auto"));
            }
        };
        if self.mode == target {
            self.mode = ControlMode::Undefined;
            return Ok(self.mode);
        }
        self.submit(Token::SetMode, Some(wire_id.to_string()))?;
        self.mode = target;
        Ok(self.mode)
    }
}

impl CommandSource for ModeControl {
    fn name(&self) -> &'static str {
        "mode"
    }

    fn link(&self) -> &ProducerLink {
        &self.link
    }
}

#[derive(Debug)]
pub struct MotorControl {
    link: ProducerLink,
    running: bool,
}

impl MotorControl {
    pub fn new(link: ProducerLink) -> Self {
        Self {
            link,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) -> Result<Admission, ProducerError> {
        if self.running {
            return Err(ProducerError::MotorState("running"));
        }
        let admission = self.submit(Token::MtrCmd, Some("START".to_string()))?;
        self.running = true;
        Ok(admission)
    }

    pub fn stop(&mut self) -> Result<Admission, ProducerError> {
        if !self.running {
            return Err(ProducerError::MotorState("stopped"));
        }
        let admission = self.submit(Token::MtrCmd, Some("STOP".to_string()))?;
        self.running = false;
        Ok(admission)
    }

    pub fn reset(&mut self) {
        self.running = false;
    }
}

impl CommandSource for MotorControl {
    fn name(&self) -> &'static str {
        "motor"
    }

    fn link(&self) -> &ProducerLink {
        &self.link
    }
}

#[derive(Debug)]
pub struct ManualCommandLine {
    link: ProducerLink,
}

impl ManualCommandLine {
    pub fn new(link: ProducerLink) -> Self {
        Self { link }
    }

    pub fn send(&self, line: &str) -> Result<Admission, ProducerError> {
        if !self.link.is_connected() {
            return Err(ProducerError::NotConnected);
        }
        if line.is_empty() {
            return Err(ProducerError::EmptyLine);
        }
        self.submit(Token::ManLineCmd, Some(format!("{line}\r\n")))
    }
}

impl CommandSource for ManualCommandLine {
    fn name(&self) -> &'static str {
        "manual-line"
    }

    fn link(&self) -> &ProducerLink {
        &self.link
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerLevel(u8);

impl PowerLevel {
    pub const MAX: u8 = 100;

    pub fn new(value: u8) -> Self {
        Self(value.min(Self::MAX))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn parse_input(input: &str) -> Result<Self, ProducerError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self(0));
        }
        let value: i64 = trimmed
            .parse()
            .map_err(|_| ProducerError::InvalidPower(trimmed.to_string()))?;
        Ok(Self(value.clamp(0, i64::from(Self::MAX)) as u8))
    }
}

#[derive(Debug)]
pub struct ManualKeys {
    link: ProducerLink,
}

impl ManualKeys {
    pub fn new(link: ProducerLink) -> Self {
        Self { link }
    }

    pub fn direction(key: char) -> Option<char> {
        match key.to_ascii_lowercase() {
            'w' => Some('F'),
            's' => Some('B'),
            'a' => Some('L'),
            'd' => Some('R'),
            _ => None,
        }
    }

    pub fn press(
        &self,
        key: char,
        mode: ControlMode,
        power: PowerLevel,
    ) -> Result<Admission, ProducerError> {
        if !self.link.is_connected() {
            return Err(ProducerError::NotConnected);
        }
        if mode != ControlMode::Manual {
            return Err(ProducerError::NotManualMode);
        }
        let direction = Self::direction(key).ok_or(ProducerError::UnmappedKey(key))?;
        self.submit(Token::ManKeyCmd, Some(format!("{direction}{}", power.get())))
    }
}

impl CommandSource for ManualKeys {
    fn name(&self) -> &'static str {
        "manual-keys"
    }

    fn link(&self) -> &ProducerLink {
        &self.link
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryKind {
    Gps,
    Imu,
}

impl TelemetryKind {
    pub const ALL: [TelemetryKind; 2] = [TelemetryKind::Gps, TelemetryKind::Imu];

    pub fn token(self) -> Token {
        match self {
            TelemetryKind::Gps => Token::Gps,
            TelemetryKind::Imu => Token::Imu,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryPoller {
    link: ProducerLink,
    auto_gps: Arc<AtomicBool>,
    auto_imu: Arc<AtomicBool>,
}

impl TelemetryPoller {
    pub fn new(link: ProducerLink) -> Self {
        Self {
            link,
            auto_gps: Arc::new(AtomicBool::new(false)),
            auto_imu: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request(&self, kind: TelemetryKind) -> Result<Admission, ProducerError> {
        self.submit(kind.token(), None)
    }

    pub fn set_auto(&self, kind: TelemetryKind, enabled: bool) {
        self.switch(kind).store(enabled, Ordering::Relaxed);
    }

    pub fn auto_enabled(&self, kind: TelemetryKind) -> bool {
        self.switch(kind).load(Ordering::Relaxed)
    }

    pub fn tick(&self) -> usize {
        if !self.link.is_connected() {
            return 0;
        }
        TelemetryKind::ALL
            .into_iter()
            .filter(|kind| self.auto_enabled(*kind))
            .filter(|kind| self.request(*kind).is_ok())
            .count()
    }

    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.tick();
            }
        })
    }

    fn switch(&self, kind: TelemetryKind) -> &AtomicBool {
        match kind {
            TelemetryKind::Gps => &self.auto_gps,
            TelemetryKind::Imu => &self.auto_imu,
        }
    }
}

impl CommandSource for TelemetryPoller {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    fn link(&self) -> &ProducerLink {
        &self.link
    }
}

#[derive(Debug)]
pub struct OperatorStation {
    pub mode: ModeControl,
    pub motor: MotorControl,
    pub line: ManualCommandLine,
    pub keys: ManualKeys,
    pub power: PowerLevel,
    pub telemetry: TelemetryPoller,
}

impl OperatorStation {
    pub fn new(link: ProducerLink, config: &Config) -> Self {
        let telemetry = TelemetryPoller::new(link.clone());
        telemetry.set_auto(TelemetryKind::Gps, config.telemetry.auto_gps);
        telemetry.set_auto(TelemetryKind::Imu, config.telemetry.auto_imu);
        Self {
            mode: ModeControl::new(link.clone()),
            motor: MotorControl::new(link.clone()),
            line: ManualCommandLine::new(link.clone()),
            keys: ManualKeys::new(link),
            power: PowerLevel::new(config.manual.power),
            telemetry,
        }
    }

    pub fn press_key(&self, key: char) -> Result<Admission, ProducerError> {
        self.keys.press(key, self.mode.current(), self.power)
    }

    pub fn session_ended(&mut self) {
        self.motor.reset();
    }
}
