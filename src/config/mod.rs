use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "ROVERLINK_";
const LEGACY_HOST_VAR: &str = "SERVER_HOST";
const MIN_AUTO_POLL_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub link: LinkConfig,
    pub events: EventsConfig,
    pub telemetry: TelemetryConfig,
    pub manual: ManualConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
    pub accept_timeout_ms: u64,
    pub liveness_window_ms: u64,
    pub max_consecutive_timeouts: u32,
    pub recv_buffer_bytes: usize,
    // Listen again once a session ends or no peer showed up.
    pub relisten: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: crate::connection::DEFAULT_PORT,
            accept_timeout_ms: crate::connection::DEFAULT_ACCEPT_TIMEOUT.as_millis() as u64,
            liveness_window_ms: crate::liveness::DEFAULT_WINDOW.as_millis() as u64,
            max_consecutive_timeouts: crate::liveness::DEFAULT_MAX_CONSECUTIVE,
            recv_buffer_bytes: crate::codec::MAX_CHUNK_SIZE,
            relisten: true,
        }
    }
}

impl LinkConfig {
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub auto_poll_interval_ms: u64,
    pub auto_gps: bool,
    pub auto_imu: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            auto_poll_interval_ms: 300,
            auto_gps: false,
            auto_imu: false,
        }
    }
}

impl TelemetryConfig {
    pub fn auto_poll_interval(&self) -> Duration {
        Duration::from_millis(self.auto_poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ManualConfig {
    pub power: u8,
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        // A missing .env is the normal case.
        let _ = dotenvy::dotenv();

        let mut config = Self::default();
        let config_path = active_config_path();

        if let Ok(raw) = fs::read_to_string(&config_path) {
            match toml::from_str::<Config>(&raw) {
                Ok(file_config) => config = file_config,
                Err(err) => tracing::warn!(
                    path = %config_path.display(),
                    error = %err,
                    "ignoring unreadable config file"
                ),
            }
        }

        config.apply_overrides(|key| env::var(key).ok());

        config.validate()?;
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        // Link settings
        if let Some(val) = lookup(LEGACY_HOST_VAR) {
            self.link.host = val;
        }
        if let Some(val) = var("HOST") {
            self.link.host = val;
        }
        if let Some(port) = var("PORT").and_then(|v| v.parse().ok()) {
            self.link.port = port;
        }
        if let Some(ms) = var("ACCEPT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.link.accept_timeout_ms = ms;
        }
        if let Some(ms) = var("LIVENESS_WINDOW_MS").and_then(|v| v.parse().ok()) {
            self.link.liveness_window_ms = ms;
        }
        if let Some(max) = var("MAX_CONSECUTIVE_TIMEOUTS").and_then(|v| v.parse().ok()) {
            self.link.max_consecutive_timeouts = max;
        }
        if let Some(bytes) = var("RECV_BUFFER_BYTES").and_then(|v| v.parse().ok()) {
            self.link.recv_buffer_bytes = bytes;
        }
        if let Some(val) = var("RELISTEN") {
            self.link.relisten = val.parse().unwrap_or(true);
        }

        // Event bus
        if let Some(capacity) = var("EVENT_CAPACITY").and_then(|v| v.parse().ok()) {
            self.events.capacity = capacity;
        }

        // Telemetry polling
        if let Some(ms) = var("AUTO_POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.telemetry.auto_poll_interval_ms = ms;
        }
        if let Some(val) = var("AUTO_GPS") {
            self.telemetry.auto_gps = val.parse().unwrap_or(false);
        }
        if let Some(val) = var("AUTO_IMU") {
            self.telemetry.auto_imu = val.parse().unwrap_or(false);
        }

        if let Some(power) = var("MANUAL_POWER").and_then(|v| v.parse().ok()) {
            self.manual.power = power;
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.link.host.trim().is_empty() {
            return Err("link.host must be set".into());
        }
        if self.link.port == 0 {
            return Err("link.port must be non-zero".into());
        }
        if self.link.accept_timeout_ms == 0 {
            return Err("link.accept_timeout_ms must be non-zero".into());
        }
        if self.link.liveness_window_ms == 0 {
            return Err("link.liveness_window_ms must be non-zero".into());
        }
        if self.link.max_consecutive_timeouts == 0 {
            return Err("link.max_consecutive_timeouts must be non-zero".into());
        }
        if self.link.recv_buffer_bytes == 0 {
            return Err("link.recv_buffer_bytes must be non-zero".into());
        }
        if self.events.capacity == 0 {
            return Err("events.capacity must be non-zero".into());
        }
        if self.telemetry.auto_poll_interval_ms < MIN_AUTO_POLL_INTERVAL_MS {
            return Err(format!(
                "telemetry.auto_poll_interval_ms must be >= {MIN_AUTO_POLL_INTERVAL_MS}"
            )
            .into());
        }
        if self.manual.power > 100 {
            return Err("manual.power must be within 0..=100".into());
        }
        Ok(())
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err("config.toml already exists".into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    let base = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| env::var("HOME").map(|home| Path::new(&home).join(".config")))
        .unwrap_or_else(|_| PathBuf::from("."));
    base.join("rover-link").join(CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}
