use crate::error::SentenceError;
use crate::model::{InboundMessage, LinkEvent};
use serde_json::Value;
use std::str::FromStr;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

const RESPONSE_STATUS: &str = "RESPONSE";
const TELEMETRY_KEYS: [&str; 2] = ["GPSRESPONSE", "IMURESPONSE"];
const GPS_IDENTIFIER: &str = "D,s,1,1";
const IMU_IDENTIFIER: &str = "D,s,1,3";

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryReading {
    pub kind: &'static str,
    pub value: Value,
}

impl TelemetryReading {
    pub fn decode(&self) -> Result<Telemetry, SentenceError> {
        self.value
            .as_str()
            .ok_or(SentenceError::NotText)?
            .parse()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub north_south: char,
    pub longitude: f64,
    pub east_west: char,
    pub altitude: f64,
    pub ground_speed: f64,
    pub crc: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImuSample {
    pub axl_x: f64,
    pub axl_y: f64,
    pub axl_z: f64,
    pub crc: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    Gps(GpsFix),
    Imu(ImuSample),
}

// "<identifier: 4 fields>,<data...>,*<crc>"
struct Sentence<'a> {
    identifier: String,
    data: Vec<&'a str>,
    crc: u32,
}

impl<'a> Sentence<'a> {
    fn split(raw: &'a str) -> Result<Self, SentenceError> {
        let fields: Vec<&str> = raw.trim().split(',').collect();
        if fields.len() < 5 {
            return Err(SentenceError::FieldCount {
                expected: 5,
                found: fields.len(),
            });
        }
        let (head, rest) = fields.split_at(4);
        let (crc_field, data) = rest.split_last().ok_or(SentenceError::MissingCrc)?;
        let crc = crc_field
            .strip_prefix('*')
            .ok_or(SentenceError::MissingCrc)?;
        let crc = crc
            .parse()
            .map_err(|_| SentenceError::BadCrc(crc.to_string()))?;
        Ok(Self {
            identifier: head.join(","),
            data: data.to_vec(),
            crc,
        })
    }
}

fn number(field: &'static str, value: &str) -> Result<f64, SentenceError> {
    value.trim().parse().map_err(|_| SentenceError::BadField {
        field,
        value: value.to_string(),
    })
}

fn hemisphere(field: &'static str, value: &str, allowed: [char; 2]) -> Result<char, SentenceError> {
    match value.trim().chars().collect::<Vec<_>>().as_slice() {
        [c] if allowed.contains(c) => Ok(*c),
        _ => Err(SentenceError::BadField {
            field,
            value: value.to_string(),
        }),
    }
}

impl GpsFix {
    fn from_sentence(sentence: &Sentence<'_>) -> Result<Self, SentenceError> {
        // lat, N/S, lon, E/W, altitude, time, course, ground speed
        let [lat, ns, lon, ew, alt, time, course, speed] = sentence.data.as_slice() else {
            return Err(SentenceError::FieldCount {
                expected: 8,
                found: sentence.data.len(),
            });
        };
        number("time", time)?;
        number("course", course)?;
        Ok(Self {
            latitude: number("latitude", lat)?,
            north_south: hemisphere("north_south", ns, ['N', 'S'])?,
            longitude: number("longitude", lon)?,
            east_west: hemisphere("east_west", ew, ['E', 'W'])?,
            altitude: number("altitude", alt)?,
            ground_speed: number("ground_speed", speed)?,
            crc: sentence.crc,
        })
    }
}

impl ImuSample {
    fn from_sentence(sentence: &Sentence<'_>) -> Result<Self, SentenceError> {
        let [x, y, z, ..] = sentence.data.as_slice() else {
            return Err(SentenceError::FieldCount {
                expected: 3,
                found: sentence.data.len(),
            });
        };
        Ok(Self {
            axl_x: number("axl_x", x)?,
            axl_y: number("axl_y", y)?,
            axl_z: number("axl_z", z)?,
            crc: sentence.crc,
        })
    }
}

impl FromStr for GpsFix {
    type Err = SentenceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.parse::<Telemetry>()? {
            Telemetry::Gps(fix) => Ok(fix),
            Telemetry::Imu(_) => Err(SentenceError::UnknownIdentifier(IMU_IDENTIFIER.to_string())),
        }
    }
}

impl FromStr for ImuSample {
    type Err = SentenceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.parse::<Telemetry>()? {
            Telemetry::Imu(sample) => Ok(sample),
            Telemetry::Gps(_) => Err(SentenceError::UnknownIdentifier(GPS_IDENTIFIER.to_string())),
        }
    }
}

impl FromStr for Telemetry {
    type Err = SentenceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let sentence = Sentence::split(raw)?;
        match sentence.identifier.as_str() {
            GPS_IDENTIFIER => GpsFix::from_sentence(&sentence).map(Telemetry::Gps),
            IMU_IDENTIFIER => ImuSample::from_sentence(&sentence).map(Telemetry::Imu),
            other => Err(SentenceError::UnknownIdentifier(other.to_string())),
        }
    }
}

pub fn telemetry_readings(message: &InboundMessage) -> Vec<TelemetryReading> {
    if message.get("status").and_then(Value::as_str) != Some(RESPONSE_STATUS) {
        return Vec::new();
    }
    let Some(data) = message.get("msg_data").and_then(Value::as_object) else {
        return Vec::new();
    };
    TELEMETRY_KEYS
        .into_iter()
        .filter_map(|kind| {
            data.get(kind).map(|value| TelemetryReading {
                kind,
                value: value.clone(),
            })
        })
        .collect()
}

// Status chatter that only carries INFO stays off the operator's terminal.
pub fn is_info_only(message: &InboundMessage) -> bool {
    message
        .get("msg_data")
        .and_then(Value::as_object)
        .is_some_and(|data| data.len() == 1 && data.contains_key("INFO"))
}

pub fn spawn(mut rx: broadcast::Receiver<LinkEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => show(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "display fell behind link events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn show(event: &LinkEvent) {
    match event {
        LinkEvent::Started { session_id, peer } => {
            tracing::info!(session_id = %session_id, peer = %peer, "session started");
        }
        LinkEvent::Stopped { session_id } => {
            tracing::info!(session_id = %session_id, "session stopped");
        }
        LinkEvent::ConnectionTimeout {
            session_id,
            elapsed,
        } => {
            tracing::warn!(session_id = %session_id, elapsed_s = elapsed.as_secs(), "connection timeout");
        }
        LinkEvent::DataReceived(message) => show_received(message),
        LinkEvent::DataSent(batch) => {
            if !batch.is_empty() {
                match serde_json::to_string(batch.as_ref()) {
                    Ok(json) => tracing::debug!(batch = %json, "SEND"),
                    Err(err) => tracing::debug!(error = %err, "SEND (unprintable)"),
                }
            }
        }
    }
}

fn show_received(message: &InboundMessage) {
    if message.is_empty() || is_info_only(message) {
        return;
    }
    let raw = serde_json::Value::Object(message.clone());
    tracing::debug!(message = %raw, "RCVD");
    for reading in telemetry_readings(message) {
        match reading.decode() {
            Ok(Telemetry::Gps(fix)) => tracing::info!(
                latitude = fix.latitude,
                north_south = %fix.north_south,
                longitude = fix.longitude,
                east_west = %fix.east_west,
                altitude = fix.altitude,
                ground_speed = fix.ground_speed,
                "gps fix"
            ),
            Ok(Telemetry::Imu(sample)) => tracing::info!(
                axl_x = sample.axl_x,
                axl_y = sample.axl_y,
                axl_z = sample.axl_z,
                "imu sample"
            ),
            Err(err) => tracing::warn!(kind = reading.kind, error = %err, "unreadable telemetry"),
        }
    }
}
