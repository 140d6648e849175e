use crate::errors::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type DeviceId = String;

/// Telemetry category with its fixed log capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryKind {
    Sms,
    Location,
    Photo,
    CallLog,
}

impl TelemetryKind {
    pub const ALL: [TelemetryKind; 4] = [
        TelemetryKind::Sms,
        TelemetryKind::Location,
        TelemetryKind::Photo,
        TelemetryKind::CallLog,
    ];

    pub fn capacity(self) -> usize {
        match self {
            TelemetryKind::Sms => 500,
            TelemetryKind::Location => 100,
            TelemetryKind::Photo => 50,
            TelemetryKind::CallLog => 200,
        }
    }

    /// Number of records returned by a listing that does not ask for a limit
    pub fn default_limit(self) -> usize {
        match self {
            TelemetryKind::Sms => 50,
            TelemetryKind::Location => 20,
            TelemetryKind::Photo => 10,
            TelemetryKind::CallLog => 50,
        }
    }

    /// Collection name used in API paths and stats
    pub fn as_str(self) -> &'static str {
        match self {
            TelemetryKind::Sms => "sms",
            TelemetryKind::Location => "locations",
            TelemetryKind::Photo => "photos",
            TelemetryKind::CallLog => "calls",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            TelemetryKind::Sms => 0,
            TelemetryKind::Location => 1,
            TelemetryKind::Photo => 2,
            TelemetryKind::CallLog => 3,
        }
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TelemetryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(TelemetryKind::Sms),
            "locations" | "location" => Ok(TelemetryKind::Location),
            "photos" | "photo" => Ok(TelemetryKind::Photo),
            "calls" | "call_log" | "call_logs" => Ok(TelemetryKind::CallLog),
            other => Err(Error::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sms {
    #[serde(alias = "address", alias = "from")]
    pub sender: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    #[serde(default = "generated_photo_name")]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub data: String,
}

fn generated_photo_name() -> String {
    format!("photo_{}.jpg", Utc::now().timestamp_millis())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLog {
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Call length in seconds
    #[serde(default)]
    pub duration: u64,
    #[serde(default = "unknown_direction", alias = "type")]
    pub direction: String,
}

fn unknown_direction() -> String {
    "unknown".to_string()
}

/// Kind-specific payload of a stored telemetry record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Telemetry {
    Sms(Sms),
    Location(Location),
    Photo(Photo),
    CallLog(CallLog),
}

impl Telemetry {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            Telemetry::Sms(_) => TelemetryKind::Sms,
            Telemetry::Location(_) => TelemetryKind::Location,
            Telemetry::Photo(_) => TelemetryKind::Photo,
            Telemetry::CallLog(_) => TelemetryKind::CallLog,
        }
    }
}

/// Telemetry record as held in a device log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub data: Telemetry,
}

/// Telemetry on its way into the store, before it is stamped
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: Option<String>,
    pub data: Telemetry,
}

impl From<Telemetry> for Entry {
    fn from(data: Telemetry) -> Self {
        Self { id: None, data }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Sent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRecord {
    pub id: String,
    pub command: String,
    pub params: String,
    pub timestamp: DateTime<Utc>,
    pub status: CommandStatus,
}

/// Envelope written to a device connection
#[derive(Debug, Serialize)]
pub struct CommandEnvelope<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub cmd: &'a str,
    pub params: &'a str,
    pub id: &'a str,
}

impl<'a> CommandEnvelope<'a> {
    pub fn new(record: &'a CommandRecord) -> Self {
        Self {
            kind: "command",
            cmd: &record.command,
            params: &record.params,
            id: &record.id,
        }
    }
}

/// Per-kind record counts for one device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetryCounts {
    pub sms: usize,
    pub locations: usize,
    pub photos: usize,
    pub calls: usize,
}

impl TelemetryCounts {
    pub fn set(&mut self, kind: TelemetryKind, count: usize) {
        match kind {
            TelemetryKind::Sms => self.sms = count,
            TelemetryKind::Location => self.locations = count,
            TelemetryKind::Photo => self.photos = count,
            TelemetryKind::CallLog => self.calls = count,
        }
    }
}
