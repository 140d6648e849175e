use crate::errors::{Error, Result};
use crate::model::DeviceId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Write side of a device connection. Frames pushed here are drained by the
/// connection task, so sending never waits on the socket. The queue has no
/// bound; frames for a device that stops reading pile up until it disconnects.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<String>,
}

impl Outbound {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    pub fn is_ready(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn send(&self, frame: String) -> Result<()> {
        self.tx.send(frame).map_err(|_| Error::Offline)
    }
}

/// Handshake metadata supplied by a connecting device
#[derive(Debug, Clone, Default)]
pub struct DeviceMetadata {
    pub model: Option<String>,
    pub version: Option<String>,
    pub battery: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub model: String,
    pub version: String,
    pub ip: String,
    pub battery: String,
    pub online: bool,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    handle: Option<Outbound>,
}

impl Device {
    fn new(id: DeviceId, metadata: DeviceMetadata, handle: Outbound) -> Self {
        let now = Utc::now();
        Self {
            id,
            model: metadata.model.unwrap_or_else(|| "Unknown".to_string()),
            version: metadata.version.unwrap_or_else(|| "unknown".to_string()),
            ip: metadata.ip.unwrap_or_else(|| "unknown".to_string()),
            battery: metadata.battery.unwrap_or_else(|| "100%".to_string()),
            online: true,
            connected_at: now,
            last_seen: now,
            disconnected_at: None,
            handle: Some(handle),
        }
    }

    /// Connection handle, only while the device is online
    pub fn handle(&self) -> Option<&Outbound> {
        if self.online {
            self.handle.as_ref()
        } else {
            None
        }
    }
}

/// Every device seen since startup, in connection order
#[derive(Debug, Default)]
pub struct Registry {
    devices: Vec<Device>,
    index: HashMap<DeviceId, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, metadata: DeviceMetadata, handle: Outbound) -> DeviceId {
        let id = uuid::Uuid::new_v4().to_string();
        self.index.insert(id.clone(), self.devices.len());
        self.devices.push(Device::new(id.clone(), metadata, handle));
        id
    }

    /// Returns false when the id is unknown
    pub fn mark_offline(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(device) => {
                device.online = false;
                device.disconnected_at = Some(Utc::now());
                device.handle = None;
                true
            }
            None => false,
        }
    }

    pub fn touch(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(device) => {
                device.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn update_battery(&mut self, id: &str, battery: String) -> bool {
        match self.get_mut(id) {
            Some(device) => {
                device.battery = battery;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.index.get(id).map(|&slot| &self.devices[slot])
    }

    #[cfg(test)]
    pub(crate) fn set_last_seen(&mut self, id: &str, at: DateTime<Utc>) {
        if let Some(device) = self.get_mut(id) {
            device.last_seen = at;
        }
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Device> {
        match self.index.get(id) {
            Some(&slot) => self.devices.get_mut(slot),
            None => None,
        }
    }

    pub fn list(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn online_count(&self) -> usize {
        self.devices.iter().filter(|d| d.online).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn outbound() -> (Outbound, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbound::new(tx), rx)
    }

    #[test]
    fn test_register_assigns_distinct_ids() {
        let mut registry = Registry::new();
        let mut receivers = Vec::new();
        let mut ids = HashSet::new();

        for _ in 0..10 {
            let (handle, rx) = outbound();
            receivers.push(rx);
            ids.insert(registry.register(DeviceMetadata::default(), handle));
        }

        assert_eq!(ids.len(), 10);
        assert_eq!(registry.len(), 10);
        assert_eq!(registry.online_count(), 10);
    }

    #[test]
    fn test_metadata_defaults() {
        let mut registry = Registry::new();
        let (handle, _rx) = outbound();
        let id = registry.register(DeviceMetadata::default(), handle);

        let device = registry.get(&id).unwrap();
        assert_eq!(device.model, "Unknown");
        assert_eq!(device.battery, "100%");
        assert_eq!(device.connected_at, device.last_seen);
        assert!(device.disconnected_at.is_none());
    }

    #[test]
    fn test_list_keeps_connection_order() {
        let mut registry = Registry::new();
        let (first, _rx1) = outbound();
        let (second, _rx2) = outbound();
        let a = registry.register(DeviceMetadata::default(), first);
        let b = registry.register(DeviceMetadata::default(), second);

        let ids: Vec<&str> = registry.list().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec![a.as_str(), b.as_str()]);
    }

    #[test]
    fn test_mark_offline_retains_device() {
        let mut registry = Registry::new();
        let (handle, _rx) = outbound();
        let id = registry.register(
            DeviceMetadata {
                model: Some("Pixel7".to_string()),
                ..Default::default()
            },
            handle,
        );

        assert!(registry.mark_offline(&id));

        let device = registry.get(&id).unwrap();
        assert!(!device.online);
        assert!(device.disconnected_at.is_some());
        assert!(device.handle().is_none());
        assert_eq!(device.model, "Pixel7");
        assert_eq!(registry.online_count(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_ids_are_ignored() {
        let mut registry = Registry::new();
        assert!(!registry.mark_offline("missing"));
        assert!(!registry.touch("missing"));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_outbound_not_ready_after_receiver_dropped() {
        let (handle, rx) = outbound();
        assert!(handle.is_ready());
        drop(rx);
        assert!(!handle.is_ready());
        assert!(matches!(handle.send("x".to_string()), Err(Error::Offline)));
    }
}
