use crate::dispatch::Dispatcher;
use crate::errors::{Error, Result};
use crate::ingest::{self, Outcome};
use crate::metrics::{CONNECTIONS_TOTAL, DEVICES_ONLINE, DISCONNECTIONS_TOTAL};
use crate::model::{CommandRecord, DeviceId, TelemetryCounts, TelemetryKind, TelemetryRecord};
use crate::registry::{Device, DeviceMetadata, Outbound, Registry};
use crate::store::TelemetryStore;
use serde::Serialize;
use tracing::info;

/// Device as shown to operators, with its telemetry counts
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    #[serde(flatten)]
    pub device: Device,
    pub stats: TelemetryCounts,
}

/// Device registry, telemetry logs and command histories behind one owner.
/// Every operation runs to completion before the next one starts.
#[derive(Debug, Default)]
pub struct Relay {
    registry: Registry,
    store: TelemetryStore,
    dispatcher: Dispatcher,
}

impl Relay {
    pub fn new(command_history_limit: usize) -> Self {
        Self {
            registry: Registry::new(),
            store: TelemetryStore::new(),
            dispatcher: Dispatcher::new(command_history_limit),
        }
    }

    pub fn connect(&mut self, metadata: DeviceMetadata, handle: Outbound) -> DeviceId {
        let id = self.registry.register(metadata, handle);
        self.store.create(&id);
        self.dispatcher.create(&id);

        CONNECTIONS_TOTAL.inc();
        DEVICES_ONLINE.set(self.registry.online_count() as f64);
        if let Some(device) = self.registry.get(&id) {
            info!(device_id = %id, model = %device.model, ip = %device.ip, "Device connected");
        }
        id
    }

    pub fn disconnect(&mut self, device_id: &str) {
        if self.registry.mark_offline(device_id) {
            DISCONNECTIONS_TOTAL.inc();
            DEVICES_ONLINE.set(self.registry.online_count() as f64);
            info!(device_id, "Device disconnected");
        }
    }

    pub fn ingest(&mut self, device_id: &str, payload: &str) -> Result<Outcome> {
        ingest::route(&mut self.registry, &mut self.store, device_id, payload)
    }

    pub fn dispatch(&mut self, device_id: &str, command: &str, params: &str) -> Result<CommandRecord> {
        self.dispatcher
            .dispatch(&self.registry, device_id, command, params)
    }

    pub fn send_sms(
        &mut self,
        device_id: &str,
        to: Option<&str>,
        message: Option<&str>,
    ) -> Result<CommandRecord> {
        self.dispatcher
            .send_sms(&self.registry, device_id, to, message)
    }

    pub fn devices(&self) -> Vec<DeviceSummary> {
        self.registry
            .list()
            .map(|device| DeviceSummary {
                device: device.clone(),
                stats: self.store.counts(&device.id),
            })
            .collect()
    }

    pub fn device(&self, device_id: &str) -> Result<DeviceSummary> {
        let device = self.registry.get(device_id).ok_or(Error::NotFound)?;
        Ok(DeviceSummary {
            device: device.clone(),
            stats: self.store.counts(device_id),
        })
    }

    pub fn device_count(&self) -> usize {
        self.registry.len()
    }

    pub fn online_count(&self) -> usize {
        self.registry.online_count()
    }

    pub fn telemetry(
        &self,
        device_id: &str,
        kind: TelemetryKind,
        limit: Option<usize>,
    ) -> Vec<TelemetryRecord> {
        self.store.list(device_id, kind, limit)
    }

    pub fn clear(&mut self, device_id: &str, kind: TelemetryKind) -> Result<()> {
        if self.registry.get(device_id).is_none() {
            return Err(Error::NotFound);
        }
        self.store.clear(device_id, kind);
        info!(device_id, %kind, "Telemetry cleared");
        Ok(())
    }

    pub fn commands(&self, device_id: &str) -> Vec<CommandRecord> {
        self.dispatcher.history(device_id)
    }
}
