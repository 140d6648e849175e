use crate::model::{Entry, TelemetryCounts, TelemetryKind, TelemetryRecord};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};

/// Fixed-capacity log, newest record first
#[derive(Debug)]
pub struct BoundedLog<T> {
    records: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Inserts at the head, dropping the oldest records past capacity
    pub fn push(&mut self, record: T) {
        self.records.push_front(record);
        self.records.truncate(self.capacity);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[derive(Debug)]
struct DeviceLogs {
    logs: [BoundedLog<TelemetryRecord>; 4],
}

impl DeviceLogs {
    fn new() -> Self {
        Self {
            logs: TelemetryKind::ALL.map(|kind| BoundedLog::with_capacity(kind.capacity())),
        }
    }

    fn log(&self, kind: TelemetryKind) -> &BoundedLog<TelemetryRecord> {
        &self.logs[kind.index()]
    }

    fn log_mut(&mut self, kind: TelemetryKind) -> &mut BoundedLog<TelemetryRecord> {
        &mut self.logs[kind.index()]
    }
}

/// Per-device telemetry logs
#[derive(Debug, Default)]
pub struct TelemetryStore {
    devices: HashMap<String, DeviceLogs>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates empty logs for a freshly connected device
    pub fn create(&mut self, device_id: &str) {
        self.devices
            .entry(device_id.to_string())
            .or_insert_with(DeviceLogs::new);
    }

    /// Stamps and stores entries in the given order. Each entry goes to the
    /// head of its log, so a batch ends up reversed relative to its input.
    pub fn append<I>(&mut self, device_id: &str, entries: I) -> usize
    where
        I: IntoIterator<Item = Entry>,
    {
        let logs = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(DeviceLogs::new);

        let mut stored = 0;
        for entry in entries {
            let record = TelemetryRecord {
                id: entry
                    .id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                timestamp: Utc::now(),
                data: entry.data,
            };
            logs.log_mut(record.data.kind()).push(record);
            stored += 1;
        }
        stored
    }

    /// Newest-first records; `None` uses the kind's default limit
    pub fn list(
        &self,
        device_id: &str,
        kind: TelemetryKind,
        limit: Option<usize>,
    ) -> Vec<TelemetryRecord> {
        let limit = limit.unwrap_or_else(|| kind.default_limit());
        match self.devices.get(device_id) {
            Some(logs) => logs.log(kind).iter().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn clear(&mut self, device_id: &str, kind: TelemetryKind) {
        if let Some(logs) = self.devices.get_mut(device_id) {
            logs.log_mut(kind).clear();
        }
    }

    pub fn count(&self, device_id: &str, kind: TelemetryKind) -> usize {
        self.devices
            .get(device_id)
            .map_or(0, |logs| logs.log(kind).len())
    }

    pub fn counts(&self, device_id: &str) -> TelemetryCounts {
        let mut counts = TelemetryCounts::default();
        for kind in TelemetryKind::ALL {
            counts.set(kind, self.count(device_id, kind));
        }
        counts
    }
}
