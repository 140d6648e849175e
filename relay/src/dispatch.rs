use crate::errors::{Error, Result};
use crate::metrics::{COMMANDS_FAILED_TOTAL, COMMANDS_SENT_TOTAL};
use crate::model::{CommandEnvelope, CommandRecord, CommandStatus};
use crate::registry::Registry;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Forwards operator commands to devices and keeps a per-device history
#[derive(Debug)]
pub struct Dispatcher {
    history: HashMap<String, VecDeque<CommandRecord>>,
    history_limit: usize,
}

impl Dispatcher {
    pub fn new(history_limit: usize) -> Self {
        Self {
            history: HashMap::new(),
            history_limit,
        }
    }

    /// Creates an empty history for a freshly connected device
    pub fn create(&mut self, device_id: &str) {
        self.history.entry(device_id.to_string()).or_default();
    }

    /// Fire-and-forget: success means the envelope was queued on the
    /// connection, not that the device received it.
    pub fn dispatch(
        &mut self,
        registry: &Registry,
        device_id: &str,
        command: &str,
        params: &str,
    ) -> Result<CommandRecord> {
        let result = self.try_dispatch(registry, device_id, command, params);
        match &result {
            Ok(record) => {
                COMMANDS_SENT_TOTAL.inc();
                info!(device_id, command, command_id = %record.id, "Command sent");
            }
            Err(e) => {
                COMMANDS_FAILED_TOTAL.inc();
                warn!(device_id, command, "Command not sent: {}", e);
            }
        }
        result
    }

    fn try_dispatch(
        &mut self,
        registry: &Registry,
        device_id: &str,
        command: &str,
        params: &str,
    ) -> Result<CommandRecord> {
        let device = registry.get(device_id).ok_or(Error::NotFound)?;
        let handle = device
            .handle()
            .filter(|handle| handle.is_ready())
            .ok_or(Error::Offline)?;

        let record = CommandRecord {
            id: uuid::Uuid::new_v4().to_string(),
            command: command.to_string(),
            params: params.to_string(),
            timestamp: Utc::now(),
            status: CommandStatus::Sent,
        };

        let frame = serde_json::to_string(&CommandEnvelope::new(&record))?;
        handle.send(frame)?;

        let history = self.history.entry(device_id.to_string()).or_default();
        history.push_back(record.clone());
        while history.len() > self.history_limit {
            history.pop_front();
        }
        debug!(device_id, history = history.len(), "Command recorded");

        Ok(record)
    }

    pub fn send_sms(
        &mut self,
        registry: &Registry,
        device_id: &str,
        to: Option<&str>,
        message: Option<&str>,
    ) -> Result<CommandRecord> {
        let (to, message) = match (non_blank(to), non_blank(message)) {
            (Some(to), Some(message)) => (to, message),
            _ => {
                return Err(Error::Validation(
                    "Both 'to' and 'message' are required".to_string(),
                ))
            }
        };

        let params = format!("{}:{}", to, message);
        self.dispatch(registry, device_id, "send_sms", &params)
    }

    /// Commands sent to a device, oldest first
    pub fn history(&self, device_id: &str) -> Vec<CommandRecord> {
        self.history
            .get(device_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
