use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref CONNECTIONS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_connections_total",
        "Total device connections accepted"
    ))
    .unwrap();
    pub static ref DISCONNECTIONS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_disconnections_total",
        "Total device connections closed"
    ))
    .unwrap();
    pub static ref DEVICES_ONLINE: Gauge = Gauge::with_opts(Opts::new(
        "relay_devices_online",
        "Devices with a live connection"
    ))
    .unwrap();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_messages_total",
        "Total messages received from devices"
    ))
    .unwrap();
    pub static ref RECORDS_STORED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_records_stored_total",
        "Total telemetry records stored"
    ))
    .unwrap();
    pub static ref INVALID_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_invalid_messages_total",
        "Total device messages dropped as unparseable"
    ))
    .unwrap();
    pub static ref COMMANDS_SENT_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_commands_sent_total",
        "Total commands written to device connections"
    ))
    .unwrap();
    pub static ref COMMANDS_FAILED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_commands_failed_total",
        "Total commands rejected before sending"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(CONNECTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DISCONNECTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEVICES_ONLINE.clone()))?;
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECORDS_STORED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INVALID_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMMANDS_SENT_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMMANDS_FAILED_TOTAL.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
