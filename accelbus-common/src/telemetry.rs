use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single published telemetry value: one decoded register field of one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryPoint {
    /// Unix epoch milliseconds when the register block was acquired.
    pub timestamp: i64,

    /// Device name from configuration (e.g., "accel01").
    pub source: String,

    /// Field path (e.g., "input/current_avg_x").
    pub metric: String,

    /// The decoded value.
    pub value: TelemetryValue,

    /// Additional context labels (register address, register space, unit id).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl TelemetryPoint {
    /// Create a new telemetry point with the current timestamp.
    pub fn new(source: impl Into<String>, metric: impl Into<String>, value: TelemetryValue) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            source: source.into(),
            metric: metric.into(),
            value,
            labels: HashMap::new(),
        }
    }

    /// Override the timestamp (used to stamp every field of a snapshot identically).
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add a label to this telemetry point.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Typed telemetry value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TelemetryValue {
    /// Raw or counting register value.
    Counter(u64),

    /// Physical measurement (scaled integer or float).
    Gauge(f64),

    /// Set of active flag names.
    Flags(Vec<String>),
}

impl From<u64> for TelemetryValue {
    fn from(v: u64) -> Self {
        TelemetryValue::Counter(v)
    }
}

impl From<f64> for TelemetryValue {
    fn from(v: f64) -> Self {
        TelemetryValue::Gauge(v)
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
