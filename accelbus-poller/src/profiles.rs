//! Built-in register layouts of the accelerometer sensor node.
//!
//! Every profile is a plain [`RegisterMap`]; configuration files select one by name
//! instead of spelling the fields out.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::register_map::{MapError, RegisterField, RegisterMap, RegisterSpace};
use crate::snapshot::{DecodedSnapshot, NO_FLAGS, TypedValue};

/// Value of the `device_id` holding register on a genuine node.
pub const EXPECTED_DEVICE_ID: u16 = 0x1234;

/// Divisor for every statistics register.
pub const SCALE_FACTOR: f64 = 1000.0;

/// Bit names of the task-status register.
pub const TASK_STATUS_BITS: [&str; 4] = ["sampling", "processing", "analytics", "modbus"];

/// Bit names of the float sensor's status register.
pub const SENSOR_STATUS_BITS: [&str; 8] = [
    "data_ready",
    "calibrated",
    "motion_detected",
    "level",
    "tilt",
    "face_up",
    "face_down",
    "sensor_error",
];

/// Built-in device layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Holding 0-4: identification block.
    Identity,
    /// Input 0-35: windowed and running statistics plus task health.
    Analytics,
    /// Holding 0-28: identity and a condensed statistics block in one read.
    Combined,
    /// Holding 0-19: float32 acceleration/attitude readings.
    FloatSensor,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Identity => "identity",
            Profile::Analytics => "analytics",
            Profile::Combined => "combined",
            Profile::FloatSensor => "float_sensor",
        }
    }

    /// Build the register map for this profile.
    pub fn register_map(&self) -> Result<RegisterMap, MapError> {
        match self {
            Profile::Identity => {
                RegisterMap::new(self.as_str(), RegisterSpace::Holding, identity_fields())
            }
            Profile::Analytics => RegisterMap::new(
                self.as_str(),
                RegisterSpace::Input,
                analytics_fields(),
            ),
            Profile::Combined => RegisterMap::new(
                self.as_str(),
                RegisterSpace::Holding,
                combined_fields(),
            ),
            Profile::FloatSensor => RegisterMap::new(
                self.as_str(),
                RegisterSpace::Holding,
                float_sensor_fields(),
            ),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<stat>_x`, `<stat>_y`, `<stat>_z` at consecutive addresses.
fn axis_fields(stat: &str, start: u16) -> impl Iterator<Item = RegisterField> + '_ {
    ["x", "y", "z"]
        .into_iter()
        .zip(start..)
        .map(move |(axis, address)| {
            RegisterField::scaled(format!("{}_{}", stat, axis), address, SCALE_FACTOR)
                .with_unit("g")
        })
}

fn identity_fields() -> Vec<RegisterField> {
    vec![
        RegisterField::raw("device_id", 0),
        RegisterField::raw("firmware_version", 1),
        RegisterField::raw("sample_rate", 2).with_unit("Hz"),
        RegisterField::uint32("window_count", 3),
    ]
}

fn health_fields(start: u16) -> Vec<RegisterField> {
    vec![
        RegisterField::bitfield("task_status", start, TASK_STATUS_BITS),
        RegisterField::raw("sampling_errors", start + 1),
        RegisterField::raw("processing_errors", start + 2),
        RegisterField::raw("analytics_errors", start + 3),
        RegisterField::raw("missed_samples", start + 4),
        RegisterField::raw("last_update_ms", start + 5).with_unit("ms"),
    ]
}

fn analytics_fields() -> Vec<RegisterField> {
    let stats = [
        ("current_avg", 0),
        ("current_max", 3),
        ("current_min", 6),
        ("current_std", 9),
        ("current_rms", 12),
        ("running_avg", 15),
        ("running_std", 18),
        ("running_rms", 21),
        ("global_max", 24),
        ("global_min", 27),
    ];

    let mut fields: Vec<RegisterField> = stats
        .into_iter()
        .flat_map(|(stat, start)| axis_fields(stat, start).collect::<Vec<_>>())
        .collect();
    fields.extend(health_fields(30));
    fields
}

fn combined_fields() -> Vec<RegisterField> {
    let stats = [
        ("current_avg", 5),
        ("current_max", 8),
        ("current_min", 11),
        ("running_avg", 14),
        ("global_max", 17),
        ("global_min", 20),
    ];

    let mut fields = identity_fields();
    for (stat, start) in stats {
        fields.extend(axis_fields(stat, start));
    }
    fields.extend(health_fields(23));
    fields
}

fn float_sensor_fields() -> Vec<RegisterField> {
    vec![
        RegisterField::float32("accel_x", 0).with_unit("g"),
        RegisterField::float32("accel_y", 2).with_unit("g"),
        RegisterField::float32("accel_z", 4).with_unit("g"),
        RegisterField::float32("roll", 6).with_unit("deg"),
        RegisterField::float32("pitch", 8).with_unit("deg"),
        RegisterField::float32("magnitude", 10).with_unit("g"),
        RegisterField::float32("temperature", 12).with_unit("degC"),
        RegisterField::bitfield("status_flags", 14, SENSOR_STATUS_BITS),
        RegisterField::uint32("timestamp_ms", 15).with_unit("ms"),
        RegisterField::raw("calibration_status", 17),
        RegisterField::raw("device_status", 18),
        RegisterField::raw("sample_rate", 19).with_unit("Hz"),
    ]
}

/// Identification block of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: u16,
    /// Firmware version times 100 (`100` is v1.00).
    pub firmware_version: u16,
    pub sample_rate_hz: u16,
    pub window_count: u32,
}

impl DeviceIdentity {
    /// Extract the identity fields from a snapshot of the `identity` or `combined` map.
    pub fn from_snapshot(snapshot: &DecodedSnapshot) -> Option<Self> {
        let word = |name: &str| match snapshot.get(name) {
            Some(TypedValue::Uint16(v)) => Some(*v),
            _ => None,
        };

        Some(Self {
            device_id: word("device_id")?,
            firmware_version: word("firmware_version")?,
            sample_rate_hz: word("sample_rate")?,
            window_count: match snapshot.get("window_count") {
                Some(TypedValue::Uint32(v)) => *v,
                _ => return None,
            },
        })
    }

    /// Firmware version as `major.minor`.
    pub fn firmware(&self) -> String {
        format!("{}.{:02}", self.firmware_version / 100, self.firmware_version % 100)
    }

    pub fn is_expected_device(&self) -> bool {
        self.device_id == EXPECTED_DEVICE_ID
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device 0x{:04X}, firmware v{}, {} Hz, {} windows",
            self.device_id,
            self.firmware(),
            self.sample_rate_hz,
            self.window_count
        )
    }
}

/// Task health block of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub active: Vec<String>,
    pub sampling_errors: u16,
    pub processing_errors: u16,
    pub analytics_errors: u16,
    pub missed_samples: u16,
    pub last_update_ms: u16,
}

impl TaskStatus {
    /// Extract the health fields from a snapshot of the `analytics` or `combined` map.
    pub fn from_snapshot(snapshot: &DecodedSnapshot) -> Option<Self> {
        let word = |name: &str| match snapshot.get(name) {
            Some(TypedValue::Uint16(v)) => Some(*v),
            _ => None,
        };

        Some(Self {
            active: snapshot.get("task_status")?.flags()?.to_vec(),
            sampling_errors: word("sampling_errors")?,
            processing_errors: word("processing_errors")?,
            analytics_errors: word("analytics_errors")?,
            missed_samples: word("missed_samples")?,
            last_update_ms: word("last_update_ms")?,
        })
    }

    pub fn is_running(&self, task: &str) -> bool {
        self.active.iter().any(|t| t == task)
    }

    pub fn total_errors(&self) -> u32 {
        u32::from(self.sampling_errors)
            + u32::from(self.processing_errors)
            + u32::from(self.analytics_errors)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.active.is_empty() {
            f.write_str(NO_FLAGS)?;
        } else {
            f.write_str(&self.active.join(", "))?;
        }
        write!(
            f,
            " (errors: {}/{}/{}, missed {}, updated {} ms ago)",
            self.sampling_errors,
            self.processing_errors,
            self.analytics_errors,
            self.missed_samples,
            self.last_update_ms
        )
    }
}
