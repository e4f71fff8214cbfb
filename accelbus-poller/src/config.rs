//! Configuration for the sensor-node poller.

use std::path::Path;
use std::time::Duration;

use accelbus_common::config::{LoggingConfig, ZenohConfig};
use accelbus_common::{Format, KEY_PREFIX};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::modbus::{ModbusLink, ModbusTransport, parse_data_bits, parse_parity, parse_stop_bits};
use crate::poller::PollerSettings;
use crate::profiles::Profile;
use crate::register_map::{Encoding, MapError, RegisterField, RegisterMap, RegisterSpace};
use crate::simulator::SimulatedDevice;
use crate::transport::{DeviceTransport, TransientPolicy};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] accelbus_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Device '{device}': invalid register map: {source}")]
    Map {
        device: String,
        #[source]
        source: MapError,
    },
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Payload encoding of published telemetry
    #[serde(default)]
    pub serialization: Format,

    /// Publishing settings
    #[serde(default)]
    pub publish: PublishConfig,

    /// Sensor nodes to poll
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Publish to Zenoh; when false outcomes are only logged
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Key expression prefix (default: "accelbus")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_key_prefix() -> String {
    KEY_PREFIX.to_string()
}

/// Configuration for a single sensor node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name (used in key expressions)
    pub name: String,

    /// How the node is reached
    pub connection: ConnectionConfig,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Built-in register layout
    #[serde(default)]
    pub profile: Option<Profile>,

    /// Inline register layout, instead of `profile`
    #[serde(default)]
    pub register_map: Option<RegisterMapConfig>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before retrying after a transient failure
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Per-read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Treat a lost link as transient
    #[serde(default)]
    pub retry_link_down: bool,

    /// Treat Modbus exception responses as transient
    #[serde(default)]
    pub retry_device_exception: bool,

    /// Check the identity register at startup
    #[serde(default)]
    pub expected_device_id: Option<u16>,
}

fn default_unit_id() -> u8 {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_backoff_ms() -> u64 {
    250
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    1000
}

/// Connection configuration (RTU, TCP or simulated).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Modbus RTU (serial) connection
    Rtu {
        /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3")
        port: String,
        /// Baud rate (default: 9600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Data bits (default: 8)
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// Parity: "none", "even", or "odd" (default: "none")
        #[serde(default = "default_parity")]
        parity: String,
        /// Stop bits: 1 or 2 (default: 1)
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
    /// Modbus TCP connection
    Tcp {
        /// Host address (IP)
        host: String,
        /// TCP port (default: 502)
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// In-process simulated node
    Simulated,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

impl ConnectionConfig {
    /// The Modbus link to open, or `None` for a simulated node.
    pub fn modbus_link(&self) -> Result<Option<ModbusLink>, ConfigError> {
        match self {
            ConnectionConfig::Simulated => Ok(None),
            ConnectionConfig::Tcp { host, port } => Ok(Some(ModbusLink::Tcp {
                host: host.clone(),
                port: *port,
            })),
            ConnectionConfig::Rtu {
                port,
                baud_rate,
                data_bits,
                parity,
                stop_bits,
            } => {
                let invalid = |what: String| ConfigError::Validation(what);
                Ok(Some(ModbusLink::Rtu {
                    port: port.clone(),
                    baud_rate: *baud_rate,
                    data_bits: parse_data_bits(*data_bits)
                        .ok_or_else(|| invalid(format!("invalid data_bits {}", data_bits)))?,
                    parity: parse_parity(parity).ok_or_else(|| {
                        invalid(format!("invalid parity '{}' (use none, even, or odd)", parity))
                    })?,
                    stop_bits: parse_stop_bits(*stop_bits)
                        .ok_or_else(|| invalid(format!("invalid stop_bits {}", stop_bits)))?,
                }))
            }
        }
    }
}

/// An inline register map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMapConfig {
    /// Register space the fields live in
    pub space: RegisterSpace,

    pub fields: Vec<FieldConfig>,
}

/// One field of an inline register map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,

    /// Starting address (0-based)
    pub address: u16,

    pub encoding: EncodingKind,

    /// Register width; defaults to the encoding's footprint
    #[serde(default)]
    pub width: Option<u16>,

    /// Divisor, required for `signed_scaled_int16`
    #[serde(default)]
    pub scale: Option<f64>,

    /// Bit names for `bitfield16`, bit 0 first
    #[serde(default)]
    pub bit_names: Vec<String>,

    /// Alias view allowed to overlap other fields
    #[serde(default)]
    pub alias: bool,

    /// Unit of measurement (for metadata)
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingKind {
    RawUint16,
    SignedScaledInt16,
    Float32Pair,
    Uint32Pair,
    Bitfield16,
}

impl FieldConfig {
    fn to_field(&self) -> Result<RegisterField, String> {
        let encoding = match self.encoding {
            EncodingKind::RawUint16 => Encoding::RawUint16,
            EncodingKind::SignedScaledInt16 => Encoding::SignedScaledInt16 {
                scale: self
                    .scale
                    .ok_or_else(|| format!("field '{}': signed_scaled_int16 needs a scale", self.name))?,
            },
            EncodingKind::Float32Pair => Encoding::Float32Pair,
            EncodingKind::Uint32Pair => Encoding::Uint32Pair,
            EncodingKind::Bitfield16 => Encoding::Bitfield16 {
                bit_names: self.bit_names.clone(),
            },
        };

        let width = self.width.unwrap_or_else(|| encoding.width());
        let mut field = RegisterField::new(self.name.clone(), self.address, width, encoding);
        if self.alias {
            field = field.as_alias();
        }
        if let Some(unit) = &self.unit {
            field = field.with_unit(unit.clone());
        }
        Ok(field)
    }
}

impl DeviceConfig {
    /// Build the validated register map for this device.
    pub fn register_map(&self) -> Result<RegisterMap, ConfigError> {
        let map_error = |source| ConfigError::Map {
            device: self.name.clone(),
            source,
        };

        match (&self.profile, &self.register_map) {
            (Some(profile), None) => profile.register_map().map_err(map_error),
            (None, Some(inline)) => {
                let fields = inline
                    .fields
                    .iter()
                    .map(FieldConfig::to_field)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ConfigError::Validation(format!("Device '{}': {}", self.name, e)))?;
                RegisterMap::new(self.name.clone(), inline.space, fields).map_err(map_error)
            }
            (Some(_), Some(_)) => Err(ConfigError::Validation(format!(
                "Device '{}': specify either profile or register_map, not both",
                self.name
            ))),
            (None, None) => Err(ConfigError::Validation(format!(
                "Device '{}': must specify either profile or register_map",
                self.name
            ))),
        }
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            backoff: Duration::from_millis(self.backoff_ms),
            max_consecutive_failures: self.max_consecutive_failures,
            policy: TransientPolicy {
                link_down: self.retry_link_down,
                device_exception: self.retry_device_exception,
            },
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Build the transport for this device.
    ///
    /// A simulated node is grown to cover `map` so any layout can be polled.
    pub fn transport(&self, map: &RegisterMap) -> Result<DeviceTransport, ConfigError> {
        let transport = match self.connection.modbus_link()? {
            Some(link) => ModbusTransport::new(link, self.timeout()).into(),
            None => {
                let mut device = SimulatedDevice::new(self.unit_id);
                device.cover(map);
                device.into()
            }
        };
        Ok(transport)
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = accelbus_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = accelbus_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Validation(
                "At least one device must be configured".to_string(),
            ));
        }

        if self.publish.key_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Validation(
                "publish.key_prefix cannot be empty".to_string(),
            ));
        }

        self.zenoh
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        for (i, device) in self.devices.iter().enumerate() {
            if device.name.is_empty() {
                return Err(ConfigError::Validation(
                    "Device name cannot be empty".to_string(),
                ));
            }

            if device.name.contains(['/', '*', '@', '$', '?', '#']) {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': name cannot contain key expression characters",
                    device.name
                )));
            }

            if self.devices[..i].iter().any(|d| d.name == device.name) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate device name '{}'",
                    device.name
                )));
            }

            if device.unit_id == 0 || device.unit_id > 247 {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': unit_id must be 1-247",
                    device.name
                )));
            }

            if device.poll_interval_ms == 0 {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': poll_interval_ms must be greater than 0",
                    device.name
                )));
            }

            if device.max_consecutive_failures == 0 {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': max_consecutive_failures must be at least 1",
                    device.name
                )));
            }

            if device.timeout_ms == 0 {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': timeout_ms must be greater than 0",
                    device.name
                )));
            }

            device.connection.modbus_link().map_err(|e| match e {
                ConfigError::Validation(msg) => {
                    ConfigError::Validation(format!("Device '{}': {}", device.name, msg))
                }
                other => other,
            })?;

            device.register_map()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_json(extra: &str) -> String {
        format!(
            r#"{{
                devices: [
                    {{
                        name: "accel01",
                        connection: {{ type: "simulated" }},
                        {}
                    }}
                ]
            }}"#,
            extra
        )
    }

    #[test]
    fn test_parse_rtu_config() {
        let json = r#"{
            zenoh: { mode: "client", connect: ["tcp/127.0.0.1:7447"] },
            serialization: "cbor",
            devices: [
                {
                    name: "accel01",
                    connection: {
                        type: "rtu",
                        port: "/dev/ttyUSB0",
                        baud_rate: 115200,
                        parity: "even"
                    },
                    unit_id: 5,
                    profile: "analytics",
                    expected_device_id: 4660,
                }
            ]
        }"#;

        let config = BridgeConfig::parse(json).unwrap();
        let device = &config.devices[0];

        assert_eq!(config.serialization, Format::Cbor);
        assert_eq!(config.publish.key_prefix, "accelbus");
        assert!(config.publish.enabled);
        assert_eq!(device.unit_id, 5);
        assert_eq!(device.profile, Some(Profile::Analytics));
        assert_eq!(device.expected_device_id, Some(0x1234));

        match device.connection.modbus_link().unwrap() {
            Some(ModbusLink::Rtu {
                port,
                baud_rate,
                parity,
                data_bits,
                stop_bits,
            }) => {
                assert_eq!(port, "/dev/ttyUSB0");
                assert_eq!(baud_rate, 115200);
                assert_eq!(parity, tokio_serial::Parity::Even);
                assert_eq!(data_bits, tokio_serial::DataBits::Eight);
                assert_eq!(stop_bits, tokio_serial::StopBits::One);
            }
            other => panic!("Expected RTU link, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_tcp_defaults() {
        let json = r#"{
            devices: [
                {
                    name: "gateway",
                    connection: { type: "tcp", host: "192.168.1.10" },
                    profile: "combined"
                }
            ]
        }"#;

        let config = BridgeConfig::parse(json).unwrap();
        let device = &config.devices[0];

        assert_eq!(
            device.connection,
            ConnectionConfig::Tcp {
                host: "192.168.1.10".to_string(),
                port: 502
            }
        );
        assert_eq!(device.unit_id, 1);
        assert_eq!(device.timeout(), Duration::from_millis(1000));
        assert_eq!(device.poller_settings(), PollerSettings::default());
    }

    #[test]
    fn test_inline_register_map() {
        let json = device_json(
            r#"register_map: {
                space: "input",
                fields: [
                    { name: "avg_x", address: 0, encoding: "signed_scaled_int16", scale: 1000, unit: "g" },
                    { name: "status", address: 30, encoding: "bitfield16", bit_names: ["sampling", "processing"] },
                    { name: "uptime", address: 40, encoding: "uint32_pair" },
                    { name: "uptime_low", address: 40, encoding: "raw_uint16", alias: true },
                ]
            }"#,
        );

        let config = BridgeConfig::parse(&json).unwrap();
        let map = config.devices[0].register_map().unwrap();

        assert_eq!(map.name(), "accel01");
        assert_eq!(map.space(), RegisterSpace::Input);
        assert_eq!(map.minimal_covering_block(), (0, 42));
        assert_eq!(map.field("avg_x").unwrap().unit(), Some("g"));
        assert!(map.field("uptime_low").unwrap().is_alias());
    }

    #[test]
    fn test_retry_policy_settings() {
        let json = device_json(
            r#"profile: "identity",
               poll_interval_ms: 50,
               backoff_ms: 10,
               max_consecutive_failures: 5,
               retry_link_down: true"#,
        );

        let settings = BridgeConfig::parse(&json).unwrap().devices[0].poller_settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(50));
        assert_eq!(settings.backoff, Duration::from_millis(10));
        assert_eq!(settings.max_consecutive_failures, 5);
        assert!(settings.policy.link_down);
        assert!(!settings.policy.device_exception);
    }

    #[test]
    fn test_validate_empty_devices() {
        let err = BridgeConfig::parse("{ devices: [] }").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_validate_rejects_bad_devices() {
        let cases = [
            r#"profile: "identity", unit_id: 0"#,
            r#"profile: "identity", unit_id: 248"#,
            r#"profile: "identity", poll_interval_ms: 0"#,
            r#"profile: "identity", max_consecutive_failures: 0"#,
            r#"profile: "identity", timeout_ms: 0"#,
            r#"unit_id: 1"#,
            r#"profile: "identity", register_map: { space: "holding", fields: [ { name: "a", address: 0, encoding: "raw_uint16" } ] }"#,
        ];

        for extra in cases {
            let err = BridgeConfig::parse(&device_json(extra)).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)), "{extra}: {err}");
        }
    }

    #[test]
    fn test_validate_rejects_invalid_map() {
        let json = device_json(
            r#"register_map: {
                space: "holding",
                fields: [
                    { name: "count", address: 3, encoding: "uint32_pair" },
                    { name: "count_high", address: 4, encoding: "raw_uint16" },
                ]
            }"#,
        );
        let err = BridgeConfig::parse(&json).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Map {
                source: MapError::Overlap { .. },
                ..
            }
        ));

        let json = device_json(
            r#"register_map: {
                space: "holding",
                fields: [ { name: "x", address: 0, encoding: "signed_scaled_int16" } ]
            }"#,
        );
        assert!(BridgeConfig::parse(&json).unwrap_err().to_string().contains("needs a scale"));
    }

    #[test]
    fn test_validate_rejects_bad_parity() {
        let json = r#"{
            devices: [
                {
                    name: "accel01",
                    connection: { type: "rtu", port: "COM3", parity: "mark" },
                    profile: "identity"
                }
            ]
        }"#;
        let err = BridgeConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("invalid parity 'mark'"));
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let json = r#"{
            devices: [
                { name: "accel01", connection: { type: "simulated" }, profile: "identity" },
                { name: "accel01", connection: { type: "simulated" }, profile: "analytics" },
            ]
        }"#;
        let err = BridgeConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("Duplicate device name"));
    }

    #[test]
    fn test_validate_rejects_key_expr_characters() {
        let json = r#"{
            devices: [ { name: "line1/accel01", connection: { type: "simulated" }, profile: "identity" } ]
        }"#;
        assert!(BridgeConfig::parse(json).is_err());
    }

    #[test]
    fn test_simulated_transport_covers_map() {
        let config = BridgeConfig::parse(&device_json(r#"profile: "combined""#)).unwrap();
        let device = &config.devices[0];
        let map = device.register_map().unwrap();

        match device.transport(&map).unwrap() {
            DeviceTransport::Simulated(sim) => {
                assert_eq!(sim.register(RegisterSpace::Holding, 28), Some(0));
            }
            other => panic!("Expected simulated transport, got {:?}", other),
        }
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            r#"{ publish: { enabled: false, key_prefix: "lab" }, devices: [ { name: "bench", connection: { type: "simulated" }, profile: "float_sensor" } ] }"#
        )
        .unwrap();

        let config = BridgeConfig::load_from_file(file.path()).unwrap();
        assert!(!config.publish.enabled);
        assert_eq!(config.publish.key_prefix, "lab");
        assert_eq!(config.devices[0].profile, Some(Profile::FloatSensor));
    }

    #[test]
    fn test_load_missing_file() {
        let err = BridgeConfig::load_from_file("/nonexistent/accelbus.json5").unwrap_err();
        assert!(matches!(err, ConfigError::Load(accelbus_common::Error::Config(_))));
        assert!(err.to_string().contains("/nonexistent/accelbus.json5"));
    }

    #[test]
    fn test_malformed_json5_is_a_load_error() {
        let err = BridgeConfig::parse("{ devices: [ }").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
        assert!(err.to_string().contains("Invalid JSON5"));
    }

    #[test]
    fn test_file_is_validated_after_loading() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ devices: [] }}").unwrap();

        let err = BridgeConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
