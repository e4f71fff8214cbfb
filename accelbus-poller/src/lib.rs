//! Register-mapped telemetry poller for the accelerometer sensor node.
//!
//! Polls Modbus (RTU or TCP) sensor nodes, decodes their registers into typed
//! values and hands every poll outcome to a sink, by default a Zenoh publisher.
//!
//! # Key Expressions
//!
//! ```text
//! accelbus/<device>/<space>/<field>
//! accelbus/<device>/@/error
//! ```
//!
//! Where:
//! - `<device>` - Device name from configuration
//! - `<space>` - `holding` or `input`
//! - `<field>` - Field name from the register map

pub mod config;
pub mod decoder;
pub mod modbus;
pub mod poller;
pub mod profiles;
pub mod register_map;
pub mod session;
pub mod simulator;
pub mod sink;
pub mod snapshot;
pub mod transport;

pub use poller::{FatalReason, PollOutcome, Poller, PollerExit, PollerSettings, PollerState};
pub use register_map::{DecodeError, Encoding, MapError, RegisterField, RegisterMap, RegisterSpace};
pub use session::{DeviceSession, SessionError};
pub use sink::{PollSink, SinkError};
pub use snapshot::{DecodedSnapshot, FieldValue, RawBlock, TypedValue};
pub use transport::{TransientPolicy, Transport, TransportError};
