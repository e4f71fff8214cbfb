//! The register read seam between a device session and the bus.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::modbus::ModbusTransport;
use crate::register_map::RegisterSpace;
use crate::simulator::SimulatedDevice;

/// Failures of a single register read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no response within the read timeout")]
    Timeout,

    #[error("response failed its CRC check")]
    CrcMismatch,

    #[error("short or malformed response: {0}")]
    ShortResponse(String),

    #[error("device returned exception code 0x{0:02X}")]
    DeviceException(u8),

    #[error("link down: {0}")]
    LinkDown(String),
}

impl TransportError {
    /// Timeouts, CRC mismatches and short responses are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout | TransportError::CrcMismatch | TransportError::ShortResponse(_)
        )
    }

    /// Classification under a caller policy that may promote fatal kinds to transient.
    pub fn is_transient_under(&self, policy: &TransientPolicy) -> bool {
        match self {
            TransportError::LinkDown(_) => policy.link_down,
            TransportError::DeviceException(_) => policy.device_exception,
            other => other.is_transient(),
        }
    }

    /// Short label for logs and error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Timeout => "timeout",
            TransportError::CrcMismatch => "crc_mismatch",
            TransportError::ShortResponse(_) => "short_response",
            TransportError::DeviceException(_) => "device_exception",
            TransportError::LinkDown(_) => "link_down",
        }
    }
}

/// Which normally fatal transport errors a poller should retry instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransientPolicy {
    /// Retry after `LinkDown` (e.g. a USB adapter that re-enumerates).
    #[serde(default)]
    pub link_down: bool,
    /// Retry after a Modbus exception response.
    #[serde(default)]
    pub device_exception: bool,
}

/// Reads a contiguous run of registers from one unit on the bus.
///
/// Implementations must return within their configured timeout; a hung bus is
/// reported as [`TransportError::Timeout`].
pub trait Transport: Send {
    fn read_registers(
        &mut self,
        unit_id: u8,
        space: RegisterSpace,
        start: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, TransportError>> + Send;
}

/// The transports a configured device can use.
#[derive(Debug)]
pub enum DeviceTransport {
    Modbus(ModbusTransport),
    Simulated(SimulatedDevice),
}

impl Transport for DeviceTransport {
    async fn read_registers(
        &mut self,
        unit_id: u8,
        space: RegisterSpace,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        match self {
            DeviceTransport::Modbus(t) => t.read_registers(unit_id, space, start, count).await,
            DeviceTransport::Simulated(t) => t.read_registers(unit_id, space, start, count).await,
        }
    }
}

impl From<ModbusTransport> for DeviceTransport {
    fn from(t: ModbusTransport) -> Self {
        DeviceTransport::Modbus(t)
    }
}

impl From<SimulatedDevice> for DeviceTransport {
    fn from(t: SimulatedDevice) -> Self {
        DeviceTransport::Simulated(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classification() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::CrcMismatch.is_transient());
        assert!(TransportError::ShortResponse("3 of 5".into()).is_transient());
        assert!(!TransportError::DeviceException(0x02).is_transient());
        assert!(!TransportError::LinkDown("unplugged".into()).is_transient());
    }

    #[test]
    fn test_policy_promotes_fatal_kinds() {
        let policy = TransientPolicy {
            link_down: true,
            device_exception: false,
        };
        assert!(TransportError::LinkDown("gone".into()).is_transient_under(&policy));
        assert!(!TransportError::DeviceException(0x04).is_transient_under(&policy));
        assert!(TransportError::Timeout.is_transient_under(&TransientPolicy::default()));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            TransportError::DeviceException(2).to_string(),
            "device returned exception code 0x02"
        );
        assert_eq!(TransportError::CrcMismatch.kind(), "crc_mismatch");
    }
}
