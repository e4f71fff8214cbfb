//! Typed register access to one unit on a transport.

use thiserror::Error;
use tracing::trace;

use crate::register_map::{DecodeError, RegisterMap, RegisterSpace};
use crate::snapshot::{DecodedSnapshot, RawBlock, TypedValue, decode_block, decode_field};
use crate::transport::{Transport, TransportError};

/// Errors from a single-field read.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("register map '{map}' has no field '{field}'")]
    UnknownField { map: String, field: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A transport bound to one Modbus unit id.
#[derive(Debug)]
pub struct DeviceSession<T> {
    transport: T,
    unit_id: u8,
}

impl<T: Transport> DeviceSession<T> {
    pub fn new(transport: T, unit_id: u8) -> Self {
        Self { transport, unit_id }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Read `count` registers starting at `start`.
    ///
    /// A response with any other length is a [`TransportError::ShortResponse`],
    /// never a partial block.
    pub async fn read_raw(
        &mut self,
        space: RegisterSpace,
        start: u16,
        count: u16,
    ) -> Result<RawBlock, TransportError> {
        let words = self
            .transport
            .read_registers(self.unit_id, space, start, count)
            .await?;

        if words.len() != usize::from(count) {
            return Err(TransportError::ShortResponse(format!(
                "requested {} {} registers at {}, got {}",
                count,
                space,
                start,
                words.len()
            )));
        }

        trace!(unit = self.unit_id, %space, start, count, "Read register block");
        Ok(RawBlock::new(space, start, words))
    }

    /// Read the covering block of `map` in one request and decode every field.
    pub async fn read_block(&mut self, map: &RegisterMap) -> Result<DecodedSnapshot, TransportError> {
        let (start, count) = map.minimal_covering_block();
        let block = self.read_raw(map.space(), start, count).await?;
        Ok(decode_block(map, &block))
    }

    /// Read and decode a single field, touching only its own registers.
    pub async fn read_field(
        &mut self,
        map: &RegisterMap,
        field_name: &str,
    ) -> Result<TypedValue, SessionError> {
        let field = map
            .field(field_name)
            .ok_or_else(|| SessionError::UnknownField {
                map: map.name().to_string(),
                field: field_name.to_string(),
            })?;

        let block = self
            .read_raw(map.space(), field.start_address(), field.width_in_registers())
            .await?;
        Ok(decode_field(field, &block)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::Profile;
    use crate::simulator::SimulatedDevice;

    /// Answers every read with a fixed number of zero words.
    struct FixedLength(usize);

    impl Transport for FixedLength {
        async fn read_registers(
            &mut self,
            _unit_id: u8,
            _space: RegisterSpace,
            _start: u16,
            _count: u16,
        ) -> Result<Vec<u16>, TransportError> {
            Ok(vec![0; self.0])
        }
    }

    #[tokio::test]
    async fn test_read_block_decodes_identity() {
        let map = Profile::Identity.register_map().unwrap();
        let mut session = DeviceSession::new(SimulatedDevice::new(1), 1);

        let snapshot = session.read_block(&map).await.unwrap();
        assert!(snapshot.is_complete());
        assert_eq!(snapshot.get("device_id"), Some(&TypedValue::Uint16(0x1234)));
        assert_eq!(snapshot.get("firmware_version"), Some(&TypedValue::Uint16(100)));
        assert_eq!(snapshot.address_range(), (0, 5));
    }

    #[tokio::test]
    async fn test_short_response_is_an_error() {
        let map = Profile::Identity.register_map().unwrap();
        let mut session = DeviceSession::new(FixedLength(4), 1);

        let err = session.read_block(&map).await.unwrap_err();
        assert!(matches!(err, TransportError::ShortResponse(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_read_field_scopes_the_request() {
        let map = Profile::Identity.register_map().unwrap();
        let mut device = SimulatedDevice::new(1);
        device.freeze().set_uint32(RegisterSpace::Holding, 3, 70_000);
        let mut session = DeviceSession::new(device, 1);

        assert_eq!(
            session.read_field(&map, "window_count").await,
            Ok(TypedValue::Uint32(70_000))
        );
        assert_eq!(
            session.read_field(&map, "device_id").await,
            Ok(TypedValue::Uint16(0x1234))
        );

        // A two-word answer for a one-word field is rejected before decoding
        let mut session = DeviceSession::new(FixedLength(2), 1);
        assert!(matches!(
            session.read_field(&map, "device_id").await,
            Err(SessionError::Transport(TransportError::ShortResponse(_)))
        ));
    }

    #[tokio::test]
    async fn test_read_field_unknown_name() {
        let map = Profile::Identity.register_map().unwrap();
        let mut session = DeviceSession::new(SimulatedDevice::new(1), 1);

        let err = session.read_field(&map, "serial_number").await.unwrap_err();
        assert_eq!(
            err,
            SessionError::UnknownField {
                map: "identity".to_string(),
                field: "serial_number".to_string(),
            }
        );
        assert_eq!(session.transport().read_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_errors_pass_through() {
        let map = Profile::Analytics.register_map().unwrap();
        let mut device = SimulatedDevice::new(1);
        device.fail_next([TransportError::DeviceException(0x04)]);
        let mut session = DeviceSession::new(device, 1);

        assert_eq!(
            session.read_block(&map).await.unwrap_err(),
            TransportError::DeviceException(0x04)
        );
        assert!(session.read_block(&map).await.is_ok());
    }
}
