//! In-process stand-in for a sensor node.
//!
//! Serves the node's holding and input banks preloaded with the firmware's test
//! pattern, applies the same request checks as the firmware and can be scripted to
//! fail. Used by the test suites and by `connection.type = "simulated"`.

use std::collections::VecDeque;

use crate::decoder;
use crate::profiles::{EXPECTED_DEVICE_ID, SCALE_FACTOR};
use crate::register_map::{MAX_REGISTERS_PER_READ, RegisterMap, RegisterSpace};
use crate::transport::{Transport, TransportError};

/// Modbus exception "illegal data address".
pub const ILLEGAL_DATA_ADDRESS: u8 = 0x02;

const HOLDING_REGISTERS: usize = 5;
const INPUT_REGISTERS: usize = 36;
const WINDOW_COUNT_LOW: usize = 3;

#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    unit_id: u8,
    holding: Vec<u16>,
    input: Vec<u16>,
    script: VecDeque<TransportError>,
    fail_always: Option<TransportError>,
    reads: usize,
    advance_windows: bool,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SimulatedDevice {
    /// A node answering as `unit_id`, loaded with the firmware's test pattern.
    pub fn new(unit_id: u8) -> Self {
        let mut device = Self {
            unit_id,
            holding: vec![0; HOLDING_REGISTERS],
            input: vec![0; INPUT_REGISTERS],
            script: VecDeque::new(),
            fail_always: None,
            reads: 0,
            advance_windows: true,
        };
        device.load_test_pattern();
        device
    }

    fn load_test_pattern(&mut self) {
        self.holding[0] = EXPECTED_DEVICE_ID;
        self.holding[1] = 100;
        self.holding[2] = 1000;

        let axes = [
            (0, [0.1, 0.2, 1.0]),   // current avg
            (3, [0.15, 0.25, 1.1]), // current max
            (6, [0.05, 0.15, 0.9]), // current min
            (15, [0.1, 0.2, 1.0]),  // running avg
            (24, [0.15, 0.25, 1.1]), // global max
            (27, [0.05, 0.15, 0.9]), // global min
        ];
        for (start, values) in axes {
            for (offset, value) in values.into_iter().enumerate() {
                self.input[start + offset] =
                    decoder::encode_signed_scaled_int16(value, SCALE_FACTOR);
            }
        }

        self.input[30] = 0x000F;
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// Number of read requests received, failed ones included.
    pub fn read_count(&self) -> usize {
        self.reads
    }

    /// Queue errors returned by the next reads, one per read, in order.
    pub fn fail_next(&mut self, errors: impl IntoIterator<Item = TransportError>) -> &mut Self {
        self.script.extend(errors);
        self
    }

    /// Fail every read after the scripted ones with `error`. `None` heals the device.
    pub fn fail_always(&mut self, error: Option<TransportError>) -> &mut Self {
        self.fail_always = error;
        self
    }

    /// Stop the window counter advancing on each answered read.
    pub fn freeze(&mut self) -> &mut Self {
        self.advance_windows = false;
        self
    }

    /// Grow the bank of `map`'s space so its whole covering block is readable.
    pub fn cover(&mut self, map: &RegisterMap) -> &mut Self {
        let (start, count) = map.minimal_covering_block();
        let end = usize::from(start) + usize::from(count);
        let bank = self.bank_mut(map.space());
        if bank.len() < end {
            bank.resize(end, 0);
        }
        self
    }

    pub fn register(&self, space: RegisterSpace, address: u16) -> Option<u16> {
        self.bank(space).get(usize::from(address)).copied()
    }

    /// Write one register, growing the bank if needed.
    pub fn set_register(&mut self, space: RegisterSpace, address: u16, value: u16) -> &mut Self {
        let index = usize::from(address);
        let bank = self.bank_mut(space);
        if bank.len() <= index {
            bank.resize(index + 1, 0);
        }
        bank[index] = value;
        self
    }

    pub fn set_scaled(&mut self, space: RegisterSpace, address: u16, value: f64) -> &mut Self {
        let word = decoder::encode_signed_scaled_int16(value, SCALE_FACTOR);
        self.set_register(space, address, word)
    }

    pub fn set_uint32(&mut self, space: RegisterSpace, address: u16, value: u32) -> &mut Self {
        let (low, high) = decoder::split_uint32(value);
        self.set_register(space, address, low);
        self.set_register(space, address.saturating_add(1), high)
    }

    pub fn set_float32(&mut self, space: RegisterSpace, address: u16, value: f32) -> &mut Self {
        let (low, high) = decoder::split_float32(value);
        self.set_register(space, address, low);
        self.set_register(space, address.saturating_add(1), high)
    }

    fn bank(&self, space: RegisterSpace) -> &[u16] {
        match space {
            RegisterSpace::Holding => &self.holding,
            RegisterSpace::Input => &self.input,
        }
    }

    fn bank_mut(&mut self, space: RegisterSpace) -> &mut Vec<u16> {
        match space {
            RegisterSpace::Holding => &mut self.holding,
            RegisterSpace::Input => &mut self.input,
        }
    }

    fn answer(
        &mut self,
        unit_id: u8,
        space: RegisterSpace,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        self.reads += 1;

        if let Some(error) = self.script.pop_front() {
            return Err(error);
        }
        if let Some(error) = &self.fail_always {
            return Err(error.clone());
        }
        // Frames for another unit are ignored on the bus
        if unit_id != self.unit_id {
            return Err(TransportError::Timeout);
        }

        let bank = self.bank(space);
        let start = usize::from(start);
        let end = start + usize::from(count);
        if count == 0 || count > MAX_REGISTERS_PER_READ || end > bank.len() {
            return Err(TransportError::DeviceException(ILLEGAL_DATA_ADDRESS));
        }
        let words = bank[start..end].to_vec();

        if self.advance_windows && self.holding.len() > WINDOW_COUNT_LOW + 1 {
            let windows = decoder::decode_uint32_pair(
                self.holding[WINDOW_COUNT_LOW],
                self.holding[WINDOW_COUNT_LOW + 1],
            );
            let (low, high) = decoder::split_uint32(windows.wrapping_add(1));
            self.holding[WINDOW_COUNT_LOW] = low;
            self.holding[WINDOW_COUNT_LOW + 1] = high;
        }

        Ok(words)
    }
}

impl Transport for SimulatedDevice {
    async fn read_registers(
        &mut self,
        unit_id: u8,
        space: RegisterSpace,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        self.answer(unit_id, space, start, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::Profile;

    #[tokio::test]
    async fn test_identity_block() {
        let mut device = SimulatedDevice::new(1);
        let words = device
            .read_registers(1, RegisterSpace::Holding, 0, 5)
            .await
            .unwrap();
        assert_eq!(words, vec![0x1234, 100, 1000, 0, 0]);

        // The window counter advanced after the answer
        assert_eq!(device.register(RegisterSpace::Holding, 3), Some(1));
    }

    #[tokio::test]
    async fn test_input_test_pattern() {
        let mut device = SimulatedDevice::new(1);
        let words = device
            .read_registers(1, RegisterSpace::Input, 0, 36)
            .await
            .unwrap();
        assert_eq!(&words[0..3], &[100, 200, 1000]);
        assert_eq!(words[30], 0x000F);
    }

    #[tokio::test]
    async fn test_firmware_range_checks() {
        let mut device = SimulatedDevice::new(1);
        for (start, count) in [(0, 0), (0, 126), (3, 3), (36, 1)] {
            let space = if start == 36 {
                RegisterSpace::Input
            } else {
                RegisterSpace::Holding
            };
            assert_eq!(
                device.read_registers(1, space, start, count).await,
                Err(TransportError::DeviceException(ILLEGAL_DATA_ADDRESS)),
                "start {start} count {count}"
            );
        }
    }

    #[tokio::test]
    async fn test_other_unit_times_out() {
        let mut device = SimulatedDevice::new(7);
        assert_eq!(
            device.read_registers(1, RegisterSpace::Holding, 0, 1).await,
            Err(TransportError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_failure_script_then_heal() {
        let mut device = SimulatedDevice::new(1);
        device
            .fail_next([TransportError::CrcMismatch])
            .fail_always(Some(TransportError::Timeout));

        let read = |d: &mut SimulatedDevice| {
            let result = d.answer(1, RegisterSpace::Holding, 0, 1);
            result.map(|w| w[0])
        };
        assert_eq!(read(&mut device), Err(TransportError::CrcMismatch));
        assert_eq!(read(&mut device), Err(TransportError::Timeout));
        device.fail_always(None);
        assert_eq!(read(&mut device), Ok(0x1234));
        assert_eq!(device.read_count(), 3);
    }

    #[test]
    fn test_cover_grows_bank() {
        let map = Profile::Combined.register_map().unwrap();
        let mut device = SimulatedDevice::new(1);
        device.cover(&map);
        assert_eq!(device.register(RegisterSpace::Holding, 28), Some(0));
        assert_eq!(device.register(RegisterSpace::Holding, 0), Some(0x1234));
        assert_eq!(device.register(RegisterSpace::Holding, 29), None);
    }

    #[test]
    fn test_setters() {
        let mut device = SimulatedDevice::new(1);
        device
            .freeze()
            .set_uint32(RegisterSpace::Holding, 3, 70_000)
            .set_float32(RegisterSpace::Holding, 10, 9.81)
            .set_scaled(RegisterSpace::Input, 2, -0.001);

        assert_eq!(device.register(RegisterSpace::Holding, 3), Some(0x1170));
        assert_eq!(device.register(RegisterSpace::Holding, 4), Some(0x0001));
        assert_eq!(device.register(RegisterSpace::Input, 2), Some(0xFFFF));
        let low = device.register(RegisterSpace::Holding, 10).unwrap();
        let high = device.register(RegisterSpace::Holding, 11).unwrap();
        assert_eq!(decoder::decode_float32_pair(low, high), 9.81);
    }
}
