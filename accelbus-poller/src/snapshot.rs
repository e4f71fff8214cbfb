//! Raw register blocks and the decoded snapshots built from them.

use std::fmt;

use accelbus_common::TelemetryValue;
use chrono::{DateTime, Utc};

use crate::decoder;
use crate::register_map::{DecodeError, Encoding, RegisterField, RegisterMap, RegisterSpace};

/// Words returned by one transport read, tagged with where they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    space: RegisterSpace,
    start: u16,
    words: Vec<u16>,
}

impl RawBlock {
    pub fn new(space: RegisterSpace, start: u16, words: Vec<u16>) -> Self {
        Self { space, start, words }
    }

    pub fn space(&self) -> RegisterSpace {
        self.space
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }

    /// The `width` words starting at `address`, if the block holds all of them.
    pub fn slice(&self, address: u16, width: u16) -> Option<&[u16]> {
        let offset = usize::from(address.checked_sub(self.start)?);
        self.words.get(offset..offset + usize::from(width))
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Uint16(u16),
    Scaled(f64),
    Float32(f32),
    Uint32(u32),
    /// Names of the set bits, in bit order. Empty when no flag is active.
    Flags(Vec<String>),
}

impl TypedValue {
    /// Numeric view of the value; `None` for flags.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Uint16(v) => Some(f64::from(*v)),
            TypedValue::Scaled(v) => Some(*v),
            TypedValue::Float32(v) => Some(f64::from(*v)),
            TypedValue::Uint32(v) => Some(f64::from(*v)),
            TypedValue::Flags(_) => None,
        }
    }

    /// Integer view of raw and 32-bit counter values.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            TypedValue::Uint16(v) => Some(u32::from(*v)),
            TypedValue::Uint32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn flags(&self) -> Option<&[String]> {
        match self {
            TypedValue::Flags(flags) => Some(flags),
            _ => None,
        }
    }

    /// Convert into the published telemetry representation.
    pub fn to_telemetry(&self) -> TelemetryValue {
        match self {
            TypedValue::Uint16(v) => TelemetryValue::Counter(u64::from(*v)),
            TypedValue::Uint32(v) => TelemetryValue::Counter(u64::from(*v)),
            TypedValue::Scaled(v) => TelemetryValue::Gauge(*v),
            TypedValue::Float32(v) => TelemetryValue::Gauge(f64::from(*v)),
            TypedValue::Flags(flags) => TelemetryValue::Flags(flags.clone()),
        }
    }
}

/// Sentinel shown for a bitfield with no active flags.
pub const NO_FLAGS: &str = "NONE";

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Uint16(v) => write!(f, "{}", v),
            TypedValue::Uint32(v) => write!(f, "{}", v),
            TypedValue::Scaled(v) => write!(f, "{:.3}", v),
            TypedValue::Float32(v) => write!(f, "{:.3}", v),
            TypedValue::Flags(flags) if flags.is_empty() => f.write_str(NO_FLAGS),
            TypedValue::Flags(flags) => f.write_str(&flags.join(", ")),
        }
    }
}

/// One decoded field inside a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    pub name: String,
    pub address: u16,
    pub unit: Option<String>,
    pub value: TypedValue,
}

/// Every field of a map decoded from one register block.
///
/// Snapshots are never modified after [`decode_block`] builds them; each poll
/// cycle produces a fresh one.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSnapshot {
    map_name: String,
    space: RegisterSpace,
    acquired_at: DateTime<Utc>,
    start: u16,
    count: u16,
    values: Vec<FieldValue>,
    errors: Vec<DecodeError>,
}

impl DecodedSnapshot {
    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    pub fn space(&self) -> RegisterSpace {
        self.space
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// `(start_address, count)` of the block the snapshot was decoded from.
    pub fn address_range(&self) -> (u16, u16) {
        (self.start, self.count)
    }

    /// Decoded fields in map order.
    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Fields that could not be decoded.
    pub fn errors(&self) -> &[DecodeError] {
        &self.errors
    }

    pub fn get(&self, name: &str) -> Option<&TypedValue> {
        self.values
            .iter()
            .find(|v| v.name == name)
            .map(|v| &v.value)
    }

    /// True when every field of the map decoded.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Decode one field against a block.
pub fn decode_field(field: &RegisterField, block: &RawBlock) -> Result<TypedValue, DecodeError> {
    let words = block
        .slice(field.start_address(), field.width_in_registers())
        .ok_or_else(|| DecodeError::TruncatedField(field.name().to_string()))?;

    let value = match (field.encoding(), words) {
        (Encoding::RawUint16, [word]) => TypedValue::Uint16(decoder::decode_raw_uint16(*word)),
        (Encoding::SignedScaledInt16 { scale }, [word]) => {
            TypedValue::Scaled(decoder::decode_signed_scaled_int16(*word, *scale))
        }
        (Encoding::Bitfield16 { bit_names }, [word]) => {
            TypedValue::Flags(decoder::decode_bitfield16(*word, bit_names))
        }
        (Encoding::Float32Pair, [low, high]) => {
            TypedValue::Float32(decoder::decode_float32_pair(*low, *high))
        }
        (Encoding::Uint32Pair, [low, high]) => {
            TypedValue::Uint32(decoder::decode_uint32_pair(*low, *high))
        }
        (encoding, _) => {
            return Err(DecodeError::InvalidEncodingConfiguration {
                field: field.name().to_string(),
                reason: format!(
                    "{} cannot be decoded from {} register(s)",
                    encoding.kind(),
                    words.len()
                ),
            });
        }
    };

    Ok(value)
}

/// Decode every field of `map` against `block`.
///
/// Decoding is per field: a field the block does not fully cover is recorded as a
/// [`DecodeError::TruncatedField`] and the remaining fields still decode.
pub fn decode_block(map: &RegisterMap, block: &RawBlock) -> DecodedSnapshot {
    let mut values = Vec::with_capacity(map.len());
    let mut errors = Vec::new();

    for field in map.fields() {
        match decode_field(field, block) {
            Ok(value) => values.push(FieldValue {
                name: field.name().to_string(),
                address: field.start_address(),
                unit: field.unit().map(str::to_string),
                value,
            }),
            Err(e) => errors.push(e),
        }
    }

    DecodedSnapshot {
        map_name: map.name().to_string(),
        space: block.space(),
        acquired_at: Utc::now(),
        start: block.start(),
        count: u16::try_from(block.len()).unwrap_or(u16::MAX),
        values,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> RegisterMap {
        RegisterMap::new(
            "sample",
            RegisterSpace::Holding,
            vec![
                RegisterField::raw("device_id", 0),
                RegisterField::scaled("avg_x", 1, 1000.0).with_unit("g"),
                RegisterField::bitfield("status", 2, ["sampling", "processing"]),
                RegisterField::uint32("window_count", 3),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_decode_full_block() {
        let block = RawBlock::new(
            RegisterSpace::Holding,
            0,
            vec![0x1234, 0xFC18, 0x0002, 0x1170, 0x0001],
        );
        let snapshot = decode_block(&sample_map(), &block);

        assert!(snapshot.is_complete());
        assert_eq!(snapshot.address_range(), (0, 5));
        assert_eq!(snapshot.get("device_id"), Some(&TypedValue::Uint16(0x1234)));
        assert_eq!(snapshot.get("avg_x"), Some(&TypedValue::Scaled(-1.0)));
        assert_eq!(
            snapshot.get("status"),
            Some(&TypedValue::Flags(vec!["processing".to_string()]))
        );
        assert_eq!(snapshot.get("window_count"), Some(&TypedValue::Uint32(70_000)));
        assert_eq!(snapshot.values()[1].unit.as_deref(), Some("g"));
    }

    #[test]
    fn test_partial_decode_records_one_truncation() {
        // Missing the high word of window_count
        let block = RawBlock::new(RegisterSpace::Holding, 0, vec![0x1234, 1000, 0, 7]);
        let snapshot = decode_block(&sample_map(), &block);

        assert_eq!(snapshot.values().len(), 3);
        assert_eq!(
            snapshot.errors(),
            &[DecodeError::TruncatedField("window_count".to_string())]
        );
        assert_eq!(snapshot.get("avg_x"), Some(&TypedValue::Scaled(1.0)));
        assert!(snapshot.get("window_count").is_none());
        assert!(!snapshot.is_complete());
    }

    #[test]
    fn test_field_before_block_start_is_truncated() {
        let block = RawBlock::new(RegisterSpace::Holding, 2, vec![0, 0, 0]);
        let field = RegisterField::raw("device_id", 0);
        assert_eq!(
            decode_field(&field, &block),
            Err(DecodeError::TruncatedField("device_id".to_string()))
        );
    }

    #[test]
    fn test_gaps_are_ignored() {
        let map = RegisterMap::new(
            "gappy",
            RegisterSpace::Input,
            vec![RegisterField::raw("a", 10), RegisterField::float32("b", 14)],
        )
        .unwrap();
        let (low, high) = decoder::split_float32(2.5);
        let block = RawBlock::new(RegisterSpace::Input, 10, vec![7, 0xDEAD, 0xBEEF, 0xCAFE, low, high]);

        let snapshot = decode_block(&map, &block);
        assert!(snapshot.is_complete());
        assert_eq!(snapshot.get("b"), Some(&TypedValue::Float32(2.5)));
    }

    #[test]
    fn test_oversized_block_count_saturates() {
        let block = RawBlock::new(RegisterSpace::Holding, 0, vec![0x1234; 70_000]);
        let snapshot = decode_block(&sample_map(), &block);
        assert_eq!(snapshot.address_range(), (0, u16::MAX));
        assert_eq!(snapshot.get("device_id"), Some(&TypedValue::Uint16(0x1234)));
    }

    #[test]
    fn test_block_slice() {
        let block = RawBlock::new(RegisterSpace::Input, 5, vec![1, 2, 3]);
        assert_eq!(block.slice(5, 2), Some(&[1u16, 2][..]));
        assert_eq!(block.slice(7, 1), Some(&[3u16][..]));
        assert_eq!(block.slice(7, 2), None);
        assert_eq!(block.slice(4, 1), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(TypedValue::Flags(vec![]).to_string(), "NONE");
        assert_eq!(
            TypedValue::Flags(vec!["sampling".into(), "modbus".into()]).to_string(),
            "sampling, modbus"
        );
        assert_eq!(TypedValue::Scaled(-0.001).to_string(), "-0.001");
        assert_eq!(TypedValue::Uint32(70_000).to_string(), "70000");
    }

    #[test]
    fn test_telemetry_conversion() {
        assert_eq!(
            TypedValue::Uint32(70_000).to_telemetry(),
            TelemetryValue::Counter(70_000)
        );
        assert_eq!(TypedValue::Scaled(0.2).to_telemetry(), TelemetryValue::Gauge(0.2));
        assert_eq!(
            TypedValue::Flags(vec![]).to_telemetry(),
            TelemetryValue::Flags(vec![])
        );
        assert_eq!(TypedValue::Flags(vec![]).as_f64(), None);
        assert_eq!(TypedValue::Uint16(100).as_u32(), Some(100));
    }
}
