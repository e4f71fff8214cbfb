//! Declarative register schema.
//!
//! A [`RegisterMap`] names every telemetry field a device exposes in one register
//! space, together with its address, width and decoding rule. Maps are validated
//! once at construction and are immutable afterwards, so a single map can be shared
//! (behind an `Arc`) by every poller talking to the same device class.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest register count a single Modbus read request may carry.
pub const MAX_REGISTERS_PER_READ: u16 = 125;

/// Errors raised while decoding a single field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The register block does not contain every word the field needs.
    #[error("field '{0}' is not fully covered by the register block")]
    TruncatedField(String),

    /// The field's encoding parameters are unusable. Only raised while building a map.
    #[error("field '{field}': invalid encoding configuration: {reason}")]
    InvalidEncodingConfiguration { field: String, reason: String },
}

/// Errors raised while building a [`RegisterMap`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    #[error("register map '{0}' has no fields")]
    Empty(String),

    #[error("duplicate field name '{0}'")]
    DuplicateField(String),

    #[error("fields '{first}' and '{second}' overlap; mark one as an alias view to allow it")]
    Overlap { first: String, second: String },

    #[error(
        "register map '{map}' spans {count} registers, more than the {max} a single read can return"
    )]
    BlockTooLarge { map: String, count: u32, max: u16 },

    #[error(transparent)]
    Encoding(#[from] DecodeError),
}

/// Modbus register address space a map is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterSpace {
    /// Holding registers (function code 0x03).
    Holding,
    /// Input registers (function code 0x04).
    Input,
}

impl RegisterSpace {
    /// Return the string name for this register space.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterSpace::Holding => "holding",
            RegisterSpace::Input => "input",
        }
    }
}

impl fmt::Display for RegisterSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the words of a field are turned into a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoding {
    /// One register, reported unchanged.
    RawUint16,
    /// One register, two's-complement, divided by `scale`.
    SignedScaledInt16 { scale: f64 },
    /// Two registers (low word first) holding an IEEE-754 single.
    Float32Pair,
    /// Two registers (low word first) holding an unsigned 32-bit integer.
    Uint32Pair,
    /// One register of named flags; `bit_names[i]` names bit `i`.
    Bitfield16 { bit_names: Vec<String> },
}

impl Encoding {
    /// Number of registers this encoding occupies.
    pub fn width(&self) -> u16 {
        match self {
            Encoding::RawUint16 | Encoding::SignedScaledInt16 { .. } | Encoding::Bitfield16 { .. } => 1,
            Encoding::Float32Pair | Encoding::Uint32Pair => 2,
        }
    }

    /// Short name used in configuration files and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Encoding::RawUint16 => "raw_uint16",
            Encoding::SignedScaledInt16 { .. } => "signed_scaled_int16",
            Encoding::Float32Pair => "float32_pair",
            Encoding::Uint32Pair => "uint32_pair",
            Encoding::Bitfield16 { .. } => "bitfield16",
        }
    }

    fn check(&self, field: &str) -> Result<(), DecodeError> {
        let invalid = |reason: String| DecodeError::InvalidEncodingConfiguration {
            field: field.to_string(),
            reason,
        };

        match self {
            Encoding::SignedScaledInt16 { scale } if !(scale.is_finite() && *scale > 0.0) => {
                Err(invalid(format!("scale must be a positive number, got {}", scale)))
            }
            Encoding::Bitfield16 { bit_names } => {
                if bit_names.len() > 16 {
                    return Err(invalid(format!(
                        "{} bit names configured for a 16-bit register",
                        bit_names.len()
                    )));
                }
                let mut seen = HashSet::new();
                for name in bit_names.iter().filter(|n| !n.is_empty()) {
                    if !seen.insert(name.as_str()) {
                        return Err(invalid(format!("bit name '{}' used twice", name)));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// One logical telemetry value.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterField {
    name: String,
    start_address: u16,
    width_in_registers: u16,
    encoding: Encoding,
    alias: bool,
    unit: Option<String>,
}

impl RegisterField {
    /// Create a field with an explicit width.
    ///
    /// The width is checked against the encoding when the field is added to a
    /// [`RegisterMap`]; the shorthand constructors below always agree.
    pub fn new(
        name: impl Into<String>,
        start_address: u16,
        width_in_registers: u16,
        encoding: Encoding,
    ) -> Self {
        Self {
            name: name.into(),
            start_address,
            width_in_registers,
            encoding,
            alias: false,
            unit: None,
        }
    }

    fn implied(name: impl Into<String>, start_address: u16, encoding: Encoding) -> Self {
        let width = encoding.width();
        Self::new(name, start_address, width, encoding)
    }

    pub fn raw(name: impl Into<String>, address: u16) -> Self {
        Self::implied(name, address, Encoding::RawUint16)
    }

    pub fn scaled(name: impl Into<String>, address: u16, scale: f64) -> Self {
        Self::implied(name, address, Encoding::SignedScaledInt16 { scale })
    }

    pub fn float32(name: impl Into<String>, address: u16) -> Self {
        Self::implied(name, address, Encoding::Float32Pair)
    }

    pub fn uint32(name: impl Into<String>, address: u16) -> Self {
        Self::implied(name, address, Encoding::Uint32Pair)
    }

    pub fn bitfield<S: Into<String>>(
        name: impl Into<String>,
        address: u16,
        bit_names: impl IntoIterator<Item = S>,
    ) -> Self {
        let bit_names = bit_names.into_iter().map(Into::into).collect();
        Self::implied(name, address, Encoding::Bitfield16 { bit_names })
    }

    /// Mark this field as an alias view: it may overlap other fields.
    pub fn as_alias(mut self) -> Self {
        self.alias = true;
        self
    }

    /// Attach a unit of measurement (metadata only).
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_address(&self) -> u16 {
        self.start_address
    }

    pub fn width_in_registers(&self) -> u16 {
        self.width_in_registers
    }

    /// One past the last address this field occupies.
    pub fn end_address(&self) -> u32 {
        u32::from(self.start_address) + u32::from(self.width_in_registers)
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub fn is_alias(&self) -> bool {
        self.alias
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    fn overlaps(&self, other: &RegisterField) -> bool {
        u32::from(self.start_address) < other.end_address()
            && u32::from(other.start_address) < self.end_address()
    }

    fn validate(&self) -> Result<(), DecodeError> {
        let expected = self.encoding.width();
        if self.width_in_registers != expected {
            return Err(DecodeError::InvalidEncodingConfiguration {
                field: self.name.clone(),
                reason: format!(
                    "{} needs {} register(s), width is {}",
                    self.encoding.kind(),
                    expected,
                    self.width_in_registers
                ),
            });
        }
        if self.end_address() > 0x1_0000 {
            return Err(DecodeError::InvalidEncodingConfiguration {
                field: self.name.clone(),
                reason: format!("address {} runs past the register space", self.start_address),
            });
        }
        self.encoding.check(&self.name)
    }
}

/// An ordered, validated collection of fields in one register space.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterMap {
    name: String,
    space: RegisterSpace,
    fields: Vec<RegisterField>,
}

impl RegisterMap {
    /// Build and validate a map.
    ///
    /// Rejects empty maps, duplicate names, widths that disagree with the encoding,
    /// overlaps between non-alias fields, and maps whose covering block is too large
    /// for a single read.
    pub fn new(
        name: impl Into<String>,
        space: RegisterSpace,
        fields: Vec<RegisterField>,
    ) -> Result<Self, MapError> {
        let name = name.into();
        if fields.is_empty() {
            return Err(MapError::Empty(name));
        }

        {
            let mut names = HashSet::new();
            for field in &fields {
                field.validate()?;
                if !names.insert(field.name.as_str()) {
                    return Err(MapError::DuplicateField(field.name.clone()));
                }
            }
        }

        for (i, first) in fields.iter().enumerate() {
            for second in &fields[i + 1..] {
                if first.overlaps(second) && !first.alias && !second.alias {
                    return Err(MapError::Overlap {
                        first: first.name.clone(),
                        second: second.name.clone(),
                    });
                }
            }
        }

        let map = Self {
            name,
            space,
            fields,
        };

        let (_, count) = map.covering_span();
        if count > u32::from(MAX_REGISTERS_PER_READ) {
            return Err(MapError::BlockTooLarge {
                map: map.name,
                count,
                max: MAX_REGISTERS_PER_READ,
            });
        }

        Ok(map)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn space(&self) -> RegisterSpace {
        self.space
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[RegisterField] {
        &self.fields
    }

    /// Look a field up by name.
    pub fn field(&self, name: &str) -> Option<&RegisterField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Smallest contiguous `(start_address, count)` containing every field.
    ///
    /// Starts at the lowest field start and ends at the highest field end; unused
    /// addresses in between are read and ignored.
    pub fn minimal_covering_block(&self) -> (u16, u16) {
        let (start, count) = self.covering_span();
        // Construction guarantees count <= MAX_REGISTERS_PER_READ.
        (start, count as u16)
    }

    fn covering_span(&self) -> (u16, u32) {
        let start = self
            .fields
            .iter()
            .map(|f| f.start_address)
            .min()
            .unwrap_or(0);
        let end = self
            .fields
            .iter()
            .map(RegisterField::end_address)
            .max()
            .unwrap_or(0);
        (start, end - u32::from(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_fields() -> Vec<RegisterField> {
        vec![
            RegisterField::raw("device_id", 0),
            RegisterField::raw("firmware_version", 1),
            RegisterField::raw("sample_rate", 2),
            RegisterField::uint32("window_count", 3),
        ]
    }

    #[test]
    fn test_covering_block_with_gap() {
        let mut fields = identity_fields();
        for (i, address) in (14..=28).enumerate() {
            fields.push(RegisterField::scaled(format!("stat_{}", i), address, 1000.0));
        }

        let map = RegisterMap::new("combined", RegisterSpace::Holding, fields).unwrap();
        assert_eq!(map.minimal_covering_block(), (0, 29));
    }

    #[test]
    fn test_covering_block_starts_at_lowest_field() {
        let fields = vec![
            RegisterField::raw("late", 40),
            RegisterField::float32("early", 30),
        ];
        let map = RegisterMap::new("m", RegisterSpace::Input, fields).unwrap();
        assert_eq!(map.minimal_covering_block(), (30, 11));
        // Declaration order is preserved
        assert_eq!(map.fields()[0].name(), "late");
    }

    #[test]
    fn test_rejects_overlap() {
        let fields = vec![
            RegisterField::uint32("window_count", 3),
            RegisterField::raw("window_count_high", 4),
        ];
        let err = RegisterMap::new("m", RegisterSpace::Holding, fields).unwrap_err();
        assert_eq!(
            err,
            MapError::Overlap {
                first: "window_count".to_string(),
                second: "window_count_high".to_string(),
            }
        );
    }

    #[test]
    fn test_alias_may_overlap() {
        let fields = vec![
            RegisterField::uint32("window_count", 3),
            RegisterField::raw("window_count_low", 3).as_alias(),
        ];
        let map = RegisterMap::new("m", RegisterSpace::Holding, fields).unwrap();
        assert_eq!(map.minimal_covering_block(), (3, 2));
    }

    #[test]
    fn test_rejects_width_mismatch() {
        let fields = vec![RegisterField::new("f", 0, 1, Encoding::Float32Pair)];
        let err = RegisterMap::new("m", RegisterSpace::Holding, fields).unwrap_err();
        assert!(matches!(
            err,
            MapError::Encoding(DecodeError::InvalidEncodingConfiguration { ref field, .. }) if field == "f"
        ));

        let fields = vec![RegisterField::new("raw", 0, 2, Encoding::RawUint16)];
        assert!(RegisterMap::new("m", RegisterSpace::Holding, fields).is_err());
    }

    #[test]
    fn test_rejects_bad_scale() {
        for scale in [0.0, -1000.0, f64::NAN, f64::INFINITY] {
            let fields = vec![RegisterField::scaled("x", 0, scale)];
            assert!(
                RegisterMap::new("m", RegisterSpace::Input, fields).is_err(),
                "scale {scale} accepted"
            );
        }
    }

    #[test]
    fn test_rejects_bad_bitfields() {
        let too_many: Vec<String> = (0..17).map(|i| format!("b{}", i)).collect();
        let fields = vec![RegisterField::bitfield("flags", 0, too_many)];
        assert!(RegisterMap::new("m", RegisterSpace::Input, fields).is_err());

        let fields = vec![RegisterField::bitfield("flags", 0, ["a", "a"])];
        assert!(RegisterMap::new("m", RegisterSpace::Input, fields).is_err());

        // Unnamed positions may repeat
        let fields = vec![RegisterField::bitfield("flags", 0, ["a", "", "", "d"])];
        assert!(RegisterMap::new("m", RegisterSpace::Input, fields).is_ok());
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        let fields = vec![RegisterField::raw("x", 0), RegisterField::raw("x", 1)];
        assert_eq!(
            RegisterMap::new("m", RegisterSpace::Input, fields).unwrap_err(),
            MapError::DuplicateField("x".to_string())
        );

        assert_eq!(
            RegisterMap::new("m", RegisterSpace::Input, vec![]).unwrap_err(),
            MapError::Empty("m".to_string())
        );
    }

    #[test]
    fn test_rejects_field_past_address_space() {
        let fields = vec![RegisterField::uint32("wrap", u16::MAX)];
        assert!(RegisterMap::new("m", RegisterSpace::Input, fields).is_err());
    }

    #[test]
    fn test_rejects_oversized_block() {
        let fields = vec![RegisterField::raw("a", 0), RegisterField::raw("b", 200)];
        assert!(matches!(
            RegisterMap::new("m", RegisterSpace::Input, fields),
            Err(MapError::BlockTooLarge { count: 201, .. })
        ));
    }

    #[test]
    fn test_field_lookup() {
        let map = RegisterMap::new("identity", RegisterSpace::Holding, identity_fields()).unwrap();
        let field = map.field("window_count").unwrap();
        assert_eq!(field.width_in_registers(), 2);
        assert_eq!(field.end_address(), 5);
        assert!(map.field("missing").is_none());
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_space_names() {
        assert_eq!(RegisterSpace::Holding.as_str(), "holding");
        assert_eq!(RegisterSpace::Input.to_string(), "input");
    }
}
