//! Pure conversions from raw 16-bit register words to typed values.
//!
//! Two-register values follow the sensor node's convention: the low-order word is
//! transmitted first, the high-order word second, and the combined 32-bit pattern
//! is `(high << 16) | low`.

/// Identity decode of a raw register.
pub fn decode_raw_uint16(word: u16) -> u16 {
    word
}

/// Reinterpret `word` as two's-complement and divide by `scale`.
///
/// `scale` is a positive divisor, e.g. `1000.0` for milli-units. Register maps reject
/// non-positive scales at construction, so this never sees one from a validated map.
pub fn decode_signed_scaled_int16(word: u16, scale: f64) -> f64 {
    f64::from(word as i16) / scale
}

/// Combine a low/high register pair into an IEEE-754 single-precision float.
pub fn decode_float32_pair(low_word: u16, high_word: u16) -> f32 {
    f32::from_bits(decode_uint32_pair(low_word, high_word))
}

/// Combine a low/high register pair into an unsigned 32-bit integer.
pub fn decode_uint32_pair(low_word: u16, high_word: u16) -> u32 {
    (u32::from(high_word) << 16) | u32::from(low_word)
}

/// Return the names of the set bits in `word`, in bit order.
///
/// `bit_names[i]` names bit `i`; empty names and positions past the end of the
/// slice are unnamed and never reported. No set bits yields an empty vector.
pub fn decode_bitfield16<S: AsRef<str>>(word: u16, bit_names: &[S]) -> Vec<String> {
    let mut active = Vec::new();
    for (bit, name) in bit_names.iter().take(16).enumerate() {
        let name: &str = name.as_ref();
        if word & (1u16 << bit) != 0 && !name.is_empty() {
            active.push(name.to_string());
        }
    }
    active
}

/// Split a `u32` into the (low, high) word pair the device transmits.
pub fn split_uint32(value: u32) -> (u16, u16) {
    ((value & 0xFFFF) as u16, (value >> 16) as u16)
}

/// Split an `f32` into the (low, high) word pair the device transmits.
pub fn split_float32(value: f32) -> (u16, u16) {
    split_uint32(value.to_bits())
}

/// Encode a physical value as the firmware does: multiply by `scale`, truncate toward
/// zero and clamp to the `i16` range.
pub fn encode_signed_scaled_int16(value: f64, scale: f64) -> u16 {
    let scaled = (value * scale) as i64;
    scaled.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16 as u16
}
