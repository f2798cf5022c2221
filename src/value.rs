//! # Value Codec
//!
//! Conversion between typed application values and raw 16-bit register
//! words. A [`Locator`] names a point (register range + offset), its
//! [`DataType`], and optional scaling; its `decode`/`encode` pair is the
//! single place where byte order, word swaps, BCD digits, modulo-10000
//! splits, strings and bit fields are handled.
//!
//! All conversions are big-endian at the register level, as Modbus defines;
//! the "swapped" data types reverse byte order (16-bit) or register order
//! (32/64-bit) around that native conversion. Numeric types carry an
//! inclusive bound on the on-wire integer which is enforced before encoding
//! — an out-of-bound value is a validation error, never a silent clamp.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModbusError, ModbusResult};

/// The four disjoint Modbus register address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterRange {
    /// Coils: read/write, 1 bit each.
    CoilStatus,
    /// Discrete inputs: read-only, 1 bit each.
    DiscreteInput,
    /// Holding registers: read/write, 16-bit words.
    HoldingRegister,
    /// Input registers: read-only, 16-bit words.
    InputRegister,
}

impl RegisterRange {
    /// Whether this range stores single bits rather than 16-bit words.
    pub fn is_bit_range(self) -> bool {
        matches!(self, RegisterRange::CoilStatus | RegisterRange::DiscreteInput)
    }

    /// Whether a remote master may write this range.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            RegisterRange::CoilStatus | RegisterRange::HoldingRegister
        )
    }
}

impl fmt::Display for RegisterRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegisterRange::CoilStatus => "coil status",
            RegisterRange::DiscreteInput => "discrete input",
            RegisterRange::HoldingRegister => "holding register",
            RegisterRange::InputRegister => "input register",
        };
        write!(f, "{}", name)
    }
}

/// How consecutive registers (or a single bit) map to an application value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// A boolean bit within one register (see [`Locator::bit_index`]).
    Binary,

    Uint16,
    Int16,
    /// 16-bit with the two bytes of the register reversed.
    Uint16Swapped,
    Int16Swapped,

    Uint32,
    Int32,
    /// 32-bit with the two registers in low-word-first order.
    Uint32Swapped,
    Int32Swapped,

    Uint64,
    Int64,
    /// 64-bit with the four registers in reversed order.
    Uint64Swapped,
    Int64Swapped,

    Float32,
    Float32Swapped,
    Float64,
    Float64Swapped,

    /// Binary-coded decimal, 4 digits in one register.
    Bcd16,
    /// Binary-coded decimal, 8 digits in two registers.
    Bcd32,
    Bcd32Swapped,

    /// Fixed-length character string; takes an explicit register count and
    /// pads with NUL bytes to exactly that length.
    Char,
    /// Variable-length character string; takes an explicit register count
    /// and trims trailing NUL bytes on decode.
    Varchar,

    /// Unsigned magnitude split base-10000 across two registers:
    /// `[value / 10000, value % 10000]`.
    Mod10kUint32,
    /// Same split with the registers in reversed order.
    Mod10kUint32Swapped,
    /// Unsigned magnitude split base-10000 across four registers.
    Mod10kUint64,
    Mod10kUint64Swapped,
}

/// Largest value representable by the 2-register modulo-10000 split
/// (`0xFFFF * 10000 + 9999`).
const MOD10K32_MAX: i128 = 655_359_999;

/// Largest value representable by the 4-register modulo-10000 split.
const MOD10K64_MAX: i128 = 65_535_999_999_999_999;

impl DataType {
    /// Number of consecutive registers a point of this type occupies, or
    /// `None` for string types, which take an explicit count.
    pub fn register_count(self) -> Option<u16> {
        match self {
            DataType::Binary
            | DataType::Uint16
            | DataType::Int16
            | DataType::Uint16Swapped
            | DataType::Int16Swapped
            | DataType::Bcd16 => Some(1),

            DataType::Uint32
            | DataType::Int32
            | DataType::Uint32Swapped
            | DataType::Int32Swapped
            | DataType::Float32
            | DataType::Float32Swapped
            | DataType::Bcd32
            | DataType::Bcd32Swapped
            | DataType::Mod10kUint32
            | DataType::Mod10kUint32Swapped => Some(2),

            DataType::Uint64
            | DataType::Int64
            | DataType::Uint64Swapped
            | DataType::Int64Swapped
            | DataType::Float64
            | DataType::Float64Swapped
            | DataType::Mod10kUint64
            | DataType::Mod10kUint64Swapped => Some(4),

            DataType::Char | DataType::Varchar => None,
        }
    }

    /// Whether this is a character string type.
    pub fn is_string(self) -> bool {
        matches!(self, DataType::Char | DataType::Varchar)
    }

    /// Inclusive bound on the on-wire integer value, where one applies.
    pub fn integer_bound(self) -> Option<(i128, i128)> {
        match self {
            DataType::Uint16 | DataType::Uint16Swapped => Some((0, u16::MAX as i128)),
            DataType::Int16 | DataType::Int16Swapped => {
                Some((i16::MIN as i128, i16::MAX as i128))
            }
            DataType::Uint32 | DataType::Uint32Swapped => Some((0, u32::MAX as i128)),
            DataType::Int32 | DataType::Int32Swapped => {
                Some((i32::MIN as i128, i32::MAX as i128))
            }
            DataType::Uint64 | DataType::Uint64Swapped => Some((0, u64::MAX as i128)),
            DataType::Int64 | DataType::Int64Swapped => {
                Some((i64::MIN as i128, i64::MAX as i128))
            }
            DataType::Bcd16 => Some((0, 9_999)),
            DataType::Bcd32 | DataType::Bcd32Swapped => Some((0, 99_999_999)),
            DataType::Mod10kUint32 | DataType::Mod10kUint32Swapped => Some((0, MOD10K32_MAX)),
            DataType::Mod10kUint64 | DataType::Mod10kUint64Swapped => Some((0, MOD10K64_MAX)),
            _ => None,
        }
    }
}

/// A typed application value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
}

impl Value {
    /// Numeric view of the value, for scaling and encoding.
    pub fn as_f64(&self) -> ModbusResult<f64> {
        match self {
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::U16(v) => Ok(*v as f64),
            Value::I16(v) => Ok(*v as f64),
            Value::U32(v) => Ok(*v as f64),
            Value::I32(v) => Ok(*v as f64),
            Value::U64(v) => Ok(*v as f64),
            Value::I64(v) => Ok(*v as f64),
            Value::F32(v) => Ok(*v as f64),
            Value::F64(v) => Ok(*v),
            Value::Str(_) => Err(ModbusError::invalid_data("string value is not numeric")),
        }
    }

    /// Integer view of the value. Floats must be integral.
    fn as_i128(&self) -> ModbusResult<i128> {
        match self {
            Value::Bool(b) => Ok(*b as i128),
            Value::U16(v) => Ok(*v as i128),
            Value::I16(v) => Ok(*v as i128),
            Value::U32(v) => Ok(*v as i128),
            Value::I32(v) => Ok(*v as i128),
            Value::U64(v) => Ok(*v as i128),
            Value::I64(v) => Ok(*v as i128),
            Value::F32(v) => Ok(v.round() as i128),
            Value::F64(v) => Ok(v.round() as i128),
            Value::Str(_) => Err(ModbusError::invalid_data("string value is not numeric")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
        }
    }
}

/// Names a point in a slave's register image and how to convert it.
///
/// Scaling maps the application value `v` to the on-wire magnitude as
/// `v_wire = v * scale - offset` on encode and back as
/// `v_app = v_wire / scale + offset` on decode. The asymmetry is the
/// established contract between the read and write paths and is preserved
/// exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Locator {
    pub range: RegisterRange,
    pub offset: u16,
    pub data_type: DataType,
    /// Bit position for `Binary` points inside their register. When absent,
    /// bit 0 is addressed; the whole-register boolean-array view is exposed
    /// by [`decode_bit_array`]/[`encode_bit_array`].
    pub bit_index: Option<u8>,
    /// Registers occupied. Derived from the data type except for string
    /// types, which require it explicitly.
    pub register_count: u16,
    pub scale: f64,
    pub offset_adjust: f64,
}

impl Locator {
    /// Create a locator for a non-string data type.
    pub fn new(range: RegisterRange, offset: u16, data_type: DataType) -> ModbusResult<Self> {
        let register_count = data_type.register_count().ok_or_else(|| {
            ModbusError::configuration(format!(
                "{:?} requires an explicit register count",
                data_type
            ))
        })?;
        Ok(Self {
            range,
            offset,
            data_type,
            bit_index: None,
            register_count,
            scale: 1.0,
            offset_adjust: 0.0,
        })
    }

    /// Create a locator with an explicit register count (string types).
    pub fn with_register_count(
        range: RegisterRange,
        offset: u16,
        data_type: DataType,
        register_count: u16,
    ) -> ModbusResult<Self> {
        if register_count == 0 {
            return Err(ModbusError::configuration("register count must be non-zero"));
        }
        if let Some(derived) = data_type.register_count() {
            if derived != register_count {
                return Err(ModbusError::configuration(format!(
                    "{:?} occupies {} registers, not {}",
                    data_type, derived, register_count
                )));
            }
        }
        Ok(Self {
            range,
            offset,
            data_type,
            bit_index: None,
            register_count,
            scale: 1.0,
            offset_adjust: 0.0,
        })
    }

    /// Address a single bit inside a `Binary` point's register.
    pub fn with_bit_index(mut self, bit_index: u8) -> ModbusResult<Self> {
        if self.data_type != DataType::Binary {
            return Err(ModbusError::configuration(
                "bit index only applies to Binary points",
            ));
        }
        if bit_index > 15 {
            return Err(ModbusError::configuration("bit index must be 0-15"));
        }
        self.bit_index = Some(bit_index);
        Ok(self)
    }

    /// Apply linear scaling to a numeric point.
    pub fn with_scaling(mut self, scale: f64, offset_adjust: f64) -> ModbusResult<Self> {
        if self.data_type.is_string() || self.data_type == DataType::Binary {
            return Err(ModbusError::configuration(
                "scaling only applies to numeric points",
            ));
        }
        if scale == 0.0 {
            return Err(ModbusError::configuration("scale must be non-zero"));
        }
        self.scale = scale;
        self.offset_adjust = offset_adjust;
        Ok(self)
    }

    fn is_scaled(&self) -> bool {
        self.scale != 1.0 || self.offset_adjust != 0.0
    }

    fn check_word_count(&self, words: &[u16]) -> ModbusResult<()> {
        if words.len() != self.register_count as usize {
            return Err(ModbusError::invalid_data(format!(
                "{:?} expects {} registers, got {}",
                self.data_type,
                self.register_count,
                words.len()
            )));
        }
        Ok(())
    }

    /// Decode register words into a typed value.
    pub fn decode(&self, words: &[u16]) -> ModbusResult<Value> {
        self.check_word_count(words)?;

        let value = match self.data_type {
            DataType::Binary => {
                let bit = self.bit_index.unwrap_or(0);
                Value::Bool(words[0] & (1 << bit) != 0)
            }

            DataType::Uint16 => Value::U16(words[0]),
            DataType::Uint16Swapped => Value::U16(words[0].swap_bytes()),
            DataType::Int16 => Value::I16(words[0] as i16),
            DataType::Int16Swapped => Value::I16(words[0].swap_bytes() as i16),

            DataType::Uint32 => Value::U32(BigEndian::read_u32(&words_to_bytes(words))),
            DataType::Uint32Swapped => {
                Value::U32(BigEndian::read_u32(&words_to_bytes_reversed(words)))
            }
            DataType::Int32 => Value::I32(BigEndian::read_i32(&words_to_bytes(words))),
            DataType::Int32Swapped => {
                Value::I32(BigEndian::read_i32(&words_to_bytes_reversed(words)))
            }

            DataType::Uint64 => Value::U64(BigEndian::read_u64(&words_to_bytes(words))),
            DataType::Uint64Swapped => {
                Value::U64(BigEndian::read_u64(&words_to_bytes_reversed(words)))
            }
            DataType::Int64 => Value::I64(BigEndian::read_i64(&words_to_bytes(words))),
            DataType::Int64Swapped => {
                Value::I64(BigEndian::read_i64(&words_to_bytes_reversed(words)))
            }

            DataType::Float32 => Value::F32(BigEndian::read_f32(&words_to_bytes(words))),
            DataType::Float32Swapped => {
                Value::F32(BigEndian::read_f32(&words_to_bytes_reversed(words)))
            }
            DataType::Float64 => Value::F64(BigEndian::read_f64(&words_to_bytes(words))),
            DataType::Float64Swapped => {
                Value::F64(BigEndian::read_f64(&words_to_bytes_reversed(words)))
            }

            DataType::Bcd16 => Value::U16(decode_bcd(words)? as u16),
            DataType::Bcd32 => Value::U32(decode_bcd(words)? as u32),
            DataType::Bcd32Swapped => {
                let reversed: Vec<u16> = words.iter().rev().copied().collect();
                Value::U32(decode_bcd(&reversed)? as u32)
            }

            DataType::Char => Value::Str(decode_string(words, false)?),
            DataType::Varchar => Value::Str(decode_string(words, true)?),

            DataType::Mod10kUint32 => Value::U32(decode_mod10k(words) as u32),
            DataType::Mod10kUint32Swapped => {
                let reversed: Vec<u16> = words.iter().rev().copied().collect();
                Value::U32(decode_mod10k(&reversed) as u32)
            }
            DataType::Mod10kUint64 => Value::U64(decode_mod10k(words)),
            DataType::Mod10kUint64Swapped => {
                let reversed: Vec<u16> = words.iter().rev().copied().collect();
                Value::U64(decode_mod10k(&reversed))
            }
        };

        if self.is_scaled() && !self.data_type.is_string() && self.data_type != DataType::Binary {
            let wire = value.as_f64()?;
            return Ok(Value::F64(wire / self.scale + self.offset_adjust));
        }
        Ok(value)
    }

    /// Encode a typed value into register words.
    pub fn encode(&self, value: &Value) -> ModbusResult<Vec<u16>> {
        match self.data_type {
            DataType::Binary => {
                let bit = self.bit_index.unwrap_or(0);
                let set = matches!(value, Value::Bool(true));
                if !matches!(value, Value::Bool(_)) {
                    return Err(ModbusError::invalid_data("Binary point expects a boolean"));
                }
                Ok(vec![if set { 1 << bit } else { 0 }])
            }

            DataType::Char | DataType::Varchar => {
                let text = match value {
                    Value::Str(s) => s,
                    _ => return Err(ModbusError::invalid_data("string point expects a string")),
                };
                encode_string(text, self.register_count)
            }

            DataType::Float32 | DataType::Float32Swapped => {
                let wire = self.to_wire(value)? as f32;
                let mut bytes = [0u8; 4];
                BigEndian::write_f32(&mut bytes, wire);
                Ok(self.maybe_reverse(bytes_to_words(&bytes)))
            }
            DataType::Float64 | DataType::Float64Swapped => {
                let wire = self.to_wire(value)?;
                let mut bytes = [0u8; 8];
                BigEndian::write_f64(&mut bytes, wire);
                Ok(self.maybe_reverse(bytes_to_words(&bytes)))
            }

            _ => {
                let wire = self.to_wire_integer(value)?;
                self.check_bound(wire)?;
                let words = match self.data_type {
                    DataType::Uint16 | DataType::Int16 => vec![wire as u16],
                    DataType::Uint16Swapped | DataType::Int16Swapped => {
                        vec![(wire as u16).swap_bytes()]
                    }
                    DataType::Uint32 | DataType::Int32 => {
                        let mut bytes = [0u8; 4];
                        BigEndian::write_u32(&mut bytes, wire as u32);
                        bytes_to_words(&bytes)
                    }
                    DataType::Uint32Swapped | DataType::Int32Swapped => {
                        let mut bytes = [0u8; 4];
                        BigEndian::write_u32(&mut bytes, wire as u32);
                        reverse_words(bytes_to_words(&bytes))
                    }
                    DataType::Uint64 | DataType::Int64 => {
                        let mut bytes = [0u8; 8];
                        BigEndian::write_u64(&mut bytes, wire as u64);
                        bytes_to_words(&bytes)
                    }
                    DataType::Uint64Swapped | DataType::Int64Swapped => {
                        let mut bytes = [0u8; 8];
                        BigEndian::write_u64(&mut bytes, wire as u64);
                        reverse_words(bytes_to_words(&bytes))
                    }
                    DataType::Bcd16 => encode_bcd(wire as u64, 1),
                    DataType::Bcd32 => encode_bcd(wire as u64, 2),
                    DataType::Bcd32Swapped => reverse_words(encode_bcd(wire as u64, 2)),
                    DataType::Mod10kUint32 => encode_mod10k(wire as u64, 2),
                    DataType::Mod10kUint32Swapped => reverse_words(encode_mod10k(wire as u64, 2)),
                    DataType::Mod10kUint64 => encode_mod10k(wire as u64, 4),
                    DataType::Mod10kUint64Swapped => reverse_words(encode_mod10k(wire as u64, 4)),
                    // Binary, strings and floats are handled above
                    _ => unreachable!(),
                };
                Ok(words)
            }
        }
    }

    /// Application value to on-wire magnitude, scaling applied.
    fn to_wire(&self, value: &Value) -> ModbusResult<f64> {
        let v = value.as_f64()?;
        if self.is_scaled() {
            Ok(v * self.scale - self.offset_adjust)
        } else {
            Ok(v)
        }
    }

    fn to_wire_integer(&self, value: &Value) -> ModbusResult<i128> {
        if self.is_scaled() {
            Ok(self.to_wire(value)?.round() as i128)
        } else {
            value.as_i128()
        }
    }

    fn check_bound(&self, wire: i128) -> ModbusResult<()> {
        if let Some((min, max)) = self.data_type.integer_bound() {
            if wire < min || wire > max {
                return Err(ModbusError::invalid_data(format!(
                    "value {} outside {:?} bound {}..={}",
                    wire, self.data_type, min, max
                )));
            }
        }
        Ok(())
    }

    fn maybe_reverse(&self, words: Vec<u16>) -> Vec<u16> {
        match self.data_type {
            DataType::Float32Swapped | DataType::Float64Swapped => reverse_words(words),
            _ => words,
        }
    }
}

/// Expand a run of registers into 16 booleans per word, bit 0 first.
pub fn decode_bit_array(words: &[u16]) -> Vec<bool> {
    let mut out = Vec::with_capacity(words.len() * 16);
    for &word in words {
        for bit in 0..16 {
            out.push(word & (1 << bit) != 0);
        }
    }
    out
}

/// Pack booleans into registers, 16 per word, bit 0 first.
pub fn encode_bit_array(bits: &[bool]) -> Vec<u16> {
    let mut out = vec![0u16; (bits.len() + 15) / 16];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            out[i / 16] |= 1 << (i % 16);
        }
    }
    out
}

fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    let mut bytes = vec![0u8; words.len() * 2];
    for (i, &word) in words.iter().enumerate() {
        BigEndian::write_u16(&mut bytes[i * 2..i * 2 + 2], word);
    }
    bytes
}

fn words_to_bytes_reversed(words: &[u16]) -> Vec<u8> {
    let reversed: Vec<u16> = words.iter().rev().copied().collect();
    words_to_bytes(&reversed)
}

fn bytes_to_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect()
}

fn reverse_words(mut words: Vec<u16>) -> Vec<u16> {
    words.reverse();
    words
}

/// Decode BCD digits, most significant register first. Nibbles above 9 are
/// corrupt data, not values.
fn decode_bcd(words: &[u16]) -> ModbusResult<u64> {
    let mut value: u64 = 0;
    for &word in words {
        for shift in [12u16, 8, 4, 0] {
            let nibble = (word >> shift) & 0xF;
            if nibble > 9 {
                return Err(ModbusError::invalid_data(format!(
                    "invalid BCD nibble 0x{:X} in register 0x{:04X}",
                    nibble, word
                )));
            }
            value = value * 10 + nibble as u64;
        }
    }
    Ok(value)
}

fn encode_bcd(mut value: u64, register_count: usize) -> Vec<u16> {
    let mut words = vec![0u16; register_count];
    for word in words.iter_mut().rev() {
        for shift in [0u16, 4, 8, 12] {
            *word |= ((value % 10) as u16) << shift;
            value /= 10;
        }
    }
    words
}

/// Combine base-10000 digits, most significant register first. Each
/// register is widened unsigned so a high bit never sign-corrupts the
/// reconstructed magnitude.
fn decode_mod10k(words: &[u16]) -> u64 {
    let mut value: u64 = 0;
    for &word in words {
        value = value * 10_000 + word as u64;
    }
    value
}

fn encode_mod10k(mut value: u64, register_count: usize) -> Vec<u16> {
    let mut words = vec![0u16; register_count];
    for word in words.iter_mut().rev() {
        *word = (value % 10_000) as u16;
        value /= 10_000;
    }
    // The most significant digit absorbs whatever remains; the bound check
    // has already guaranteed it fits 16 bits.
    if value > 0 {
        words[0] += (value * 10_000) as u16;
    }
    words
}

fn decode_string(words: &[u16], trim_nul: bool) -> ModbusResult<String> {
    let mut bytes = words_to_bytes(words);
    if trim_nul {
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
    }
    String::from_utf8(bytes)
        .map_err(|e| ModbusError::invalid_data(format!("invalid string in registers: {}", e)))
}

fn encode_string(text: &str, register_count: u16) -> ModbusResult<Vec<u16>> {
    let capacity = register_count as usize * 2;
    let raw = text.as_bytes();
    if raw.len() > capacity {
        return Err(ModbusError::invalid_data(format!(
            "string of {} bytes exceeds {} registers",
            raw.len(),
            register_count
        )));
    }
    let mut bytes = raw.to_vec();
    bytes.resize(capacity, 0);
    Ok(bytes_to_words(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator(data_type: DataType) -> Locator {
        Locator::new(RegisterRange::HoldingRegister, 0, data_type).unwrap()
    }

    #[test]
    fn test_uint32_swap_decode() {
        // Low word first: [0x0001, 0x8000] reads back as 0x8000_0001
        let loc = locator(DataType::Uint32Swapped);
        assert_eq!(
            loc.decode(&[0x0001, 0x8000]).unwrap(),
            Value::U32(0x8000_0001)
        );
        assert_eq!(
            loc.encode(&Value::U32(0x8000_0001)).unwrap(),
            vec![0x0001, 0x8000]
        );
    }

    #[test]
    fn test_integer_round_trips() {
        let cases: Vec<(DataType, Value)> = vec![
            (DataType::Uint16, Value::U16(0xABCD)),
            (DataType::Uint16Swapped, Value::U16(0xABCD)),
            (DataType::Int16, Value::I16(-1234)),
            (DataType::Int16Swapped, Value::I16(-1234)),
            (DataType::Uint32, Value::U32(0xDEAD_BEEF)),
            (DataType::Int32, Value::I32(-123_456_789)),
            (DataType::Int32Swapped, Value::I32(-123_456_789)),
            (DataType::Uint64, Value::U64(0x0123_4567_89AB_CDEF)),
            (DataType::Uint64Swapped, Value::U64(0x0123_4567_89AB_CDEF)),
            (DataType::Int64, Value::I64(-9_876_543_210)),
            (DataType::Int64Swapped, Value::I64(-9_876_543_210)),
        ];
        for (data_type, value) in cases {
            let loc = locator(data_type);
            let words = loc.encode(&value).unwrap();
            assert_eq!(words.len() as u16, loc.register_count);
            assert_eq!(loc.decode(&words).unwrap(), value, "{:?}", data_type);
        }
    }

    #[test]
    fn test_float_round_trips() {
        let loc = locator(DataType::Float32);
        let words = loc.encode(&Value::F32(-12.625)).unwrap();
        assert_eq!(loc.decode(&words).unwrap(), Value::F32(-12.625));

        let loc = locator(DataType::Float32Swapped);
        let words = loc.encode(&Value::F32(3.75)).unwrap();
        assert_eq!(loc.decode(&words).unwrap(), Value::F32(3.75));

        let loc = locator(DataType::Float64Swapped);
        let words = loc.encode(&Value::F64(6.02e23)).unwrap();
        assert_eq!(loc.decode(&words).unwrap(), Value::F64(6.02e23));
    }

    #[test]
    fn test_bcd() {
        let loc = locator(DataType::Bcd16);
        assert_eq!(loc.encode(&Value::U16(1234)).unwrap(), vec![0x1234]);
        assert_eq!(loc.decode(&[0x1234]).unwrap(), Value::U16(1234));

        let loc = locator(DataType::Bcd32);
        assert_eq!(
            loc.encode(&Value::U32(12_345_678)).unwrap(),
            vec![0x1234, 0x5678]
        );
        assert_eq!(loc.decode(&[0x1234, 0x5678]).unwrap(), Value::U32(12_345_678));

        let loc = locator(DataType::Bcd32Swapped);
        assert_eq!(
            loc.encode(&Value::U32(12_345_678)).unwrap(),
            vec![0x5678, 0x1234]
        );

        // Nibble 0xA is not a decimal digit
        let loc = locator(DataType::Bcd16);
        assert!(matches!(
            loc.decode(&[0x12A4]),
            Err(ModbusError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_bcd_bound() {
        let loc = locator(DataType::Bcd16);
        assert!(loc.encode(&Value::U16(9999)).is_ok());
        assert!(matches!(
            loc.encode(&Value::U32(10_000)),
            Err(ModbusError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_mod10k() {
        let loc = locator(DataType::Mod10kUint32);
        // 123456789 = 12345 * 10000 + 6789
        assert_eq!(
            loc.encode(&Value::U32(123_456_789)).unwrap(),
            vec![12345, 6789]
        );
        assert_eq!(
            loc.decode(&[12345, 6789]).unwrap(),
            Value::U32(123_456_789)
        );

        let loc = locator(DataType::Mod10kUint32Swapped);
        assert_eq!(
            loc.encode(&Value::U32(123_456_789)).unwrap(),
            vec![6789, 12345]
        );
        assert_eq!(
            loc.decode(&[6789, 12345]).unwrap(),
            Value::U32(123_456_789)
        );
    }

    #[test]
    fn test_mod10k_unsigned_reconstruction() {
        // A register with the high bit set must be zero-extended, never
        // sign-extended, when combining.
        let loc = locator(DataType::Mod10kUint32);
        assert_eq!(
            loc.decode(&[0x8000, 9999]).unwrap(),
            Value::U32(0x8000 as u32 * 10_000 + 9_999)
        );
        assert_eq!(loc.decode(&[0xFFFF, 9999]).unwrap(), Value::U32(655_359_999));
    }

    #[test]
    fn test_mod10k_bound() {
        let loc = locator(DataType::Mod10kUint32);
        assert!(loc.encode(&Value::U32(655_359_999)).is_ok());
        assert!(matches!(
            loc.encode(&Value::U64(655_360_000)),
            Err(ModbusError::InvalidData { .. })
        ));

        let loc = locator(DataType::Mod10kUint64);
        let words = loc.encode(&Value::U64(1_0002_0003_0004)).unwrap();
        assert_eq!(words, vec![1, 2, 3, 4]);
        assert_eq!(loc.decode(&words).unwrap(), Value::U64(1_0002_0003_0004));
    }

    #[test]
    fn test_bound_rejects_never_clamps() {
        let loc = locator(DataType::Uint16);
        assert!(matches!(
            loc.encode(&Value::U32(65_536)),
            Err(ModbusError::InvalidData { .. })
        ));
        let loc = locator(DataType::Int16);
        assert!(loc.encode(&Value::I32(-32_769)).is_err());
        assert!(loc.encode(&Value::I32(-32_768)).is_ok());
    }

    #[test]
    fn test_binary_bit_index() {
        let loc = Locator::new(RegisterRange::HoldingRegister, 0, DataType::Binary)
            .unwrap()
            .with_bit_index(3)
            .unwrap();
        assert_eq!(loc.decode(&[0b0000_1000]).unwrap(), Value::Bool(true));
        assert_eq!(loc.decode(&[0b1111_0111]).unwrap(), Value::Bool(false));
        assert_eq!(loc.encode(&Value::Bool(true)).unwrap(), vec![0b0000_1000]);
    }

    #[test]
    fn test_bit_array() {
        let bits = decode_bit_array(&[0b0000_0000_0000_0101]);
        assert_eq!(bits.len(), 16);
        assert!(bits[0] && bits[2]);
        assert!(!bits[1]);
        assert_eq!(encode_bit_array(&bits), vec![0b0000_0000_0000_0101]);
    }

    #[test]
    fn test_strings() {
        let loc = Locator::with_register_count(
            RegisterRange::HoldingRegister,
            0,
            DataType::Varchar,
            4,
        )
        .unwrap();
        let words = loc.encode(&Value::Str("pump1".into())).unwrap();
        assert_eq!(words.len(), 4);
        assert_eq!(loc.decode(&words).unwrap(), Value::Str("pump1".into()));

        // Char keeps the NUL padding
        let loc =
            Locator::with_register_count(RegisterRange::HoldingRegister, 0, DataType::Char, 3)
                .unwrap();
        let words = loc.encode(&Value::Str("ab".into())).unwrap();
        assert_eq!(loc.decode(&words).unwrap(), Value::Str("ab\0\0\0\0".into()));

        // Too long is a validation error
        assert!(loc.encode(&Value::Str("seven..".into())).is_err());
    }

    #[test]
    fn test_scaling_asymmetry() {
        // encode: wire = v * scale - offset; decode: app = wire / scale + offset
        let loc = locator(DataType::Uint16)
            .with_scaling(10.0, 2.0)
            .unwrap();

        let words = loc.encode(&Value::F64(25.0)).unwrap();
        assert_eq!(words, vec![248]); // 25 * 10 - 2

        let decoded = loc.decode(&[248]).unwrap();
        assert_eq!(decoded, Value::F64(248.0 / 10.0 + 2.0)); // 26.8, not 25
    }

    #[test]
    fn test_register_count_mismatch() {
        let loc = locator(DataType::Uint32);
        assert!(loc.decode(&[1]).is_err());
        assert!(loc.decode(&[1, 2, 3]).is_err());
    }
}
