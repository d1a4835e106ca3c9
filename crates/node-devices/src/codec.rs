//! Fixed-size tagged register record.
//!
//! Layout: type tag (u8), element count (u16 LE), 256-byte payload holding the
//! packed little-endian elements from offset 0. Bytes past the packed elements
//! are zero on encode and ignored on decode.

use crate::EncodingError;
use core::fmt;

pub const PAYLOAD_LEN: usize = 256;
pub const REGISTER_RECORD_LEN: usize = 3 + PAYLOAD_LEN;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum RegisterType {
    Empty = 0,
    String = 1,
    Unstructured = 2,
    Bit = 3,
    Int64 = 4,
    Int32 = 5,
    Int16 = 6,
    Int8 = 7,
    Uint64 = 8,
    Uint32 = 9,
    Uint16 = 10,
    Uint8 = 11,
    Float64 = 12,
    Float32 = 13,
    Float16 = 14,
}

impl RegisterType {
    /// Payload bytes needed for `count` elements of this type.
    pub fn packed_len(self, count: usize) -> usize {
        match self {
            RegisterType::Empty => 0,
            RegisterType::Bit => count.div_ceil(8),
            RegisterType::String
            | RegisterType::Unstructured
            | RegisterType::Int8
            | RegisterType::Uint8 => count,
            RegisterType::Int16 | RegisterType::Uint16 | RegisterType::Float16 => count * 2,
            RegisterType::Int32 | RegisterType::Uint32 | RegisterType::Float32 => count * 4,
            RegisterType::Int64 | RegisterType::Uint64 | RegisterType::Float64 => count * 8,
        }
    }
}

impl TryFrom<u8> for RegisterType {
    type Error = EncodingError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => RegisterType::Empty,
            1 => RegisterType::String,
            2 => RegisterType::Unstructured,
            3 => RegisterType::Bit,
            4 => RegisterType::Int64,
            5 => RegisterType::Int32,
            6 => RegisterType::Int16,
            7 => RegisterType::Int8,
            8 => RegisterType::Uint64,
            9 => RegisterType::Uint32,
            10 => RegisterType::Uint16,
            11 => RegisterType::Uint8,
            12 => RegisterType::Float64,
            13 => RegisterType::Float32,
            14 => RegisterType::Float16,
            other => return Err(EncodingError::UnknownType(other)),
        })
    }
}

impl fmt::Display for RegisterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegisterType::Empty => "empty",
            RegisterType::String => "string",
            RegisterType::Unstructured => "unstructured",
            RegisterType::Bit => "bit",
            RegisterType::Int64 => "int64",
            RegisterType::Int32 => "int32",
            RegisterType::Int16 => "int16",
            RegisterType::Int8 => "int8",
            RegisterType::Uint64 => "uint64",
            RegisterType::Uint32 => "uint32",
            RegisterType::Uint16 => "uint16",
            RegisterType::Uint8 => "uint8",
            RegisterType::Float64 => "float64",
            RegisterType::Float32 => "float32",
            RegisterType::Float16 => "float16",
        };
        f.write_str(s)
    }
}

/// A typed register value. `Float16` holds raw binary16 bit patterns.
#[derive(Clone, Debug, PartialEq)]
pub enum RegisterValue {
    Empty,
    String(String),
    Unstructured(Vec<u8>),
    Bit(Vec<bool>),
    Int64(Vec<i64>),
    Int32(Vec<i32>),
    Int16(Vec<i16>),
    Int8(Vec<i8>),
    Uint64(Vec<u64>),
    Uint32(Vec<u32>),
    Uint16(Vec<u16>),
    Uint8(Vec<u8>),
    Float64(Vec<f64>),
    Float32(Vec<f32>),
    Float16(Vec<u16>),
}

impl RegisterValue {
    pub fn ty(&self) -> RegisterType {
        match self {
            RegisterValue::Empty => RegisterType::Empty,
            RegisterValue::String(_) => RegisterType::String,
            RegisterValue::Unstructured(_) => RegisterType::Unstructured,
            RegisterValue::Bit(_) => RegisterType::Bit,
            RegisterValue::Int64(_) => RegisterType::Int64,
            RegisterValue::Int32(_) => RegisterType::Int32,
            RegisterValue::Int16(_) => RegisterType::Int16,
            RegisterValue::Int8(_) => RegisterType::Int8,
            RegisterValue::Uint64(_) => RegisterType::Uint64,
            RegisterValue::Uint32(_) => RegisterType::Uint32,
            RegisterValue::Uint16(_) => RegisterType::Uint16,
            RegisterValue::Uint8(_) => RegisterType::Uint8,
            RegisterValue::Float64(_) => RegisterType::Float64,
            RegisterValue::Float32(_) => RegisterType::Float32,
            RegisterValue::Float16(_) => RegisterType::Float16,
        }
    }

    /// Number of elements (bytes for strings, bits for `Bit`).
    pub fn len(&self) -> usize {
        match self {
            RegisterValue::Empty => 0,
            RegisterValue::String(s) => s.len(),
            RegisterValue::Unstructured(v) | RegisterValue::Uint8(v) => v.len(),
            RegisterValue::Bit(v) => v.len(),
            RegisterValue::Int64(v) => v.len(),
            RegisterValue::Int32(v) => v.len(),
            RegisterValue::Int16(v) => v.len(),
            RegisterValue::Int8(v) => v.len(),
            RegisterValue::Uint64(v) => v.len(),
            RegisterValue::Uint32(v) => v.len(),
            RegisterValue::Uint16(v) | RegisterValue::Float16(v) => v.len(),
            RegisterValue::Float64(v) => v.len(),
            RegisterValue::Float32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widen uint8/16/32 sequences to `u32`; `None` for every other type.
    pub fn as_unsigned(&self) -> Option<Vec<u32>> {
        match self {
            RegisterValue::Uint8(v) => Some(v.iter().map(|&x| u32::from(x)).collect()),
            RegisterValue::Uint16(v) => Some(v.iter().map(|&x| u32::from(x)).collect()),
            RegisterValue::Uint32(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Build an unsigned value of the given width. Values are truncated to the width,
    /// callers validate ranges beforehand.
    pub fn unsigned(ty: RegisterType, values: &[u32]) -> Option<Self> {
        match ty {
            RegisterType::Uint8 => Some(RegisterValue::Uint8(
                values.iter().map(|&v| v as u8).collect(),
            )),
            RegisterType::Uint16 => Some(RegisterValue::Uint16(
                values.iter().map(|&v| v as u16).collect(),
            )),
            RegisterType::Uint32 => Some(RegisterValue::Uint32(values.to_vec())),
            _ => None,
        }
    }
}

pub fn encode(value: &RegisterValue) -> Result<[u8; REGISTER_RECORD_LEN], EncodingError> {
    let ty = value.ty();
    let count = value.len();
    if ty.packed_len(count) > PAYLOAD_LEN || count > usize::from(u16::MAX) {
        return Err(EncodingError::Overflow { ty, count });
    }

    let mut out = [0u8; REGISTER_RECORD_LEN];
    out[0] = ty as u8;
    out[1..3].copy_from_slice(&(count as u16).to_le_bytes());
    let payload = &mut out[3..];
    match value {
        RegisterValue::Empty => {}
        RegisterValue::String(s) => payload[..count].copy_from_slice(s.as_bytes()),
        RegisterValue::Unstructured(v) | RegisterValue::Uint8(v) => {
            payload[..count].copy_from_slice(v)
        }
        RegisterValue::Bit(bits) => {
            for (i, _) in bits.iter().enumerate().filter(|(_, b)| **b) {
                payload[i / 8] |= 1 << (i % 8);
            }
        }
        RegisterValue::Int64(v) => pack(v, i64::to_le_bytes, payload),
        RegisterValue::Int32(v) => pack(v, i32::to_le_bytes, payload),
        RegisterValue::Int16(v) => pack(v, i16::to_le_bytes, payload),
        RegisterValue::Int8(v) => pack(v, i8::to_le_bytes, payload),
        RegisterValue::Uint64(v) => pack(v, u64::to_le_bytes, payload),
        RegisterValue::Uint32(v) => pack(v, u32::to_le_bytes, payload),
        RegisterValue::Uint16(v) | RegisterValue::Float16(v) => {
            pack(v, u16::to_le_bytes, payload)
        }
        RegisterValue::Float64(v) => pack(v, f64::to_le_bytes, payload),
        RegisterValue::Float32(v) => pack(v, f32::to_le_bytes, payload),
    }
    Ok(out)
}

pub fn decode(record: &[u8]) -> Result<RegisterValue, EncodingError> {
    if record.len() != REGISTER_RECORD_LEN {
        return Err(EncodingError::Length {
            expected: REGISTER_RECORD_LEN,
            actual: record.len(),
        });
    }
    let ty = RegisterType::try_from(record[0])?;
    let count = usize::from(u16::from_le_bytes([record[1], record[2]]));
    let used = ty.packed_len(count);
    if used > PAYLOAD_LEN {
        return Err(EncodingError::Overflow { ty, count });
    }
    let bytes = &record[3..3 + used];

    Ok(match ty {
        RegisterType::Empty => RegisterValue::Empty,
        RegisterType::String => RegisterValue::String(
            String::from_utf8(bytes.to_vec()).map_err(|_| EncodingError::Text)?,
        ),
        RegisterType::Unstructured => RegisterValue::Unstructured(bytes.to_vec()),
        RegisterType::Bit => {
            RegisterValue::Bit((0..count).map(|i| bytes[i / 8] & (1 << (i % 8)) != 0).collect())
        }
        RegisterType::Int64 => RegisterValue::Int64(unpack(bytes, i64::from_le_bytes)),
        RegisterType::Int32 => RegisterValue::Int32(unpack(bytes, i32::from_le_bytes)),
        RegisterType::Int16 => RegisterValue::Int16(unpack(bytes, i16::from_le_bytes)),
        RegisterType::Int8 => RegisterValue::Int8(unpack(bytes, i8::from_le_bytes)),
        RegisterType::Uint64 => RegisterValue::Uint64(unpack(bytes, u64::from_le_bytes)),
        RegisterType::Uint32 => RegisterValue::Uint32(unpack(bytes, u32::from_le_bytes)),
        RegisterType::Uint16 => RegisterValue::Uint16(unpack(bytes, u16::from_le_bytes)),
        RegisterType::Uint8 => RegisterValue::Uint8(bytes.to_vec()),
        RegisterType::Float64 => RegisterValue::Float64(unpack(bytes, f64::from_le_bytes)),
        RegisterType::Float32 => RegisterValue::Float32(unpack(bytes, f32::from_le_bytes)),
        RegisterType::Float16 => RegisterValue::Float16(unpack(bytes, u16::from_le_bytes)),
    })
}

fn pack<T: Copy, const N: usize>(values: &[T], to_le: fn(T) -> [u8; N], payload: &mut [u8]) {
    for (slot, v) in payload.chunks_exact_mut(N).zip(values) {
        slot.copy_from_slice(&to_le(*v));
    }
}

fn unpack<T, const N: usize>(bytes: &[u8], from_le: fn([u8; N]) -> T) -> Vec<T> {
    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut buf = [0u8; N];
            buf.copy_from_slice(chunk);
            from_le(buf)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: RegisterValue) {
        let record = encode(&value).unwrap();
        assert_eq!(record.len(), REGISTER_RECORD_LEN);
        assert_eq!(decode(&record).unwrap(), value);
    }

    #[test]
    fn empty_record_is_zeroed() {
        let record = encode(&RegisterValue::Empty).unwrap();
        assert!(record.iter().all(|&b| b == 0));
        assert_eq!(decode(&record).unwrap(), RegisterValue::Empty);
    }

    #[test]
    fn unsigned_layout_is_little_endian() {
        let record = encode(&RegisterValue::Uint16(vec![0x0102, 0xA0B0])).unwrap();
        assert_eq!(record[0], RegisterType::Uint16 as u8);
        assert_eq!(&record[1..3], &[2, 0]);
        assert_eq!(&record[3..7], &[0x02, 0x01, 0xB0, 0xA0]);
        assert!(record[7..].iter().all(|&b| b == 0));
    }

    #[test]
    fn round_trips_for_used_types() {
        round_trip(RegisterValue::Uint8(vec![0, 1, 255]));
        round_trip(RegisterValue::Uint16(vec![3380, 29815]));
        round_trip(RegisterValue::Uint32(vec![u32::MAX, 7]));
        round_trip(RegisterValue::Uint8(vec![7; 256]));
        round_trip(RegisterValue::Uint32(vec![1; 64]));
    }

    #[test]
    fn round_trips_for_remaining_types() {
        round_trip(RegisterValue::String("ch1.input".into()));
        round_trip(RegisterValue::Unstructured(vec![0xde, 0xad]));
        round_trip(RegisterValue::Bit(vec![true, false, true, true, false, false, false, false, true]));
        round_trip(RegisterValue::Int64(vec![i64::MIN, -1]));
        round_trip(RegisterValue::Int32(vec![-5]));
        round_trip(RegisterValue::Int16(vec![-300, 300]));
        round_trip(RegisterValue::Int8(vec![-128, 127]));
        round_trip(RegisterValue::Uint64(vec![u64::MAX]));
        round_trip(RegisterValue::Float64(vec![298.15, -0.5]));
        round_trip(RegisterValue::Float32(vec![1.5]));
        round_trip(RegisterValue::Float16(vec![0x3c00]));
    }

    #[test]
    fn oversized_values_are_rejected() {
        assert!(matches!(
            encode(&RegisterValue::Uint8(vec![0; 257])),
            Err(EncodingError::Overflow { count: 257, .. })
        ));
        assert!(encode(&RegisterValue::Uint16(vec![0; 129])).is_err());
        assert!(encode(&RegisterValue::Float64(vec![0.0; 33])).is_err());
        assert!(encode(&RegisterValue::Bit(vec![false; 2049])).is_err());
        assert!(encode(&RegisterValue::Bit(vec![false; 2048])).is_ok());
    }

    #[test]
    fn unknown_tag_fails() {
        let mut record = [0u8; REGISTER_RECORD_LEN];
        record[0] = 15;
        assert_eq!(decode(&record), Err(EncodingError::UnknownType(15)));
    }

    #[test]
    fn wrong_length_fails() {
        assert!(matches!(
            decode(&[0u8; 10]),
            Err(EncodingError::Length { actual: 10, .. })
        ));
    }

    #[test]
    fn tail_bytes_are_ignored() {
        let mut record = encode(&RegisterValue::Uint16(vec![5])).unwrap();
        record[200] = 0xff;
        assert_eq!(decode(&record).unwrap(), RegisterValue::Uint16(vec![5]));
    }

    #[test]
    fn count_past_payload_fails() {
        let mut record = [0u8; REGISTER_RECORD_LEN];
        record[0] = RegisterType::Uint32 as u8;
        record[1..3].copy_from_slice(&65u16.to_le_bytes());
        assert!(matches!(decode(&record), Err(EncodingError::Overflow { .. })));
    }

    #[test]
    fn unsigned_widening() {
        assert_eq!(
            RegisterValue::Uint16(vec![1, 2]).as_unsigned(),
            Some(vec![1, 2])
        );
        assert_eq!(RegisterValue::Int16(vec![1]).as_unsigned(), None);
        assert_eq!(
            RegisterValue::unsigned(RegisterType::Uint8, &[1]),
            Some(RegisterValue::Uint8(vec![1]))
        );
    }
}
