//! Packet offset values

use serde::{Deserialize, Serialize};

use crate::{Result, StreamingError};

/// Offset of the first sample of a data packet.
///
/// On the wire the variant is carried in header flag bits 1-2 and the value in
/// eight little-endian bytes; it is decoded once when the header is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum OffsetValue {
    /// Packet has no offset
    #[default]
    None,
    /// Integer offset (tick based domains)
    Int(i64),
    /// Floating point offset
    Float(f64),
}

impl OffsetValue {
    /// Wire tag for this variant (`00` none, `01` integer, `10` float).
    pub const fn tag(&self) -> u8 {
        match self {
            OffsetValue::None => 0b00,
            OffsetValue::Int(_) => 0b01,
            OffsetValue::Float(_) => 0b10,
        }
    }

    /// Little-endian value bytes; zeroes for [`OffsetValue::None`].
    pub fn to_le_bytes(&self) -> [u8; 8] {
        match self {
            OffsetValue::None => [0; 8],
            OffsetValue::Int(value) => value.to_le_bytes(),
            OffsetValue::Float(value) => value.to_le_bytes(),
        }
    }

    /// Decode an offset from its wire tag and value bytes.
    pub fn from_wire(tag: u8, bytes: [u8; 8]) -> Result<Self> {
        match tag {
            0b00 => Ok(OffsetValue::None),
            0b01 => Ok(OffsetValue::Int(i64::from_le_bytes(bytes))),
            0b10 => Ok(OffsetValue::Float(f64::from_le_bytes(bytes))),
            other => Err(StreamingError::malformed(
                "Offset decoding",
                format!("Unknown offset type tag {:#04b}", other),
            )),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, OffsetValue::None)
    }
}

impl From<i64> for OffsetValue {
    fn from(value: i64) -> Self {
        OffsetValue::Int(value)
    }
}

impl From<f64> for OffsetValue {
    fn from(value: f64) -> Self {
        OffsetValue::Float(value)
    }
}
