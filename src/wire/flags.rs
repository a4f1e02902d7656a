//! Header flag bits
//!
//! Bit 0 tells the receiver it may drop the packet right after delivery, bits 1-2
//! carry the offset type tag, bit 3 marks a data buffer whose payload starts with
//! its embedded domain packet.

pub const CAN_RELEASE: u8 = 0b0000_0001;

pub const OFFSET_TYPE_SHIFT: u8 = 1;
pub const OFFSET_TYPE_MASK: u8 = 0b0000_0110;

pub const DOMAIN_INLINE: u8 = 0b0000_1000;

/// Bits this protocol version understands.
pub const KNOWN_FLAGS: u8 = CAN_RELEASE | OFFSET_TYPE_MASK | DOMAIN_INLINE;
