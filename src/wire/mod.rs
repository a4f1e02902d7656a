//! Wire format for packet streaming
//!
//! Byte-level header layouts for the four buffer kinds and the [`PacketBuffer`]
//! that pairs a header with its payload for transport.

mod buffer;
pub mod flags;
mod header;

pub use buffer::{PacketBuffer, ReleaseCallback};
pub use header::{
    ALREADY_SENT_HEADER_SIZE, AlreadySentHeader, BufferHeader, DATA_HEADER_SIZE, DataHeader,
    GENERIC_HEADER_SIZE, GenericHeader, MAX_INLINE_DEPTH, NO_DOMAIN_PACKET, PROTOCOL_VERSION,
    PacketKind,
};
