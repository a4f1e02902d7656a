//! Buffer header layouts
//!
//! Every buffer starts with a 12-byte generic header; data and already-sent
//! buffers extend it with fixed-size fields. All integers are little-endian.
//!
//! ```text
//! GenericHeader      u8 header_size | u8 kind | u8 version | u8 flags | u32 signal_id | u32 payload_size
//! DataHeader         GenericHeader | i64 packet_id | i64 domain_packet_id | i64 sample_count | 8 offset bytes
//! AlreadySentHeader  GenericHeader | i64 packet_id | i64 domain_packet_id
//! ```
//!
//! Release and event buffers use the bare generic header. A release payload is a
//! sequence of `i64` packet ids; an event payload is whatever the event
//! serializer produced.

use bytes::{BufMut, BytesMut};
use tracing::trace;

use super::flags;
use crate::types::OffsetValue;
use crate::{Result, StreamingError};

/// Protocol version written into every header
pub const PROTOCOL_VERSION: u8 = 1;

pub const GENERIC_HEADER_SIZE: usize = 12;
pub const DATA_HEADER_SIZE: usize = GENERIC_HEADER_SIZE + 32;
pub const ALREADY_SENT_HEADER_SIZE: usize = GENERIC_HEADER_SIZE + 16;

/// Domain packet id of a data packet without a domain
pub const NO_DOMAIN_PACKET: i64 = -1;

/// Deepest chain of domain packets embedded inside one data buffer
pub const MAX_INLINE_DEPTH: usize = 4;

/// Wire tag of a buffer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Event = 0,
    Data = 1,
    Release = 2,
    AlreadySent = 3,
}

impl PacketKind {
    /// Header size in bytes for buffers of this kind.
    pub const fn header_size(&self) -> usize {
        match self {
            PacketKind::Event | PacketKind::Release => GENERIC_HEADER_SIZE,
            PacketKind::Data => DATA_HEADER_SIZE,
            PacketKind::AlreadySent => ALREADY_SENT_HEADER_SIZE,
        }
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = StreamingError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(PacketKind::Event),
            1 => Ok(PacketKind::Data),
            2 => Ok(PacketKind::Release),
            3 => Ok(PacketKind::AlreadySent),
            other => Err(StreamingError::malformed(
                "Header parsing",
                format!("Unknown packet kind {}", other),
            )),
        }
    }
}

/// Header shared by all buffer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericHeader {
    pub header_size: u8,
    pub kind: PacketKind,
    pub version: u8,
    pub flags: u8,
    pub signal_id: u32,
    pub payload_size: u32,
}

impl GenericHeader {
    pub fn new(kind: PacketKind, signal_id: u32) -> Self {
        Self {
            header_size: kind.header_size() as u8,
            kind,
            version: PROTOCOL_VERSION,
            flags: 0,
            signal_id,
            payload_size: 0,
        }
    }

    /// Whether the receiver may drop the packet right after delivering it.
    pub fn can_release(&self) -> bool {
        self.flags & flags::CAN_RELEASE != 0
    }

    pub fn set_can_release(&mut self, can_release: bool) {
        if can_release {
            self.flags |= flags::CAN_RELEASE;
        } else {
            self.flags &= !flags::CAN_RELEASE;
        }
    }

    /// Whether the payload starts with an embedded domain buffer.
    pub fn has_inline_domain(&self) -> bool {
        self.flags & flags::DOMAIN_INLINE != 0
    }

    /// Offset type tag from flag bits 1-2.
    pub fn offset_tag(&self) -> u8 {
        (self.flags & flags::OFFSET_TYPE_MASK) >> flags::OFFSET_TYPE_SHIFT
    }

    pub fn write_to(&self, out: &mut BytesMut) {
        out.put_u8(self.header_size);
        out.put_u8(self.kind as u8);
        out.put_u8(self.version);
        out.put_u8(self.flags);
        out.put_u32_le(self.signal_id);
        out.put_u32_le(self.payload_size);
    }

    /// Parse and validate the generic part of a header.
    ///
    /// Fails when the declared header size does not match the kind or exceeds the
    /// available bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < GENERIC_HEADER_SIZE {
            return Err(StreamingError::malformed(
                "Header parsing",
                format!(
                    "Need {} bytes for generic header, have {}",
                    GENERIC_HEADER_SIZE,
                    data.len()
                ),
            ));
        }

        let header_size = data[0];
        let kind = PacketKind::try_from(data[1])?;
        let version = data[2];
        let flags = data[3];

        if version != PROTOCOL_VERSION {
            return Err(StreamingError::UnsupportedVersion {
                expected: PROTOCOL_VERSION,
                found: version,
            });
        }

        if header_size as usize != kind.header_size() {
            return Err(StreamingError::malformed(
                "Header parsing",
                format!(
                    "{:?} header declares {} bytes, expected {}",
                    kind,
                    header_size,
                    kind.header_size()
                ),
            ));
        }

        if header_size as usize > data.len() {
            return Err(StreamingError::malformed(
                "Header parsing",
                format!("Header declares {} bytes, have {}", header_size, data.len()),
            ));
        }

        if flags & !flags::KNOWN_FLAGS != 0 {
            return Err(StreamingError::malformed(
                "Header parsing",
                format!("Unknown flag bits {:#010b}", flags & !flags::KNOWN_FLAGS),
            ));
        }

        let signal_id = read_u32_le(data, 4)?;
        let payload_size = read_u32_le(data, 8)?;

        trace!(?kind, signal_id, payload_size, flags, "Parsed generic header");

        Ok(Self { header_size, kind, version, flags, signal_id, payload_size })
    }
}

/// Header of a buffer carrying a data packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataHeader {
    pub generic: GenericHeader,
    pub packet_id: i64,
    pub domain_packet_id: i64,
    pub sample_count: i64,
    pub offset: OffsetValue,
}

impl DataHeader {
    pub fn new(signal_id: u32, packet_id: i64, domain_packet_id: i64, sample_count: i64) -> Self {
        Self {
            generic: GenericHeader::new(PacketKind::Data, signal_id),
            packet_id,
            domain_packet_id,
            sample_count,
            offset: OffsetValue::None,
        }
    }

    /// Store the offset and its type tag in the flag bits.
    pub fn set_offset(&mut self, offset: OffsetValue) {
        self.offset = offset;
        self.generic.flags = (self.generic.flags & !flags::OFFSET_TYPE_MASK)
            | (offset.tag() << flags::OFFSET_TYPE_SHIFT);
    }

    pub fn set_inline_domain(&mut self) {
        self.generic.flags |= flags::DOMAIN_INLINE;
    }

    pub fn has_domain(&self) -> bool {
        self.domain_packet_id != NO_DOMAIN_PACKET
    }

    pub fn write_to(&self, out: &mut BytesMut) {
        self.generic.write_to(out);
        out.put_i64_le(self.packet_id);
        out.put_i64_le(self.domain_packet_id);
        out.put_i64_le(self.sample_count);
        out.put_slice(&self.offset.to_le_bytes());
    }

    fn parse(generic: GenericHeader, data: &[u8]) -> Result<Self> {
        let packet_id = read_i64_le(data, 12)?;
        let domain_packet_id = read_i64_le(data, 20)?;
        let sample_count = read_i64_le(data, 28)?;
        let offset_bytes = read_array::<8>(data, 36)?;
        let offset = OffsetValue::from_wire(generic.offset_tag(), offset_bytes)?;

        if sample_count < 0 {
            return Err(StreamingError::malformed(
                "Data header parsing",
                format!("Negative sample count {} for packet {}", sample_count, packet_id),
            ));
        }

        Ok(Self { generic, packet_id, domain_packet_id, sample_count, offset })
    }
}

/// Header of a zero-payload reference to a packet the receiver already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadySentHeader {
    pub generic: GenericHeader,
    pub packet_id: i64,
    pub domain_packet_id: i64,
}

impl AlreadySentHeader {
    pub fn new(signal_id: u32, packet_id: i64, domain_packet_id: i64) -> Self {
        Self {
            generic: GenericHeader::new(PacketKind::AlreadySent, signal_id),
            packet_id,
            domain_packet_id,
        }
    }

    pub fn write_to(&self, out: &mut BytesMut) {
        self.generic.write_to(out);
        out.put_i64_le(self.packet_id);
        out.put_i64_le(self.domain_packet_id);
    }

    fn parse(generic: GenericHeader, data: &[u8]) -> Result<Self> {
        if generic.payload_size != 0 {
            return Err(StreamingError::malformed(
                "Already-sent header parsing",
                format!("Expected empty payload, header declares {} bytes", generic.payload_size),
            ));
        }

        let packet_id = read_i64_le(data, 12)?;
        let domain_packet_id = read_i64_le(data, 20)?;
        Ok(Self { generic, packet_id, domain_packet_id })
    }
}

/// Header of any buffer, typed by its kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BufferHeader {
    Event(GenericHeader),
    Data(DataHeader),
    Release(GenericHeader),
    AlreadySent(AlreadySentHeader),
}

impl BufferHeader {
    pub fn event(signal_id: u32) -> Self {
        BufferHeader::Event(GenericHeader::new(PacketKind::Event, signal_id))
    }

    pub fn release() -> Self {
        BufferHeader::Release(GenericHeader::new(PacketKind::Release, 0))
    }

    pub fn generic(&self) -> &GenericHeader {
        match self {
            BufferHeader::Event(generic) | BufferHeader::Release(generic) => generic,
            BufferHeader::Data(data) => &data.generic,
            BufferHeader::AlreadySent(already_sent) => &already_sent.generic,
        }
    }

    pub fn generic_mut(&mut self) -> &mut GenericHeader {
        match self {
            BufferHeader::Event(generic) | BufferHeader::Release(generic) => generic,
            BufferHeader::Data(data) => &mut data.generic,
            BufferHeader::AlreadySent(already_sent) => &mut already_sent.generic,
        }
    }

    pub fn kind(&self) -> PacketKind {
        self.generic().kind
    }

    pub fn signal_id(&self) -> u32 {
        self.generic().signal_id
    }

    pub fn header_size(&self) -> usize {
        self.generic().header_size as usize
    }

    pub fn payload_size(&self) -> usize {
        self.generic().payload_size as usize
    }

    pub fn write_to(&self, out: &mut BytesMut) {
        match self {
            BufferHeader::Event(generic) | BufferHeader::Release(generic) => generic.write_to(out),
            BufferHeader::Data(data) => data.write_to(out),
            BufferHeader::AlreadySent(already_sent) => already_sent.write_to(out),
        }
    }

    /// Parse the header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let generic = GenericHeader::parse(data)?;
        match generic.kind {
            PacketKind::Event => Ok(BufferHeader::Event(generic)),
            PacketKind::Release => {
                if generic.payload_size % 8 != 0 {
                    return Err(StreamingError::malformed(
                        "Release header parsing",
                        format!(
                            "Payload of {} bytes is not a list of i64 ids",
                            generic.payload_size
                        ),
                    ));
                }
                Ok(BufferHeader::Release(generic))
            }
            PacketKind::Data => Ok(BufferHeader::Data(DataHeader::parse(generic, data)?)),
            PacketKind::AlreadySent => {
                Ok(BufferHeader::AlreadySent(AlreadySentHeader::parse(generic, data)?))
            }
        }
    }
}

fn read_array<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N]> {
    data.get(offset..offset + N).and_then(|bytes| bytes.try_into().ok()).ok_or_else(|| {
        StreamingError::malformed(
            "Integer parsing",
            format!(
                "Insufficient data for {} bytes at offset {} (have {})",
                N,
                offset,
                data.len().saturating_sub(offset)
            ),
        )
    })
}

fn read_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    read_array::<4>(data, offset).map(u32::from_le_bytes)
}

fn read_i64_le(data: &[u8], offset: usize) -> Result<i64> {
    read_array::<8>(data, offset).map(i64::from_le_bytes)
}
