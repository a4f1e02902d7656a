//! Application packet types

use bytes::Bytes;
use std::sync::Arc;

use super::{DataDescriptor, EventPacket, OffsetValue};

/// Kind of an application packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Data,
    Event,
}

/// A packet flowing between a producer and a consumer.
#[derive(Debug, Clone)]
pub enum Packet {
    Data(DataPacket),
    Event(EventPacket),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Data(_) => PacketType::Data,
            Packet::Event(_) => PacketType::Event,
        }
    }

    pub fn as_data(&self) -> Option<&DataPacket> {
        match self {
            Packet::Data(packet) => Some(packet),
            Packet::Event(_) => None,
        }
    }

    pub fn as_event(&self) -> Option<&EventPacket> {
        match self {
            Packet::Event(event) => Some(event),
            Packet::Data(_) => None,
        }
    }
}

impl From<DataPacket> for Packet {
    fn from(packet: DataPacket) -> Self {
        Packet::Data(packet)
    }
}

impl From<EventPacket> for Packet {
    fn from(event: EventPacket) -> Self {
        Packet::Event(event)
    }
}

/// Immutable, reference-counted data packet.
///
/// Cloning is cheap and shares the sample memory. The number of live clones is
/// the packet's reference count, which the server consults before reporting a
/// sent packet as releasable.
#[derive(Debug, Clone)]
pub struct DataPacket {
    inner: Arc<DataPacketInner>,
}

#[derive(Debug)]
struct DataPacketInner {
    packet_id: i64,
    sample_count: i64,
    offset: OffsetValue,
    samples: Bytes,
    domain: Option<DataPacket>,
    descriptor: Option<Arc<DataDescriptor>>,
}

impl DataPacket {
    pub fn builder(packet_id: i64) -> DataPacketBuilder {
        DataPacketBuilder {
            packet_id,
            sample_count: 0,
            offset: OffsetValue::None,
            samples: Bytes::new(),
            domain: None,
            descriptor: None,
        }
    }

    pub fn packet_id(&self) -> i64 {
        self.inner.packet_id
    }

    pub fn sample_count(&self) -> i64 {
        self.inner.sample_count
    }

    pub fn offset(&self) -> OffsetValue {
        self.inner.offset
    }

    /// Raw sample bytes.
    pub fn samples(&self) -> &Bytes {
        &self.inner.samples
    }

    /// Samples interpreted as little-endian `f64` values.
    pub fn samples_as_f64(&self) -> Vec<f64> {
        self.inner
            .samples
            .chunks_exact(8)
            .map(|chunk| {
                f64::from_le_bytes([
                    chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
                ])
            })
            .collect()
    }

    pub fn domain_packet(&self) -> Option<&DataPacket> {
        self.inner.domain.as_ref()
    }

    pub fn descriptor(&self) -> Option<&Arc<DataDescriptor>> {
        self.inner.descriptor.as_ref()
    }

    /// Number of live handles to this packet.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether both handles point at the same packet object.
    pub fn ptr_eq(&self, other: &DataPacket) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Builder for [`DataPacket`].
#[derive(Debug)]
pub struct DataPacketBuilder {
    packet_id: i64,
    sample_count: i64,
    offset: OffsetValue,
    samples: Bytes,
    domain: Option<DataPacket>,
    descriptor: Option<Arc<DataDescriptor>>,
}

impl DataPacketBuilder {
    /// Raw sample memory and the number of samples it holds.
    pub fn samples(mut self, samples: impl Into<Bytes>, sample_count: i64) -> Self {
        self.samples = samples.into();
        self.sample_count = sample_count;
        self
    }

    /// Encode `values` as little-endian `f64` samples.
    pub fn f64_samples(self, values: &[f64]) -> Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let count = values.len() as i64;
        self.samples(bytes, count)
    }

    /// Sample count for implicit (linear rule) packets that carry no sample bytes.
    pub fn implicit_samples(mut self, sample_count: i64) -> Self {
        self.samples = Bytes::new();
        self.sample_count = sample_count;
        self
    }

    pub fn offset(mut self, offset: impl Into<OffsetValue>) -> Self {
        self.offset = offset.into();
        self
    }

    pub fn domain(mut self, domain: DataPacket) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn descriptor(mut self, descriptor: Arc<DataDescriptor>) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    pub fn build(self) -> DataPacket {
        DataPacket {
            inner: Arc::new(DataPacketInner {
                packet_id: self.packet_id,
                sample_count: self.sample_count,
                offset: self.offset,
                samples: self.samples,
                domain: self.domain,
                descriptor: self.descriptor,
            }),
        }
    }
}
