//! Streaming server
//!
//! Turns application packets into transport-ready [`PacketBuffer`]s. A data
//! packet is transmitted in full only once; later occurrences travel as
//! `AlreadySent` references. A domain packet that has not crossed the wire yet
//! is embedded in front of the first data packet that needs it, so the receiver
//! never has to wait for it.
//!
//! Once the process drops every handle to a transmitted packet, its id is
//! batched into a release buffer telling the receiver to forget it.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::Result;
use crate::config::StreamingConfig;
use crate::serializer::{EventSerializer, JsonEventSerializer};
use crate::tracker::{CheckRefCount, PacketCollection, can_release_packet};
use crate::types::{DataPacket, EventPacket, Packet};
use crate::wire::{
    AlreadySentHeader, BufferHeader, DataHeader, MAX_INLINE_DEPTH, NO_DOMAIN_PACKET, PacketBuffer,
};

/// Id of the domain packet `packet` points at, or [`NO_DOMAIN_PACKET`].
pub fn get_domain_packet_id(packet: &DataPacket) -> i64 {
    packet.domain_packet().map_or(NO_DOMAIN_PACKET, DataPacket::packet_id)
}

/// Zero-payload reference to `packet`.
///
/// The buffer holds the packet, keeping its id out of release batches until the
/// reference has been handed to the transport.
fn reference_buffer(signal_id: u32, packet: DataPacket) -> PacketBuffer {
    let header =
        AlreadySentHeader::new(signal_id, packet.packet_id(), get_domain_packet_id(&packet));
    PacketBuffer::new(BufferHeader::AlreadySent(header), Bytes::new())
        .with_release(move || drop(packet))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendDecision {
    /// The receiver holds the packet; a reference is enough.
    AlreadySent,
    /// Transmit in full; with `can_release` the receiver drops it after delivery.
    Send { can_release: bool },
}

/// Encodes packets into buffers and decides when the receiver may forget them.
pub struct StreamingServer {
    config: StreamingConfig,
    serializer: Arc<dyn EventSerializer>,
    collection: PacketCollection,
    queue: Mutex<VecDeque<PacketBuffer>>,
}

impl Default for StreamingServer {
    fn default() -> Self {
        Self::new(StreamingConfig::default())
    }
}

impl StreamingServer {
    pub fn new(config: StreamingConfig) -> Self {
        Self::with_serializer(config, Arc::new(JsonEventSerializer))
    }

    pub fn with_serializer(config: StreamingConfig, serializer: Arc<dyn EventSerializer>) -> Self {
        Self {
            config,
            serializer,
            collection: PacketCollection::new(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue `packet` for `signal_id`.
    pub fn add_packet(&self, signal_id: u32, packet: impl Into<Packet>) -> Result<()> {
        self.add_packet_for_signals(signal_id, Vec::new(), packet)
    }

    /// Queue `packet` for `signal_id` and every signal in `extra_signal_ids`.
    ///
    /// Every signal gets its own buffer on the wire. An event is repeated per
    /// signal; a data packet is transmitted once and followed by an `AlreadySent`
    /// reference for each extra signal, so the receiver keeps it until released.
    pub fn add_packet_for_signals(
        &self,
        signal_id: u32,
        extra_signal_ids: Vec<u32>,
        packet: impl Into<Packet>,
    ) -> Result<()> {
        let mut buffers = Vec::with_capacity(extra_signal_ids.len() + 1);
        match packet.into() {
            Packet::Event(event) => {
                let primary = self.encode_event(signal_id, &event)?;
                let payload = primary.payload().clone();
                buffers.push(primary);
                for extra in extra_signal_ids {
                    buffers.push(PacketBuffer::new(BufferHeader::event(extra), payload.clone()));
                }
            }
            Packet::Data(packet) => {
                // Zero forces retention: the references below need the packet on the far end.
                let held_by_caller = if extra_signal_ids.is_empty() { 1 } else { 0 };
                buffers.push(self.encode_data_packet(signal_id, &packet, held_by_caller));
                for extra in extra_signal_ids {
                    buffers.push(reference_buffer(extra, packet.clone()));
                }
            }
        }
        self.lock_queue().extend(buffers);
        Ok(())
    }

    /// Queue a reference to a packet the receiver already holds.
    ///
    /// With `mark_for_release` the id is also queued for the next release
    /// buffer, which will follow the reference on the wire.
    pub fn add_already_sent_packet(
        &self,
        signal_id: u32,
        packet_id: i64,
        domain_packet_id: i64,
        mark_for_release: bool,
    ) {
        let header = AlreadySentHeader::new(signal_id, packet_id, domain_packet_id);
        self.enqueue(PacketBuffer::new(BufferHeader::AlreadySent(header), Bytes::new()));
        if mark_for_release {
            self.collection.mark_ready_for_release(packet_id);
        }
    }

    /// Oldest queued buffer, if any.
    pub fn get_next_buffer(&self) -> Option<PacketBuffer> {
        self.lock_queue().pop_front()
    }

    pub fn get_available_buffers_count(&self) -> usize {
        self.lock_queue().len()
    }

    /// Queue a release buffer once enough ids are ready, or whenever any are
    /// ready with `force`. Returns whether a buffer was queued.
    pub fn check_and_send_release_packet(&self, force: bool) -> bool {
        let Some(ids) = self.collection.take_release_batch(self.config.release_threshold, force)
        else {
            return false;
        };

        let mut payload = BytesMut::with_capacity(ids.len() * 8);
        for id in &ids {
            payload.put_i64_le(*id);
        }
        debug!(count = ids.len(), force, "Queueing release buffer");
        self.enqueue(PacketBuffer::new(BufferHeader::release(), payload.freeze()));
        true
    }

    /// Number of transmitted packets the receiver still holds.
    pub fn sent_count(&self) -> usize {
        self.collection.sent_count()
    }

    fn encode_event(&self, signal_id: u32, event: &EventPacket) -> Result<PacketBuffer> {
        let payload = self.serializer.serialize(event)?;
        trace!(signal_id, event_id = event.event_id(), len = payload.len(), "Encoded event");
        Ok(PacketBuffer::new(BufferHeader::event(signal_id), Bytes::from(payload)))
    }

    fn encode_data_packet(
        &self,
        signal_id: u32,
        packet: &DataPacket,
        held_by_caller: usize,
    ) -> PacketBuffer {
        match self.should_send_packet(packet, held_by_caller) {
            SendDecision::AlreadySent => {
                trace!(
                    signal_id,
                    packet_id = packet.packet_id(),
                    "Packet already on the far end; sending reference"
                );
                reference_buffer(signal_id, packet.clone())
            }
            SendDecision::Send { can_release } => {
                self.encode_data(signal_id, packet, can_release, 0)
            }
        }
    }

    /// Encode `packet`, embedding its domain packet when the receiver lacks it.
    ///
    /// `depth` counts the data buffers this one is nested in; domains are not
    /// embedded past [`MAX_INLINE_DEPTH`].
    fn encode_data(
        &self,
        signal_id: u32,
        packet: &DataPacket,
        can_release: bool,
        depth: usize,
    ) -> PacketBuffer {
        let mut header = DataHeader::new(
            signal_id,
            packet.packet_id(),
            get_domain_packet_id(packet),
            packet.sample_count(),
        );
        header.set_offset(packet.offset());
        header.generic.set_can_release(can_release);

        // The dependent's link is the one handle to the domain this call chain owns.
        let embedded = match packet.domain_packet() {
            Some(domain) if depth < MAX_INLINE_DEPTH => match self.should_send_packet(domain, 1) {
                SendDecision::Send { can_release } => {
                    Some(self.encode_data(signal_id, domain, can_release, depth + 1))
                }
                SendDecision::AlreadySent => None,
            },
            _ => None,
        };

        let payload = match embedded {
            Some(domain_buffer) => {
                header.set_inline_domain();
                let mut out =
                    BytesMut::with_capacity(domain_buffer.encoded_len() + packet.samples().len());
                domain_buffer.write_to(&mut out);
                out.extend_from_slice(packet.samples());
                out.freeze()
            }
            None => packet.samples().clone(),
        };

        trace!(
            signal_id,
            packet_id = packet.packet_id(),
            can_release,
            inline_domain = header.generic.has_inline_domain(),
            depth,
            "Encoded data packet"
        );

        let in_flight = packet.clone();
        PacketBuffer::new(BufferHeader::Data(header), payload).with_release(move || drop(in_flight))
    }

    /// Decide how `packet` travels, claiming it as sent when the receiver has to
    /// keep it.
    ///
    /// `held_by_caller` counts the handles that exist only because of this call
    /// chain. The sent check and the claim are a single `try_mark_sent`, so two
    /// producers never both transmit the same packet in full.
    fn should_send_packet(&self, packet: &DataPacket, held_by_caller: usize) -> SendDecision {
        if can_release_packet(packet, held_by_caller, CheckRefCount::Yes) {
            // A packet in the sent map is also held by the collection, so it never lands here.
            return SendDecision::Send { can_release: true };
        }
        if self.collection.try_mark_sent(packet) {
            SendDecision::Send { can_release: false }
        } else {
            SendDecision::AlreadySent
        }
    }

    fn enqueue(&self, buffer: PacketBuffer) {
        self.lock_queue().push_back(buffer);
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<PacketBuffer>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
