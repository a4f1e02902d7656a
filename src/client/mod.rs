//! Streaming client
//!
//! Decodes incoming buffers back into application packets. Data buffers may
//! arrive before the domain packet they reference; those are parked until the
//! domain packet shows up and then delivered in arrival order. Reconstructed
//! packets stay referenced until the server releases their ids, so later
//! `AlreadySent` references can be answered without payload.
//!
//! Per packet id the client moves through
//! `Unknown -> Pending -> Resolved -> Released`; releasing an unknown or already
//! released id is a no-op.

mod references;
#[cfg(test)]
mod tests;

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::config::StreamingConfig;
use crate::serializer::{EventSerializer, JsonEventSerializer};
use crate::types::{DataDescriptor, DataPacket, EventPacket, Packet};
use crate::wire::{BufferHeader, DataHeader, MAX_INLINE_DEPTH, PacketBuffer};
use crate::{Result, StreamingError};
use references::{PendingTable, ReferenceTable};

/// Counters describing what the client has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Packets handed to the output queue (one per target signal)
    pub delivered: u64,
    /// Data buffers parked while waiting for their domain packet
    pub parked: u64,
    /// Parked buffers dropped because the wait table was full
    pub evicted_pending: u64,
    /// Packet ids released by the server
    pub released: u64,
}

#[derive(Debug)]
struct ReferenceState {
    references: ReferenceTable,
    pending: PendingTable,
    stats: ClientStats,
}

#[derive(Debug, Default)]
struct DescriptorMaps {
    data: HashMap<u32, Arc<DataDescriptor>>,
    domain: HashMap<u32, Arc<DataDescriptor>>,
}

/// Reconstructs packets from buffers produced by a [`crate::StreamingServer`].
pub struct StreamingClient {
    serializer: Arc<dyn EventSerializer>,
    state: Mutex<ReferenceState>,
    output: Mutex<VecDeque<(u32, Packet)>>,
    descriptors: Mutex<DescriptorMaps>,
}

impl Default for StreamingClient {
    fn default() -> Self {
        Self::new(StreamingConfig::default())
    }
}

impl StreamingClient {
    pub fn new(config: StreamingConfig) -> Self {
        Self::with_serializer(config, Arc::new(JsonEventSerializer))
    }

    pub fn with_serializer(config: StreamingConfig, serializer: Arc<dyn EventSerializer>) -> Self {
        Self {
            serializer,
            state: Mutex::new(ReferenceState {
                references: ReferenceTable::default(),
                pending: PendingTable::new(config.max_pending_buffers),
                stats: ClientStats::default(),
            }),
            output: Mutex::new(VecDeque::new()),
            descriptors: Mutex::new(DescriptorMaps::default()),
        }
    }

    /// Decode an encoded frame and process it.
    pub fn add_frame(&self, frame: Bytes) -> Result<()> {
        self.add_buffer(PacketBuffer::decode(frame)?)
    }

    /// Process one incoming buffer.
    ///
    /// Malformed buffers and unresolvable `AlreadySent` references are returned as
    /// errors; the connection that produced them should be considered unusable.
    ///
    /// Concurrent callers are serialized: each buffer's packets reach the output
    /// queue before the next buffer is looked at.
    pub fn add_buffer(&self, buffer: PacketBuffer) -> Result<()> {
        trace!(kind = ?buffer.kind(), signal_id = buffer.signal_id(), "Adding buffer");

        let mut state = self.lock_state();
        let mut delivered = Vec::new();
        let result = self.dispatch(&mut state, buffer, &mut delivered);

        if !delivered.is_empty() {
            state.stats.delivered += delivered.len() as u64;
            self.lock_output().extend(delivered);
        }
        drop(state);

        if let Err(e) = &result {
            warn!(error = %e, "Rejected incoming buffer");
        }
        result
    }

    /// Oldest reconstructed `(signal_id, packet)` pair, if any.
    pub fn get_next_packet(&self) -> Option<(u32, Packet)> {
        self.lock_output().pop_front()
    }

    pub fn available_packets_count(&self) -> usize {
        self.lock_output().len()
    }

    /// Whether every referenced packet and buffer has been released.
    pub fn are_references_cleared(&self) -> bool {
        self.lock_state().references.is_empty()
    }

    /// Latest descriptor-changed event known for `signal_id`.
    ///
    /// Lets a late subscriber pick up the current descriptors without replaying
    /// the stream.
    pub fn get_data_descriptor_changed_event_packet(&self, signal_id: u32) -> Option<EventPacket> {
        let descriptors = self.lock_descriptors();
        let data = descriptors.data.get(&signal_id).map(|d| d.as_ref().clone());
        let domain = descriptors.domain.get(&signal_id).map(|d| d.as_ref().clone());
        if data.is_none() && domain.is_none() {
            return None;
        }
        Some(EventPacket::descriptor_changed(data, domain))
    }

    /// Number of data buffers waiting for a domain packet.
    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub fn stats(&self) -> ClientStats {
        self.lock_state().stats
    }

    fn dispatch(
        &self,
        state: &mut ReferenceState,
        buffer: PacketBuffer,
        delivered: &mut Vec<(u32, Packet)>,
    ) -> Result<()> {
        match *buffer.header() {
            BufferHeader::Event(_) => self.add_event_buffer(buffer, delivered),
            BufferHeader::Data(_) => self.add_data_buffer(state, buffer, delivered),
            BufferHeader::AlreadySent(header) => {
                let packet = state.references.get(header.packet_id).ok_or(
                    StreamingError::UnresolvedReference {
                        signal_id: header.generic.signal_id,
                        packet_id: header.packet_id,
                    },
                )?;
                for signal_id in buffer.signal_ids() {
                    delivered.push((signal_id, Packet::Data(packet.clone())));
                }
                Ok(())
            }
            BufferHeader::Release(_) => {
                let ids = buffer.released_ids()?;
                for id in &ids {
                    if state.references.release(*id) {
                        state.stats.released += 1;
                    }
                }
                debug!(count = ids.len(), remaining = state.references.len(), "Processed release");
                Ok(())
            }
        }
    }

    fn add_event_buffer(
        &self,
        buffer: PacketBuffer,
        delivered: &mut Vec<(u32, Packet)>,
    ) -> Result<()> {
        let event = self.serializer.deserialize(buffer.payload())?;

        if let EventPacket::DataDescriptorChanged { data_descriptor, domain_descriptor } = &event {
            let data_descriptor = data_descriptor.clone().map(Arc::new);
            let domain_descriptor = domain_descriptor.clone().map(Arc::new);
            let mut descriptors = self.lock_descriptors();
            for signal_id in buffer.signal_ids() {
                if let Some(descriptor) = &data_descriptor {
                    descriptors.data.insert(signal_id, Arc::clone(descriptor));
                }
                if let Some(descriptor) = &domain_descriptor {
                    descriptors.domain.insert(signal_id, Arc::clone(descriptor));
                }
            }
            debug!(signal_id = buffer.signal_id(), "Descriptor changed");
        }

        for signal_id in buffer.signal_ids() {
            delivered.push((signal_id, Packet::Event(event.clone())));
        }
        Ok(())
    }

    /// Resolve a data buffer, then every parked buffer it unblocks.
    ///
    /// Waiters are drained only after the arriving buffer itself was delivered,
    /// so the packet that carried a domain always precedes the packets that were
    /// waiting for it.
    fn add_data_buffer(
        &self,
        state: &mut ReferenceState,
        buffer: PacketBuffer,
        delivered: &mut Vec<(u32, Packet)>,
    ) -> Result<()> {
        let mut resolved = Vec::new();
        self.resolve_data(state, buffer, 0, None, delivered, &mut resolved)?;

        let mut next = 0;
        while let Some(domain) = resolved.get(next).cloned() {
            next += 1;
            let waiting = state.pending.take(domain.packet_id());
            if !waiting.is_empty() {
                debug!(
                    domain_packet_id = domain.packet_id(),
                    count = waiting.len(),
                    "Resolving parked buffers"
                );
            }
            for parked in waiting {
                let known = Some(domain.clone());
                self.resolve_data(state, parked, 0, known, delivered, &mut resolved)?;
            }
        }
        Ok(())
    }

    /// Reconstruct the data packet in `buffer`, or park it until its domain arrives.
    ///
    /// `depth` is zero for a buffer off the wire and counts nesting for embedded
    /// domain packets, which are only referenced, never delivered. `known_domain`
    /// skips the lookup for parked buffers whose domain just resolved. Every
    /// reconstructed packet is appended to `resolved`, embedded domains first.
    /// Returns `None` when the buffer was parked.
    fn resolve_data(
        &self,
        state: &mut ReferenceState,
        buffer: PacketBuffer,
        depth: usize,
        known_domain: Option<DataPacket>,
        delivered: &mut Vec<(u32, Packet)>,
        resolved: &mut Vec<DataPacket>,
    ) -> Result<Option<DataPacket>> {
        let header = match buffer.header() {
            BufferHeader::Data(header) => *header,
            other => {
                return Err(StreamingError::malformed(
                    "Data resolution",
                    format!("{:?} buffer where a data buffer was expected", other.kind()),
                ));
            }
        };

        let deliver = depth == 0;
        let (embedded, samples) = if header.generic.has_inline_domain() {
            if depth >= MAX_INLINE_DEPTH {
                return Err(StreamingError::malformed(
                    "Inline domain decoding",
                    format!(
                        "Packet {} nests domain packets deeper than {} levels",
                        header.packet_id, MAX_INLINE_DEPTH
                    ),
                ));
            }
            let (domain_buffer, samples) = buffer.split_inline_domain()?;
            (Some(domain_buffer), samples)
        } else {
            (None, buffer.payload().clone())
        };

        let mut domain = match (known_domain, embedded) {
            (Some(domain), _) => Some(domain),
            (None, Some(domain_buffer)) => {
                self.resolve_data(state, domain_buffer, depth + 1, None, delivered, resolved)?
            }
            (None, None) => None,
        };

        if domain.is_none() && header.has_domain() {
            match state.references.get(header.domain_packet_id) {
                Some(known) => domain = Some(known.clone()),
                None => {
                    debug!(
                        packet_id = header.packet_id,
                        domain_packet_id = header.domain_packet_id,
                        "Domain packet not yet known; parking data buffer"
                    );
                    state.stats.parked += 1;
                    let evicted = state.pending.park(header.domain_packet_id, buffer);
                    state.stats.evicted_pending += evicted as u64;
                    return Ok(None);
                }
            }
        }

        let packet = self.reconstruct(&header, samples, domain, deliver);

        if deliver {
            for signal_id in buffer.signal_ids() {
                delivered.push((signal_id, Packet::Data(packet.clone())));
            }
        }

        if header.generic.can_release() {
            buffer.release();
        } else {
            state.references.retain(packet.clone(), buffer);
        }
        resolved.push(packet.clone());
        Ok(Some(packet))
    }

    fn reconstruct(
        &self,
        header: &DataHeader,
        samples: Bytes,
        domain: Option<DataPacket>,
        deliver: bool,
    ) -> DataPacket {
        let signal_id = header.generic.signal_id;
        let descriptor = {
            let descriptors = self.lock_descriptors();
            let map = if deliver { &descriptors.data } else { &descriptors.domain };
            map.get(&signal_id).cloned()
        };

        let mut builder = DataPacket::builder(header.packet_id)
            .samples(samples, header.sample_count)
            .offset(header.offset);
        if let Some(domain) = domain {
            builder = builder.domain(domain);
        }
        if let Some(descriptor) = descriptor {
            builder = builder.descriptor(descriptor);
        }
        builder.build()
    }

    fn lock_state(&self) -> MutexGuard<'_, ReferenceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_output(&self) -> MutexGuard<'_, VecDeque<(u32, Packet)>> {
        self.output.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_descriptors(&self) -> MutexGuard<'_, DescriptorMaps> {
        self.descriptors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
