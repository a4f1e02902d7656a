//! Client-side reference bookkeeping
//!
//! [`ReferenceTable`] keeps reconstructed packets (and the buffers whose payload
//! they borrow) alive while the server may still refer to them by id.
//! [`PendingTable`] parks data buffers whose domain packet has not arrived yet,
//! keyed by the awaited domain id.

use std::collections::{HashMap, VecDeque};
use tracing::{trace, warn};

use crate::types::DataPacket;
use crate::wire::PacketBuffer;

#[derive(Debug, Default)]
pub(crate) struct ReferenceTable {
    packets: HashMap<i64, DataPacket>,
    buffers: HashMap<i64, PacketBuffer>,
}

impl ReferenceTable {
    pub(crate) fn get(&self, packet_id: i64) -> Option<&DataPacket> {
        self.packets.get(&packet_id)
    }

    pub(crate) fn retain(&mut self, packet: DataPacket, buffer: PacketBuffer) {
        let packet_id = packet.packet_id();
        self.packets.insert(packet_id, packet);
        // A replaced buffer is released by the drop.
        self.buffers.insert(packet_id, buffer);
    }

    /// Forget `packet_id`, releasing its buffer. Unknown ids are a no-op.
    pub(crate) fn release(&mut self, packet_id: i64) -> bool {
        let had_packet = self.packets.remove(&packet_id).is_some();
        let had_buffer = match self.buffers.remove(&packet_id) {
            Some(buffer) => {
                buffer.release();
                true
            }
            None => false,
        };
        trace!(packet_id, had_packet, had_buffer, "Released packet reference");
        had_packet || had_buffer
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.packets.is_empty() && self.buffers.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.packets.len()
    }
}

/// Wait table of data buffers keyed by the domain packet id they need.
#[derive(Debug)]
pub(crate) struct PendingTable {
    waiting: HashMap<i64, VecDeque<PacketBuffer>>,
    /// Awaited ids in the order they were first parked
    order: VecDeque<i64>,
    total: usize,
    limit: usize,
}

impl PendingTable {
    pub(crate) fn new(limit: usize) -> Self {
        Self { waiting: HashMap::new(), order: VecDeque::new(), total: 0, limit }
    }

    /// Park `buffer` until `domain_packet_id` resolves.
    ///
    /// When the table is full the oldest awaited id is evicted first; its buffers
    /// are released. Returns the number of evicted buffers.
    pub(crate) fn park(&mut self, domain_packet_id: i64, buffer: PacketBuffer) -> usize {
        let mut evicted = 0;
        while self.total >= self.limit {
            match self.evict_oldest() {
                Some(count) => evicted += count,
                None => break,
            }
        }

        let queue = self.waiting.entry(domain_packet_id).or_default();
        if queue.is_empty() {
            self.order.push_back(domain_packet_id);
        }
        queue.push_back(buffer);
        self.total += 1;
        evicted
    }

    /// Remove and return every buffer waiting for `domain_packet_id`, in arrival order.
    pub(crate) fn take(&mut self, domain_packet_id: i64) -> VecDeque<PacketBuffer> {
        match self.waiting.remove(&domain_packet_id) {
            Some(queue) => {
                self.total -= queue.len();
                self.order.retain(|id| *id != domain_packet_id);
                queue
            }
            None => VecDeque::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.total
    }

    fn evict_oldest(&mut self) -> Option<usize> {
        let domain_packet_id = self.order.pop_front()?;
        let queue = self.waiting.remove(&domain_packet_id).unwrap_or_default();
        let count = queue.len();
        self.total -= count;
        warn!(
            domain_packet_id,
            evicted = count,
            "Domain packet never arrived; dropping data buffers waiting for it"
        );
        Some(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{BufferHeader, DataHeader};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn data_buffer(
        packet_id: i64,
        domain_packet_id: i64,
        released: &Arc<AtomicUsize>,
    ) -> PacketBuffer {
        let released = Arc::clone(released);
        PacketBuffer::new(
            BufferHeader::Data(DataHeader::new(1, packet_id, domain_packet_id, 0)),
            Bytes::new(),
        )
        .with_release(move || {
            released.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn release_is_idempotent() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut table = ReferenceTable::default();
        table.retain(DataPacket::builder(1).build(), data_buffer(1, -1, &released));

        assert!(table.get(1).is_some());
        assert!(table.release(1));
        assert!(!table.release(1));
        assert!(!table.release(42));
        assert!(table.is_empty());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pending_buffers_come_back_in_arrival_order() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut pending = PendingTable::new(16);
        pending.park(100, data_buffer(1, 100, &released));
        pending.park(200, data_buffer(2, 200, &released));
        pending.park(100, data_buffer(3, 100, &released));
        assert_eq!(pending.len(), 3);

        let ids: Vec<i64> = pending
            .take(100)
            .iter()
            .map(|buffer| match buffer.header() {
                BufferHeader::Data(header) => header.packet_id,
                other => panic!("Unexpected header {:?}", other),
            })
            .collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(pending.len(), 1);
        assert!(pending.take(100).is_empty());
    }

    #[test]
    fn full_table_evicts_oldest_awaited_domain() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut pending = PendingTable::new(2);
        assert_eq!(pending.park(100, data_buffer(1, 100, &released)), 0);
        assert_eq!(pending.park(100, data_buffer(2, 100, &released)), 0);
        assert_eq!(pending.park(200, data_buffer(3, 200, &released)), 2);

        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert_eq!(pending.len(), 1);
        assert!(pending.take(100).is_empty());
        assert_eq!(pending.take(200).len(), 1);
    }
}
