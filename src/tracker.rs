//! Server-side reference tracking
//!
//! [`PacketCollection`] remembers which packet ids have crossed the wire and
//! which of them the receiver may forget. Sent packets are retained so their
//! reference count can be inspected later: once nothing but the collection holds
//! a packet, no new reference to it can be produced and its id becomes ready for
//! release.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, trace};

use crate::types::DataPacket;

/// Whether a release decision must consult the packet's reference count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckRefCount {
    Yes,
    No,
}

/// Whether `packet` can be forgotten by the receiver right away.
///
/// `held_by_caller` is the number of handles the caller itself owns. With
/// [`CheckRefCount::Yes`] a packet still referenced elsewhere in process is never
/// releasable.
pub fn can_release_packet(
    packet: &DataPacket,
    held_by_caller: usize,
    check: CheckRefCount,
) -> bool {
    match check {
        CheckRefCount::Yes => packet.ref_count() <= held_by_caller,
        CheckRefCount::No => true,
    }
}

#[derive(Debug, Default)]
struct CollectionState {
    sent: HashMap<i64, DataPacket>,
    ready_for_release: Vec<i64>,
}

/// Sent-id set and ready-for-release list shared by the producer, drain, and
/// acknowledgement call sites.
#[derive(Debug, Default)]
pub struct PacketCollection {
    state: Mutex<CollectionState>,
}

impl PacketCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `packet_id` was already transmitted and is still referenced on the far end.
    pub fn is_sent(&self, packet_id: i64) -> bool {
        self.lock().sent.contains_key(&packet_id)
    }

    /// Record `packet` as transmitted unless it was already, returning whether
    /// the caller is the one that must transmit it.
    pub fn try_mark_sent(&self, packet: &DataPacket) -> bool {
        let mut state = self.lock();
        if state.sent.contains_key(&packet.packet_id()) {
            return false;
        }
        state.sent.insert(packet.packet_id(), packet.clone());
        trace!(packet_id = packet.packet_id(), retained = state.sent.len(), "Marked sent");
        true
    }

    /// Stop tracking `packet_id` and queue it for the next release buffer.
    pub fn mark_ready_for_release(&self, packet_id: i64) {
        let mut state = self.lock();
        state.sent.remove(&packet_id);
        if !state.ready_for_release.contains(&packet_id) {
            state.ready_for_release.push(packet_id);
        }
    }

    /// Move every retained packet nobody else references into the ready list.
    ///
    /// Returns the number of ids moved.
    pub fn collect_releasable(&self) -> usize {
        collect_releasable(&mut self.lock())
    }

    /// Sweep releasable packets, then drain the ready list when it holds at least
    /// `threshold` ids, or any ids at all when `force` is set.
    ///
    /// Both steps happen under one lock so a batch never misses a packet that
    /// became releasable in between.
    pub fn take_release_batch(&self, threshold: usize, force: bool) -> Option<Vec<i64>> {
        let mut state = self.lock();
        collect_releasable(&mut state);
        let pending = state.ready_for_release.len();
        if pending == 0 || (!force && pending < threshold) {
            return None;
        }
        Some(std::mem::take(&mut state.ready_for_release))
    }

    pub fn sent_count(&self) -> usize {
        self.lock().sent.len()
    }

    pub fn ready_for_release_count(&self) -> usize {
        self.lock().ready_for_release.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CollectionState> {
        // Critical sections only mutate maps and cannot leave them half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Repeats until no progress is made, so a domain packet becomes ready in the
/// same sweep as the last data packet that pointed at it.
fn collect_releasable(state: &mut CollectionState) -> usize {
    let mut moved = 0;
    loop {
        let mut releasable: Vec<i64> = state
            .sent
            .iter()
            .filter(|(_, packet)| can_release_packet(packet, 1, CheckRefCount::Yes))
            .map(|(id, _)| *id)
            .collect();
        if releasable.is_empty() {
            break;
        }
        releasable.sort_unstable();
        for id in releasable {
            state.sent.remove(&id);
            state.ready_for_release.push(id);
            moved += 1;
        }
    }
    if moved > 0 {
        debug!(moved, pending = state.ready_for_release.len(), "Collected releasable packets");
    }
    moved
}
