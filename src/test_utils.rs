//! Test utilities for building packets and wiring a server to a client
//!
//! Shared by the unit tests and the benchmarks.

#![cfg(any(test, feature = "benchmark"))]

use crate::client::StreamingClient;
use crate::server::StreamingServer;
use crate::types::{DataDescriptor, DataPacket, SampleType};

/// Implicit time domain of `sample_count` ticks starting at `start`.
pub fn time_domain(packet_id: i64, sample_count: i64, start: i64) -> DataPacket {
    DataPacket::builder(packet_id).implicit_samples(sample_count).offset(start).build()
}

/// Float samples on `domain`.
pub fn value_packet(packet_id: i64, values: &[f64], domain: &DataPacket) -> DataPacket {
    DataPacket::builder(packet_id).f64_samples(values).domain(domain.clone()).build()
}

/// `count` consecutive float samples, starting at zero.
pub fn ramp(count: usize) -> Vec<f64> {
    (0..count).map(|i| i as f64).collect()
}

pub fn voltage_descriptor() -> DataDescriptor {
    DataDescriptor::new("voltage", SampleType::Float64).with_unit("V")
}

pub fn time_descriptor() -> DataDescriptor {
    DataDescriptor::new("time", SampleType::Int64)
        .with_linear_rule(0, 1)
        .with_tick_resolution(1, 1_000_000)
        .with_origin("1970-01-01T00:00:00Z")
}

/// Move every queued buffer from `server` to `client` as encoded frames.
///
/// Each server buffer is released once its frame was handed over, the way a
/// transport would. Returns the number of frames moved.
pub fn loopback(server: &StreamingServer, client: &StreamingClient) -> crate::Result<usize> {
    let mut moved = 0;
    while let Some(buffer) = server.get_next_buffer() {
        let frame = buffer.encode();
        buffer.release();
        client.add_frame(frame)?;
        moved += 1;
    }
    Ok(moved)
}
