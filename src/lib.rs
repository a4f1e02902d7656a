//! Binary codec and reference-tracking relay for data-acquisition packet streaming.
//!
//! A producer hands data and event packets to a [`StreamingServer`], which turns
//! them into [`PacketBuffer`]s for an ordered transport. A [`StreamingClient`] on
//! the far end rebuilds the packets, restoring the links between value packets
//! and the domain packets they share.
//!
//! # Features
//!
//! - **Deduplication**: a domain packet shared by many value packets crosses the
//!   wire once; repeats travel as zero-payload `AlreadySent` references
//! - **Out-of-order resolution**: data that arrives before its domain is parked
//!   and delivered once the domain shows up
//! - **Batched release**: ids nobody can reference any more are released in batches
//! - **Async relay**: tokio drivers that pump buffers over any [`Transport`]
//!
//! # Quick Start
//!
//! ```rust
//! use packet_streaming::{DataPacket, StreamingClient, StreamingServer};
//!
//! # fn main() -> packet_streaming::Result<()> {
//! let server = StreamingServer::default();
//! let client = StreamingClient::default();
//!
//! let domain = DataPacket::builder(100).implicit_samples(2).offset(0i64).build();
//! let value = DataPacket::builder(1).f64_samples(&[0.5, 1.5]).domain(domain.clone()).build();
//! server.add_packet(7, value.clone())?;
//!
//! while let Some(buffer) = server.get_next_buffer() {
//!     client.add_frame(buffer.encode())?;
//! }
//!
//! let (signal_id, packet) = client.get_next_packet().expect("one packet");
//! assert_eq!(signal_id, 7);
//! let packet = packet.as_data().expect("data packet");
//! assert_eq!(packet.samples_as_f64(), vec![0.5, 1.5]);
//! assert_eq!(packet.domain_packet().map(|d| d.packet_id()), Some(100));
//! # Ok(())
//! # }
//! ```

// Core types and error handling
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;
pub mod wire;

// Protocol endpoints
pub mod client;
pub mod config;
pub mod serializer;
pub mod server;
pub mod tracker;

// Async relay
pub mod driver;
pub mod transport;

// Core exports
pub use error::*;
pub use types::*;
pub use wire::{PacketBuffer, PacketKind};

// Main API exports
pub use client::{ClientStats, StreamingClient};
pub use config::StreamingConfig;
pub use driver::{ClientDriver, ClientDriverChannels, ServerDriver, ServerDriverHandle};
pub use serializer::{EventSerializer, JsonEventSerializer};
pub use server::StreamingServer;
pub use transport::{MemoryTransport, Transport};
