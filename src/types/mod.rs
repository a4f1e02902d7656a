//! Application-level packet types.
//!
//! These are the in-memory packets a producer hands to the streaming server and a
//! consumer receives back from the streaming client:
//! - [`DataPacket`] carries samples plus an optional link to its domain packet
//! - [`EventPacket`] carries out-of-band changes such as new descriptors
//! - [`OffsetValue`] is the typed offset of a packet's first sample
//! - [`DataDescriptor`] describes what a signal's samples mean
//!
//! ## Usage Example
//!
//! ```rust
//! use packet_streaming::types::{DataPacket, OffsetValue};
//!
//! let domain = DataPacket::builder(100).implicit_samples(3).offset(1_000i64).build();
//! let value = DataPacket::builder(1)
//!     .f64_samples(&[1.0, 2.0, 3.0])
//!     .domain(domain.clone())
//!     .build();
//!
//! assert_eq!(value.domain_packet().map(|d| d.packet_id()), Some(100));
//! assert_eq!(domain.offset(), OffsetValue::Int(1_000));
//! ```

mod descriptor;
mod event;
mod offset;
mod packet;

pub use descriptor::{DataDescriptor, DataRule, SampleType};
pub use event::EventPacket;
pub use offset::OffsetValue;
pub use packet::{DataPacket, DataPacketBuilder, Packet, PacketType};
