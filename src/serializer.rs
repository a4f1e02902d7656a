//! Event payload serialization
//!
//! The streaming core treats event payloads as opaque bytes; an
//! [`EventSerializer`] turns [`EventPacket`]s into those bytes and back.
//! [`JsonEventSerializer`] is the default.

use crate::types::EventPacket;
use crate::Result;

/// Converts event packets to and from opaque payload bytes.
pub trait EventSerializer: Send + Sync + 'static {
    fn serialize(&self, event: &EventPacket) -> Result<Vec<u8>>;

    fn deserialize(&self, payload: &[u8]) -> Result<EventPacket>;
}

/// JSON event serializer built on `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventSerializer;

impl EventSerializer for JsonEventSerializer {
    fn serialize(&self, event: &EventPacket) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(event)?)
    }

    fn deserialize(&self, payload: &[u8]) -> Result<EventPacket> {
        Ok(serde_json::from_slice(payload)?)
    }
}
