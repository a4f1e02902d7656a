//! Event packets carrying out-of-band signal changes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::DataDescriptor;

/// Out-of-band event delivered in order with a signal's data packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPacket {
    /// The value and/or domain descriptor of a signal changed.
    ///
    /// A `None` descriptor means "unchanged", not "removed".
    DataDescriptorChanged {
        #[serde(default)]
        data_descriptor: Option<DataDescriptor>,
        #[serde(default)]
        domain_descriptor: Option<DataDescriptor>,
    },
    /// The producer detected a gap in an implicit domain.
    ImplicitDomainGapDetected { gap: i64 },
    /// Application-defined event.
    Custom { id: String, parameters: BTreeMap<String, String> },
}

impl EventPacket {
    pub fn descriptor_changed(
        data_descriptor: Option<DataDescriptor>,
        domain_descriptor: Option<DataDescriptor>,
    ) -> Self {
        EventPacket::DataDescriptorChanged { data_descriptor, domain_descriptor }
    }

    /// Stable identifier of the event kind.
    pub fn event_id(&self) -> &str {
        match self {
            EventPacket::DataDescriptorChanged { .. } => "DATA_DESCRIPTOR_CHANGED",
            EventPacket::ImplicitDomainGapDetected { .. } => "IMPLICIT_DOMAIN_GAP_DETECTED",
            EventPacket::Custom { id, .. } => id,
        }
    }

    pub fn is_descriptor_changed(&self) -> bool {
        matches!(self, EventPacket::DataDescriptorChanged { .. })
    }
}
