//! Signal data descriptors

use serde::{Deserialize, Serialize};

/// Sample type of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
}

impl SampleType {
    /// Returns the size in bytes of one sample.
    pub const fn size(&self) -> usize {
        match self {
            SampleType::Int8 | SampleType::UInt8 => 1,
            SampleType::Int16 | SampleType::UInt16 => 2,
            SampleType::Int32 | SampleType::UInt32 | SampleType::Float32 => 4,
            SampleType::Int64 | SampleType::UInt64 | SampleType::Float64 => 8,
        }
    }
}

/// How sample values are produced.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum DataRule {
    /// Every sample is carried in the packet
    #[default]
    Explicit,
    /// Values are `start + packet offset + index * delta`; packets carry no samples
    Linear { start: i64, delta: i64 },
}

/// Descriptor of the values carried by a signal's data packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDescriptor {
    pub name: String,
    pub sample_type: SampleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub rule: DataRule,
    /// Tick resolution as numerator/denominator (domain signals)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_resolution: Option<(i64, i64)>,
    /// Epoch of the domain, e.g. an ISO 8601 timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl DataDescriptor {
    pub fn new(name: impl Into<String>, sample_type: SampleType) -> Self {
        Self {
            name: name.into(),
            sample_type,
            unit: None,
            rule: DataRule::Explicit,
            tick_resolution: None,
            origin: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_linear_rule(mut self, start: i64, delta: i64) -> Self {
        self.rule = DataRule::Linear { start, delta };
        self
    }

    pub fn with_tick_resolution(mut self, numerator: i64, denominator: i64) -> Self {
        self.tick_resolution = Some((numerator, denominator));
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Bytes needed for `sample_count` explicit samples; zero for implicit rules.
    pub fn payload_size(&self, sample_count: usize) -> usize {
        match self.rule {
            DataRule::Explicit => self.sample_type.size() * sample_count,
            DataRule::Linear { .. } => 0,
        }
    }
}
