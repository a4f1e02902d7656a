//! Error types for packet streaming.
//!
//! All errors implement the `std::error::Error` trait and carry enough context to
//! decide whether the connection that produced them is still usable.
//!
//! ## Error Categories
//!
//! - **Malformed Buffers**: truncated headers, unknown packet kinds, bad flag bits
//! - **Version Errors**: a peer speaking a different protocol version
//! - **Reference Errors**: `AlreadySent` references the receiver cannot resolve
//! - **Serialization Errors**: event payloads the serializer rejects
//! - **Transport / Config Errors**: failures in the ambient relay and configuration layers
//!
//! ## Connection Fate
//!
//! ```rust
//! use packet_streaming::StreamingError;
//!
//! let error = StreamingError::malformed("Data header", "truncated after 12 bytes");
//! if error.is_fatal() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use thiserror::Error;

/// Result type alias for streaming operations.
pub type Result<T, E = StreamingError> = std::result::Result<T, E>;

/// Main error type for streaming operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamingError {
    #[error("Malformed buffer in {context}: {details}")]
    Malformed { context: String, details: String },

    #[error("Protocol version mismatch: expected {expected}, found {found}")]
    UnsupportedVersion { expected: u8, found: u8 },

    #[error("Signal {signal_id} references packet {packet_id} which was never received")]
    UnresolvedReference { signal_id: u32, packet_id: i64 },

    #[error("Event serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Transport failure: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl StreamingError {
    /// Returns whether the connection that produced this error must be torn down.
    pub fn is_fatal(&self) -> bool {
        match self {
            StreamingError::Malformed { .. } => true,
            StreamingError::UnsupportedVersion { .. } => true,
            StreamingError::UnresolvedReference { .. } => true,
            StreamingError::Serialization { .. } => false,
            StreamingError::Transport { .. } => true,
            StreamingError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StreamingError::Malformed { .. } => vec![
                "Check the transport framing delivers whole buffers",
                "Verify both peers use the same protocol version",
                "Reconnect to resynchronize the stream",
            ],
            StreamingError::UnsupportedVersion { .. } => vec![
                "Upgrade the older peer",
                "Check protocol compatibility before connecting",
            ],
            StreamingError::UnresolvedReference { .. } => vec![
                "Reconnect so sender and receiver start with empty dedup state",
                "Check that release notifications are not reordered by the transport",
            ],
            StreamingError::Serialization { .. } => vec![
                "Check the event payload schema",
                "Verify both peers use the same event serializer",
            ],
            StreamingError::Transport { .. } => vec![
                "Check the remote peer is still connected",
                "Recreate the connection",
            ],
            StreamingError::Config { .. } => vec![
                "Check configuration values are positive",
                "Compare against the documented defaults",
            ],
        }
    }

    /// Helper constructor for malformed buffer errors.
    pub fn malformed(context: impl Into<String>, details: impl Into<String>) -> Self {
        StreamingError::Malformed { context: context.into(), details: details.into() }
    }

    /// Helper constructor for serialization errors with source.
    pub fn serialization(
        context: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        StreamingError::Serialization { context: context.into(), source: Some(source) }
    }

    /// Helper constructor for transport errors.
    pub fn transport(reason: impl Into<String>) -> Self {
        StreamingError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        StreamingError::Config { reason: reason.into() }
    }
}

impl From<serde_json::Error> for StreamingError {
    fn from(err: serde_json::Error) -> Self {
        StreamingError::serialization("JSON event payload", Box::new(err))
    }
}
