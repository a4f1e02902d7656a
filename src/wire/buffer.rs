//! Transport-ready packet buffers
//!
//! A [`PacketBuffer`] is a header, a view of payload memory, and a release
//! callback. Buffers are move-only: whoever holds one owns its payload, and the
//! release callback fires exactly once, when the buffer is released or dropped.

use bytes::{Bytes, BytesMut};
use std::fmt;
use tracing::trace;

use super::header::{BufferHeader, PacketKind};
use crate::{Result, StreamingError};

/// Callback returning payload ownership to whoever lent it.
pub type ReleaseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Unit of transport: header, payload view, and an exactly-once release.
pub struct PacketBuffer {
    header: BufferHeader,
    payload: Bytes,
    release: Option<ReleaseCallback>,
    extra_signal_ids: Vec<u32>,
}

impl PacketBuffer {
    /// Create a buffer; the header's payload size is set from `payload`.
    pub fn new(mut header: BufferHeader, payload: Bytes) -> Self {
        header.generic_mut().payload_size = payload.len() as u32;
        Self { header, payload, release: None, extra_signal_ids: Vec::new() }
    }

    /// Attach the callback fired once this buffer is released.
    pub fn with_release(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(callback));
        self
    }

    /// Additional signals that receive the same packet.
    ///
    /// For in-process hand-off only; the encoded frame does not carry them, so
    /// [`crate::StreamingServer`] puts a buffer per signal on the wire instead.
    pub fn with_extra_signal_ids(mut self, extra_signal_ids: Vec<u32>) -> Self {
        self.extra_signal_ids = extra_signal_ids;
        self
    }

    pub fn header(&self) -> &BufferHeader {
        &self.header
    }

    pub fn kind(&self) -> PacketKind {
        self.header.kind()
    }

    pub fn signal_id(&self) -> u32 {
        self.header.signal_id()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn extra_signal_ids(&self) -> &[u32] {
        &self.extra_signal_ids
    }

    /// The primary signal followed by every extra signal.
    pub fn signal_ids(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::once(self.signal_id()).chain(self.extra_signal_ids.iter().copied())
    }

    /// Size of the encoded frame in bytes.
    pub fn encoded_len(&self) -> usize {
        self.header.header_size() + self.payload.len()
    }

    pub fn write_to(&self, out: &mut BytesMut) {
        self.header.write_to(out);
        out.extend_from_slice(&self.payload);
    }

    /// Encode header and payload into one frame.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut out);
        out.freeze()
    }

    /// Decode a frame holding exactly one buffer.
    ///
    /// The payload is a view into `frame`; no bytes are copied.
    pub fn decode(frame: Bytes) -> Result<Self> {
        let (buffer, consumed) = Self::decode_prefix(&frame)?;
        if consumed != frame.len() {
            return Err(StreamingError::malformed(
                "Buffer decoding",
                format!(
                    "{} trailing bytes after {:?} buffer",
                    frame.len() - consumed,
                    buffer.kind()
                ),
            ));
        }
        Ok(buffer)
    }

    /// Decode the buffer at the start of `data`, returning it with the bytes consumed.
    pub fn decode_prefix(data: &Bytes) -> Result<(Self, usize)> {
        let header = BufferHeader::parse(data)?;
        let start = header.header_size();
        let end = start.checked_add(header.payload_size()).ok_or_else(|| {
            StreamingError::malformed("Buffer decoding", "Payload size overflows")
        })?;

        if end > data.len() {
            return Err(StreamingError::malformed(
                "Buffer decoding",
                format!(
                    "{:?} buffer declares {} payload bytes, have {}",
                    header.kind(),
                    header.payload_size(),
                    data.len() - start
                ),
            ));
        }

        trace!(kind = ?header.kind(), signal_id = header.signal_id(), len = end, "Decoded buffer");

        let payload = data.slice(start..end);
        let buffer = Self { header, payload, release: None, extra_signal_ids: Vec::new() };
        Ok((buffer, end))
    }

    /// Split a data buffer flagged with an inline domain into the embedded domain
    /// buffer and the remaining value samples.
    pub fn split_inline_domain(&self) -> Result<(PacketBuffer, Bytes)> {
        let (domain, consumed) = Self::decode_prefix(&self.payload)?;
        if domain.kind() != PacketKind::Data {
            return Err(StreamingError::malformed(
                "Inline domain decoding",
                format!("Embedded {:?} buffer where a data buffer was expected", domain.kind()),
            ));
        }
        Ok((domain, self.payload.slice(consumed..)))
    }

    /// Packet ids listed in a release buffer.
    pub fn released_ids(&self) -> Result<Vec<i64>> {
        if self.kind() != PacketKind::Release {
            return Err(StreamingError::malformed(
                "Release decoding",
                format!("{:?} buffer has no released ids", self.kind()),
            ));
        }
        Ok(self
            .payload
            .chunks_exact(8)
            .map(|chunk| {
                i64::from_le_bytes([
                    chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
                ])
            })
            .collect())
    }

    /// Give the payload back to its owner. Equivalent to dropping the buffer.
    pub fn release(self) {}
}

impl Drop for PacketBuffer {
    fn drop(&mut self) {
        if let Some(callback) = self.release.take() {
            callback();
        }
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("header", &self.header)
            .field("payload_len", &self.payload.len())
            .field("has_release", &self.release.is_some())
            .field("extra_signal_ids", &self.extra_signal_ids)
            .finish()
    }
}
