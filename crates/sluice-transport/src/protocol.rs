//! Wire format used by the TCP mesh.
//!
//! Every message travels as one frame with a fixed 32-byte header:
//! magic:4 + version:1 + kind:1 + reserved:2 + source:4 + channel:4 +
//! seq:8 + payload_length:4 + checksum:4, followed by the payload.
//! All integers are big-endian and the checksum is CRC32 over the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TransportError};
use crate::transport::{Envelope, Rank, Tag, TagKind};

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 32;

/// Protocol magic number for frame validation.
pub const MAGIC: u32 = 0x534C_4301;

/// Protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest accepted payload (1 GiB).
pub const MAX_PAYLOAD_SIZE: u32 = 1 << 30;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Sending rank.
    pub source: Rank,
    /// Matching key.
    pub tag: Tag,
    /// Payload length in bytes.
    pub payload_length: u32,
    /// CRC32 of the payload.
    pub checksum: u32,
}

impl FrameHeader {
    /// Encodes the header into `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32(MAGIC);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(self.tag.kind as u8);
        buf.put_u16(0);
        buf.put_u32(self.source);
        buf.put_u32(self.tag.channel);
        buf.put_u64(self.tag.seq);
        buf.put_u32(self.payload_length);
        buf.put_u32(self.checksum);
    }

    /// Decodes and validates a header.
    pub fn decode(mut raw: &[u8]) -> Result<Self> {
        if raw.len() < FRAME_HEADER_SIZE {
            return Err(TransportError::InvalidFrame {
                reason: format!("header is {} bytes, need {}", raw.len(), FRAME_HEADER_SIZE),
            });
        }
        let magic = raw.get_u32();
        if magic != MAGIC {
            return Err(TransportError::InvalidMagic {
                expected: MAGIC,
                got: magic,
            });
        }
        let version = raw.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(TransportError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }
        let kind_raw = raw.get_u8();
        let kind = TagKind::from_u8(kind_raw).ok_or_else(|| TransportError::InvalidFrame {
            reason: format!("unknown tag kind {}", kind_raw),
        })?;
        let _reserved = raw.get_u16();
        let source = raw.get_u32();
        let channel = raw.get_u32();
        let seq = raw.get_u64();
        let payload_length = raw.get_u32();
        let checksum = raw.get_u32();
        if payload_length > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: payload_length as u64,
                max_size: MAX_PAYLOAD_SIZE as u64,
            });
        }
        Ok(Self {
            source,
            tag: Tag::new(channel, kind, seq),
            payload_length,
            checksum,
        })
    }
}

/// Encodes an envelope as a complete frame.
pub fn encode_frame(envelope: &Envelope) -> Result<Bytes> {
    let len = envelope.payload.len() as u64;
    if len > MAX_PAYLOAD_SIZE as u64 {
        return Err(TransportError::PayloadTooLarge {
            size: len,
            max_size: MAX_PAYLOAD_SIZE as u64,
        });
    }
    let header = FrameHeader {
        source: envelope.source,
        tag: envelope.tag,
        payload_length: len as u32,
        checksum: crc32fast::hash(&envelope.payload),
    };
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + envelope.payload.len());
    header.encode_into(&mut buf);
    buf.put_slice(&envelope.payload);
    Ok(buf.freeze())
}

/// Verifies the payload against its header and builds the envelope.
pub fn finish_frame(header: FrameHeader, payload: Bytes) -> Result<Envelope> {
    if payload.len() != header.payload_length as usize {
        return Err(TransportError::InvalidFrame {
            reason: format!(
                "payload is {} bytes, header says {}",
                payload.len(),
                header.payload_length
            ),
        });
    }
    let computed = crc32fast::hash(&payload);
    if computed != header.checksum {
        return Err(TransportError::ChecksumMismatch {
            expected: header.checksum,
            computed,
        });
    }
    Ok(Envelope {
        source: header.source,
        tag: header.tag,
        payload,
    })
}
