//! Session frame wire format.
//!
//! ```text
//!  0: 'D' 'S' 'P' 0x00                     magic
//!  4: frameType | major | minor | revision
//!  8: frameOffset(1) | length(3)
//! 12: [frameDigest]   (4 bytes, if enabled)
//!  ?: [payloadDigest]  (4 bytes, if enabled)
//!  ?: [headerDigest]   (4 bytes, if enabled)
//!  ?: body: fixed exchange/slot/status fields, then the (possibly
//!     compressed) service payload, then any bulk-data regions
//! ```
//!
//! Digest slots appear in this fixed order — frame, then payload, then
//! header — so their byte offsets follow purely from which digests the
//! session negotiated, without parsing the body. The header digest is
//! always last because it covers every byte that precedes it, including
//! the other two digest slots once they're filled in.
//!
//! `FrameCodec` is configured once per transport with the session's
//! negotiated digest and compression algorithms; it does not re-derive them
//! per frame. The decoder's cumulation buffer is the only per-connection
//! state, matching the `tokio_util::codec` contract.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::compress::{CompressionAlgorithm, CompressionError};
use crate::digest::DigestAlgorithm;

/// Fixed protocol identifier: `'D' 'S' 'P' 0x00`.
pub const MAGIC: [u8; 4] = [b'D', b'S', b'P', 0x00];

/// Size of the fixed header, before any optional digest slots.
pub const HEADER_SIZE: usize = 12;

/// Width of a single digest value on the wire.
const DIGEST_SIZE: usize = crate::digest::DIGEST_SIZE;

/// 24-bit length field caps a single frame at 16 MiB.
pub const MAX_FRAME_LEN: usize = (1 << 24) - 1;

/// Reserved version used only on `CONNECT_REQ`/`CONNECT_RESP` frames, before
/// a protocol version has been negotiated.
pub const RESERVED_VERSION: ProtocolVersion = ProtocolVersion { major: 0xff, minor: 0xff, revision: 0xff };

/// Frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    ConnectReq = 0,
    ConnectResp = 1,
    AuthReq = 2,
    AuthResp = 3,
    NegotiateReq = 4,
    NegotiateResp = 5,
    CommandReq = 6,
    CommandResp = 7,
    TaskmgmtReq = 8,
    TaskmgmtResp = 9,
    PingReq = 10,
    PingResp = 11,
    LogoutReq = 12,
    LogoutResp = 13,
}

impl FrameType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::ConnectReq,
            1 => Self::ConnectResp,
            2 => Self::AuthReq,
            3 => Self::AuthResp,
            4 => Self::NegotiateReq,
            5 => Self::NegotiateResp,
            6 => Self::CommandReq,
            7 => Self::CommandResp,
            8 => Self::TaskmgmtReq,
            9 => Self::TaskmgmtResp,
            10 => Self::PingReq,
            11 => Self::PingResp,
            12 => Self::LogoutReq,
            13 => Self::LogoutResp,
            _ => return None,
        })
    }
}

/// Three-byte protocol version (major, minor, revision).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
}

impl ProtocolVersion {
    pub const CURRENT: Self = Self { major: 1, minor: 0, revision: 0 };
}

/// Frame-level parsing/serialization errors. Per §7, these are protocol
/// violations: the transport that produced one is torn down by the caller
/// and retried via the channel's retry machinery, never surfaced directly
/// to application code.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid magic bytes: {0:02x?}")]
    InvalidMagic([u8; 4]),
    #[error("unknown frame type: {0}")]
    UnknownFrameType(u8),
    #[error("frame length {0} exceeds maximum {MAX_FRAME_LEN}")]
    FrameTooLarge(usize),
    #[error("bad digest ({which}): expected {expected:08x}, computed {computed:08x}")]
    BadDigest { which: &'static str, expected: u32, computed: u32 },
    #[error("torn frame: bytes after frame end do not start a new frame")]
    TornFrame,
    #[error("malformed frame body: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Compression(#[from] CompressionError),
}

/// Per-session digest/compression configuration. Negotiated once (via the
/// NEGOTIATE collaborator, out of core scope) and then fixed for the life
/// of a transport.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodecOptions {
    pub header_digest: DigestAlgorithm,
    pub frame_digest: DigestAlgorithm,
    pub payload_digest: DigestAlgorithm,
    /// Whether the payload digest also covers bulk-data regions when
    /// compression is disabled (the `DIGEST_DATA` option in §6).
    pub digest_data: bool,
    pub compression: CompressionAlgorithm,
}

impl Default for FrameCodecOptions {
    fn default() -> Self {
        Self {
            header_digest: DigestAlgorithm::None,
            frame_digest: DigestAlgorithm::None,
            payload_digest: DigestAlgorithm::None,
            digest_data: false,
            compression: CompressionAlgorithm::None,
        }
    }
}

/// A decoded or to-be-encoded session frame.
///
/// The `exchange`/`slot`/`status` fields are a superset covering
/// `COMMAND_*` and `TASKMGMT_*` frames; collaborator frame types (login,
/// ping, logout) leave the ones they don't use at zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub version: ProtocolVersion,
    pub exchange_id: u32,
    pub command_sn: u32,
    pub expected_command_sn: u32,
    pub slot_id: u32,
    pub slot_sn: u32,
    pub current_max_slot_id: u32,
    pub target_max_slot_id: u32,
    pub status: u16,
    pub payload: Vec<u8>,
    pub bulk: Vec<Vec<u8>>,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            version: ProtocolVersion::CURRENT,
            exchange_id: 0,
            command_sn: 0,
            expected_command_sn: 0,
            slot_id: 0,
            slot_sn: 0,
            current_max_slot_id: 0,
            target_max_slot_id: 0,
            status: 0,
            payload,
            bulk: Vec::new(),
        }
    }

    pub fn with_exchange(mut self, xid: u32) -> Self {
        self.exchange_id = xid;
        self
    }

    pub fn with_slot(mut self, slot_id: u32, slot_sn: u32) -> Self {
        self.slot_id = slot_id;
        self.slot_sn = slot_sn;
        self
    }

    pub fn with_bulk(mut self, bulk: Vec<Vec<u8>>) -> Self {
        self.bulk = bulk;
        self
    }
}

/// Tokio codec for session frames, parameterized by the session's
/// negotiated digest/compression options.
pub struct FrameCodec {
    pub options: FrameCodecOptions,
}

impl FrameCodec {
    pub fn new(options: FrameCodecOptions) -> Self {
        Self { options }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let opts = &self.options;

        // Service payload + bulk, combined per the compression rule in §4.1.
        let (stored_payload, service_len) = if opts.compression.is_enabled() {
            let mut combined = frame.payload.clone();
            for region in &frame.bulk {
                combined.extend_from_slice(region);
            }
            (opts.compression.compress(&combined)?, frame.payload.len())
        } else {
            (frame.payload.clone(), frame.payload.len())
        };

        let mut metadata = Vec::with_capacity(36 + 4 * frame.bulk.len());
        metadata.put_u32_le(frame.exchange_id);
        metadata.put_u32_le(frame.command_sn);
        metadata.put_u32_le(frame.expected_command_sn);
        metadata.put_u32_le(frame.slot_id);
        metadata.put_u32_le(frame.slot_sn);
        metadata.put_u32_le(frame.current_max_slot_id);
        metadata.put_u32_le(frame.target_max_slot_id);
        metadata.put_u16_le(frame.status);
        metadata.put_u8(opts.compression as u8);
        metadata.put_u8(frame.bulk.len() as u8);
        metadata.put_u32_le(service_len as u32);
        for region in &frame.bulk {
            metadata.put_u32_le(region.len() as u32);
        }
        metadata.put_u32_le(stored_payload.len() as u32);

        let digest_slots = opts.frame_digest.is_enabled() as usize
            + opts.payload_digest.is_enabled() as usize
            + opts.header_digest.is_enabled() as usize;
        let frame_offset = HEADER_SIZE + digest_slots * DIGEST_SIZE;

        let bulk_trailer_len: usize = if opts.compression.is_enabled() {
            0
        } else {
            frame.bulk.iter().map(Vec::len).sum()
        };
        let total_len = frame_offset + metadata.len() + stored_payload.len() + bulk_trailer_len;
        if total_len > MAX_FRAME_LEN {
            return Err(FrameError::FrameTooLarge(total_len));
        }

        dst.reserve(total_len);
        let start = dst.len();

        dst.extend_from_slice(&MAGIC);
        dst.put_u8(frame.frame_type as u8);
        dst.put_u8(frame.version.major);
        dst.put_u8(frame.version.minor);
        dst.put_u8(frame.version.revision);
        dst.put_u8(frame_offset as u8);
        dst.extend_from_slice(&(total_len as u32).to_be_bytes()[1..]); // 3-byte big-endian length

        let frame_digest_offset = dst.len() - start;
        if opts.frame_digest.is_enabled() {
            dst.put_u32_le(0);
        }
        let payload_digest_offset = dst.len() - start;
        if opts.payload_digest.is_enabled() {
            dst.put_u32_le(0);
        }
        let header_digest_offset = dst.len() - start;
        if opts.header_digest.is_enabled() {
            dst.put_u32_le(0);
        }

        debug_assert_eq!(dst.len() - start, frame_offset);
        dst.extend_from_slice(&metadata);
        dst.extend_from_slice(&stored_payload);
        if !opts.compression.is_enabled() {
            for region in &frame.bulk {
                dst.extend_from_slice(region);
            }
        }

        if opts.frame_digest.is_enabled() {
            let digest = opts.frame_digest.compute(&metadata);
            write_u32_le_at(dst, start + frame_digest_offset, digest);
        }
        if opts.payload_digest.is_enabled() {
            let digest = if opts.compression.is_enabled() || !opts.digest_data {
                opts.payload_digest.compute(&stored_payload)
            } else {
                let mut hasher = opts.payload_digest.hasher();
                hasher.update(&stored_payload);
                for region in &frame.bulk {
                    hasher.update(region);
                }
                hasher.finalize()
            };
            write_u32_le_at(dst, start + payload_digest_offset, digest);
        }
        if opts.header_digest.is_enabled() {
            let digest = opts.header_digest.compute(&dst[start..start + header_digest_offset]);
            write_u32_le_at(dst, start + header_digest_offset, digest);
        }

        Ok(())
    }
}

fn write_u32_le_at(buf: &mut BytesMut, offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let opts = self.options;
        let digest_slots =
            opts.frame_digest.is_enabled() as usize + opts.payload_digest.is_enabled() as usize + opts.header_digest.is_enabled() as usize;
        let frame_offset = HEADER_SIZE + digest_slots * DIGEST_SIZE;

        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&src[0..4]);
        if magic != MAGIC {
            return Err(FrameError::InvalidMagic(magic));
        }
        let frame_type = FrameType::from_u8(src[4]).ok_or(FrameError::UnknownFrameType(src[4]))?;
        let version = ProtocolVersion { major: src[5], minor: src[6], revision: src[7] };
        let header_frame_offset = src[8] as usize;
        if header_frame_offset != frame_offset {
            return Err(FrameError::Malformed("frame offset does not match configured digest set"));
        }
        let length = u32::from_be_bytes([0, src[9], src[10], src[11]]) as usize;
        if length > MAX_FRAME_LEN {
            return Err(FrameError::FrameTooLarge(length));
        }
        if src.len() < length {
            return Ok(None);
        }

        let frame_digest_offset = HEADER_SIZE;
        let payload_digest_offset = frame_digest_offset + opts.frame_digest.is_enabled() as usize * DIGEST_SIZE;
        let header_digest_offset = payload_digest_offset + opts.payload_digest.is_enabled() as usize * DIGEST_SIZE;

        if opts.header_digest.is_enabled() {
            let expected = u32::from_le_bytes(src[header_digest_offset..header_digest_offset + 4].try_into().unwrap());
            let computed = opts.header_digest.compute(&src[0..header_digest_offset]);
            if expected != computed {
                return Err(FrameError::BadDigest { which: "header", expected, computed });
            }
        }

        let mut body = &src[frame_offset..length];
        let metadata_start = frame_offset;
        let exchange_id = body.get_u32_le();
        let command_sn = body.get_u32_le();
        let expected_command_sn = body.get_u32_le();
        let slot_id = body.get_u32_le();
        let slot_sn = body.get_u32_le();
        let current_max_slot_id = body.get_u32_le();
        let target_max_slot_id = body.get_u32_le();
        let status = body.get_u16_le();
        let compression_byte = body.get_u8();
        let compression = match compression_byte {
            0 => CompressionAlgorithm::None,
            1 => CompressionAlgorithm::Deflate,
            2 => CompressionAlgorithm::Gzip,
            3 => CompressionAlgorithm::Lz4,
            _ => return Err(FrameError::Malformed("unknown compression byte")),
        };
        let bulk_count = body.get_u8() as usize;
        let service_len = body.get_u32_le() as usize;
        if body.remaining() < bulk_count * 4 + 4 {
            return Err(FrameError::Malformed("truncated frame metadata"));
        }
        let mut bulk_lens = Vec::with_capacity(bulk_count);
        for _ in 0..bulk_count {
            bulk_lens.push(body.get_u32_le() as usize);
        }
        let stored_len = body.get_u32_le() as usize;
        let consumed_metadata = 40 + 4 * bulk_count;
        let metadata_bytes = &src[metadata_start..metadata_start + consumed_metadata];

        if opts.frame_digest.is_enabled() {
            let expected = u32::from_le_bytes(src[frame_digest_offset..frame_digest_offset + 4].try_into().unwrap());
            let computed = opts.frame_digest.compute(metadata_bytes);
            if expected != computed {
                return Err(FrameError::BadDigest { which: "frame", expected, computed });
            }
        }

        let payload_start = metadata_start + consumed_metadata;
        let payload_end = payload_start + stored_len;
        if payload_end > length {
            return Err(FrameError::Malformed("stored payload length overruns frame"));
        }
        let stored_payload = &src[payload_start..payload_end];

        let (service_payload, bulk): (Vec<u8>, Vec<Vec<u8>>) = if compression.is_enabled() {
            let total = service_len + bulk_lens.iter().sum::<usize>();
            let combined = compression.decompress(stored_payload, total)?;
            let mut rest = &combined[..];
            let service = rest[..service_len].to_vec();
            let mut cursor = service_len;
            let mut regions = Vec::with_capacity(bulk_lens.len());
            for len in &bulk_lens {
                regions.push(combined[cursor..cursor + len].to_vec());
                cursor += len;
            }
            let _ = &mut rest;
            (service, regions)
        } else {
            let mut cursor = payload_end;
            let mut regions = Vec::with_capacity(bulk_lens.len());
            for len in &bulk_lens {
                if cursor + len > length {
                    return Err(FrameError::Malformed("bulk region overruns frame"));
                }
                regions.push(src[cursor..cursor + len].to_vec());
                cursor += len;
            }
            if cursor != length {
                return Err(FrameError::Malformed("trailing bytes after bulk regions"));
            }
            (stored_payload.to_vec(), regions)
        };

        if opts.payload_digest.is_enabled() {
            let expected = u32::from_le_bytes(src[payload_digest_offset..payload_digest_offset + 4].try_into().unwrap());
            let computed = if compression.is_enabled() || !opts.digest_data {
                opts.payload_digest.compute(stored_payload)
            } else {
                let mut hasher = opts.payload_digest.hasher();
                hasher.update(stored_payload);
                let bulk_start = payload_end;
                hasher.update(&src[bulk_start..length]);
                hasher.finalize()
            };
            if expected != computed {
                return Err(FrameError::BadDigest { which: "payload", expected, computed });
            }
        }

        let frame = Frame {
            frame_type,
            version,
            exchange_id,
            command_sn,
            expected_command_sn,
            slot_id,
            slot_sn,
            current_max_slot_id,
            target_max_slot_id,
            status,
            payload: service_payload,
            bulk,
        };

        src.advance(length);

        // Ordering contract: the next bytes must start a fresh frame or the
        // buffer must be drained. This catches torn frames immediately
        // instead of silently desyncing on the following decode call.
        if !src.is_empty() {
            if src.len() < 4 {
                // Not enough to check yet; let the next decode call re-check
                // once more bytes arrive. Stash nothing: BytesMut already
                // holds the remainder.
            } else if src[0..4] != MAGIC {
                return Err(FrameError::TornFrame);
            }
        }

        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(options: FrameCodecOptions) -> FrameCodec {
        FrameCodec::new(options)
    }

    #[test]
    fn round_trip_plain() {
        let mut c = codec(FrameCodecOptions::default());
        let frame = Frame::new(FrameType::CommandReq, b"hello world".to_vec())
            .with_exchange(42)
            .with_slot(3, 7);

        let mut buf = BytesMut::new();
        c.encode(frame.clone(), &mut buf).unwrap();
        let decoded = c.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn round_trip_with_all_digests_and_compression() {
        for digest in [crate::digest::DigestAlgorithm::Crc32, crate::digest::DigestAlgorithm::Adler32] {
            for compression in [
                CompressionAlgorithm::None,
                CompressionAlgorithm::Deflate,
                CompressionAlgorithm::Gzip,
                CompressionAlgorithm::Lz4,
            ] {
                for digest_data in [false, true] {
                    let options = FrameCodecOptions {
                        header_digest: digest,
                        frame_digest: digest,
                        payload_digest: digest,
                        digest_data,
                        compression,
                    };
                    let mut c = codec(options);
                    let frame = Frame::new(FrameType::CommandResp, b"payload bytes here".to_vec())
                        .with_exchange(7)
                        .with_bulk(vec![b"bulk-one".to_vec(), b"bulk-region-two".to_vec()]);

                    let mut buf = BytesMut::new();
                    c.encode(frame.clone(), &mut buf).unwrap();
                    let decoded = c.decode(&mut buf).unwrap().unwrap();
                    assert_eq!(decoded, frame, "{digest:?}/{compression:?}/digest_data={digest_data}");
                }
            }
        }
    }

    #[test]
    fn multiple_frames_share_a_buffer() {
        let mut c = codec(FrameCodecOptions::default());
        let mut buf = BytesMut::new();
        for i in 0..3u32 {
            let frame = Frame::new(FrameType::PingReq, vec![]).with_exchange(i);
            c.encode(frame, &mut buf).unwrap();
        }
        for i in 0..3u32 {
            let frame = c.decode(&mut buf).unwrap().unwrap();
            assert_eq!(frame.exchange_id, i);
        }
        assert!(c.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn bit_flip_triggers_bad_digest() {
        let options = FrameCodecOptions {
            payload_digest: crate::digest::DigestAlgorithm::Crc32,
            ..Default::default()
        };
        let mut c = codec(options);
        let frame = Frame::new(FrameType::CommandReq, b"tamper me".to_vec());
        let mut buf = BytesMut::new();
        c.encode(frame, &mut buf).unwrap();

        // Flip a byte inside the payload region (well past the header/metadata).
        let last = buf.len() - 1;
        buf[last] ^= 0xff;

        let err = c.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::BadDigest { which: "payload", .. }));
    }

    #[test]
    fn invalid_magic_is_rejected() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        buf.extend_from_slice(&[0u8; 8]);
        let mut c = codec(FrameCodecOptions::default());
        assert!(matches!(c.decode(&mut buf), Err(FrameError::InvalidMagic(_))));
    }

    #[test]
    fn incomplete_header_needs_more() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&MAGIC);
        let mut c = codec(FrameCodecOptions::default());
        assert!(c.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn torn_frame_is_detected() {
        let mut c = codec(FrameCodecOptions::default());
        let frame = Frame::new(FrameType::PingReq, vec![]);
        let mut buf = BytesMut::new();
        c.encode(frame, &mut buf).unwrap();
        buf.extend_from_slice(b"garbage-not-a-frame");
        assert!(matches!(c.decode(&mut buf), Err(FrameError::TornFrame)));
    }
}
