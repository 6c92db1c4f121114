use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::checksum::internet_checksum;

/// Marker carried by every data segment.
pub const DATA_MARKER: u16 = 0x5555;
/// Marker carried by every acknowledgement.
pub const ACK_MARKER: u16 = 0xAAAA;
/// Sequence number (4) + checksum (2) + marker (2).
pub const HEADER_LEN: usize = 8;

/// Why a datagram was rejected by the codec.
///
/// Every variant is treated like loss by the protocol: the datagram is dropped
/// and never acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CorruptPacket {
    #[error("datagram of {len} bytes is shorter than the segment header")]
    Truncated { len: usize },
    #[error("unknown segment marker {0:#06x}")]
    UnknownMarker(u16),
    #[error("expected {expected:?} segment, found {found:?}")]
    WrongKind {
        expected: SegmentKind,
        found: SegmentKind,
    },
    #[error("checksum mismatch for seq {seq}: header {header:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { seq: u32, header: u16, computed: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Data,
    Ack,
}

impl SegmentKind {
    pub fn marker(self) -> u16 {
        match self {
            SegmentKind::Data => DATA_MARKER,
            SegmentKind::Ack => ACK_MARKER,
        }
    }

    fn from_marker(marker: u16) -> Result<Self, CorruptPacket> {
        match marker {
            DATA_MARKER => Ok(SegmentKind::Data),
            ACK_MARKER => Ok(SegmentKind::Ack),
            other => Err(CorruptPacket::UnknownMarker(other)),
        }
    }
}

/// The fixed 8-byte header shared by both segment kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub seq: u32,
    /// Payload checksum for data segments, zero for ACKs.
    pub checksum: u16,
    pub marker: u16,
}

impl Header {
    pub fn parse(mut buf: &[u8]) -> Result<Self, CorruptPacket> {
        if buf.len() < HEADER_LEN {
            return Err(CorruptPacket::Truncated { len: buf.len() });
        }
        Ok(Self {
            seq: buf.get_u32(),
            checksum: buf.get_u16(),
            marker: buf.get_u16(),
        })
    }

    fn write(&self, out: &mut BytesMut) {
        out.put_u32(self.seq);
        out.put_u16(self.checksum);
        out.put_u16(self.marker);
    }
}

/// Classify a datagram by its marker without validating the rest.
pub fn classify(datagram: &[u8]) -> Result<SegmentKind, CorruptPacket> {
    let header = Header::parse(datagram)?;
    SegmentKind::from_marker(header.marker)
}

/// Sequence number of a datagram, if it is long enough to carry one.
///
/// Used for loss reporting, where the packet has not been validated yet.
pub fn peek_seq(datagram: &[u8]) -> Option<u32> {
    Header::parse(datagram).ok().map(|h| h.seq)
}

/// A framed file segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
    pub seq: u32,
    pub checksum: u16,
    pub payload: Bytes,
}

impl DataSegment {
    pub fn new(seq: u32, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            seq,
            checksum: internet_checksum(&payload),
            payload,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        Header {
            seq: self.seq,
            checksum: self.checksum,
            marker: DATA_MARKER,
        }
        .write(&mut out);
        out.put_slice(&self.payload);
        out.freeze()
    }

    /// Parse and validate a data segment.
    pub fn decode(datagram: &[u8]) -> Result<Self, CorruptPacket> {
        let header = Header::parse(datagram)?;
        expect_kind(header.marker, SegmentKind::Data)?;

        let payload = &datagram[HEADER_LEN..];
        let computed = internet_checksum(payload);
        if computed != header.checksum {
            return Err(CorruptPacket::ChecksumMismatch {
                seq: header.seq,
                header: header.checksum,
                computed,
            });
        }

        Ok(Self {
            seq: header.seq,
            checksum: header.checksum,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

/// A cumulative acknowledgement: every segment up to and including `seq`
/// has been received in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckSegment {
    pub seq: u32,
}

impl AckSegment {
    pub fn new(seq: u32) -> Self {
        Self { seq }
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_LEN);
        Header {
            seq: self.seq,
            checksum: 0,
            marker: ACK_MARKER,
        }
        .write(&mut out);
        out.freeze()
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, CorruptPacket> {
        let header = Header::parse(datagram)?;
        expect_kind(header.marker, SegmentKind::Ack)?;
        Ok(Self { seq: header.seq })
    }
}

fn expect_kind(marker: u16, expected: SegmentKind) -> Result<(), CorruptPacket> {
    let found = SegmentKind::from_marker(marker)?;
    if found != expected {
        return Err(CorruptPacket::WrongKind { expected, found });
    }
    Ok(())
}

pub fn encode_data(seq: u32, payload: &[u8]) -> Bytes {
    DataSegment::new(seq, Bytes::copy_from_slice(payload)).encode()
}

pub fn decode_data(datagram: &[u8]) -> Result<(u32, Bytes), CorruptPacket> {
    DataSegment::decode(datagram).map(|segment| (segment.seq, segment.payload))
}

pub fn encode_ack(seq: u32) -> Bytes {
    AckSegment::new(seq).encode()
}

pub fn decode_ack(datagram: &[u8]) -> Result<u32, CorruptPacket> {
    AckSegment::decode(datagram).map(|ack| ack.seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_header_layout_is_network_order() {
        let bytes = encode_data(0x0102_0304, b"hi");
        assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(
            u16::from_be_bytes([bytes[4], bytes[5]]),
            internet_checksum(b"hi")
        );
        assert_eq!(&bytes[6..8], &[0x55, 0x55]);
        assert_eq!(&bytes[8..], b"hi");
    }

    #[test]
    fn ack_has_zero_field_and_no_payload() {
        let bytes = encode_ack(7);
        assert_eq!(bytes.as_ref(), &[0, 0, 0, 7, 0, 0, 0xAA, 0xAA]);
        assert_eq!(decode_ack(&bytes), Ok(7));
    }

    #[test]
    fn decode_data_returns_payload() {
        let bytes = encode_data(42, b"payload bytes");
        let (seq, payload) = decode_data(&bytes).unwrap();
        assert_eq!(seq, 42);
        assert_eq!(payload.as_ref(), b"payload bytes");
    }

    #[test]
    fn empty_payload_is_valid() {
        let bytes = encode_data(3, &[]);
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(decode_data(&bytes).unwrap().1.len(), 0);
    }

    #[test]
    fn short_datagram_is_truncated() {
        assert_eq!(
            decode_data(&[0, 0, 0, 1, 0]),
            Err(CorruptPacket::Truncated { len: 5 })
        );
        assert_eq!(decode_ack(&[]), Err(CorruptPacket::Truncated { len: 0 }));
    }

    #[test]
    fn flipped_payload_bit_fails_checksum() {
        let mut bytes = encode_data(9, b"abcdef").to_vec();
        bytes[HEADER_LEN + 2] ^= 0x10;
        assert!(matches!(
            decode_data(&bytes),
            Err(CorruptPacket::ChecksumMismatch { seq: 9, .. })
        ));
    }

    #[test]
    fn ack_is_not_accepted_as_data() {
        let ack = encode_ack(1);
        assert_eq!(
            decode_data(&ack),
            Err(CorruptPacket::WrongKind {
                expected: SegmentKind::Data,
                found: SegmentKind::Ack
            })
        );
        let data = encode_data(1, b"x");
        assert!(matches!(
            decode_ack(&data),
            Err(CorruptPacket::WrongKind { .. })
        ));
    }

    #[test]
    fn unknown_marker_is_rejected() {
        let mut bytes = encode_data(1, b"x").to_vec();
        bytes[6] = 0x12;
        assert_eq!(classify(&bytes), Err(CorruptPacket::UnknownMarker(0x1255)));
        assert!(matches!(
            decode_data(&bytes),
            Err(CorruptPacket::UnknownMarker(_))
        ));
    }

    #[test]
    fn classify_by_marker() {
        assert_eq!(classify(&encode_data(0, b"abc")), Ok(SegmentKind::Data));
        assert_eq!(classify(&encode_ack(0)), Ok(SegmentKind::Ack));
    }

    #[test]
    fn ack_zero_field_is_not_validated() {
        let mut bytes = encode_ack(5).to_vec();
        bytes[4] = 0xFF;
        assert_eq!(decode_ack(&bytes), Ok(5));
    }

    #[test]
    fn peek_seq_ignores_validity() {
        let mut bytes = encode_data(77, b"zz").to_vec();
        bytes[HEADER_LEN] ^= 1;
        assert_eq!(peek_seq(&bytes), Some(77));
        assert_eq!(peek_seq(&bytes[..3]), None);
    }
}
