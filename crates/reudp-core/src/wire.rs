//! # Packet Wire Format
//!
//! Every datagram (after integrity unwrapping, see [`crate::integrity`])
//! starts with a fixed 6-byte header:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |    Reserved   |        Transfer Id (32)      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! followed by a kind-specific payload, all multi-byte fields big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::seqcodec;

/// Header size shared by every packet kind: type (1) + reserved (1) + id (4).
pub const HEADER_LEN: usize = 6;

/// Packet type tags, as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Psh = 0x01,
    Req = 0x02,
    Fin = 0x03,
    Ack = 0x04,
    Err = 0x05,
}

impl PacketType {
    fn from_u8(b: u8) -> Result<Self, WireError> {
        match b {
            0x01 => Ok(PacketType::Psh),
            0x02 => Ok(PacketType::Req),
            0x03 => Ok(PacketType::Fin),
            0x04 => Ok(PacketType::Ack),
            0x05 => Ok(PacketType::Err),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

/// The kind an [`Packet::Ack`] acknowledges. Only `Fin` is produced by this
/// implementation, but the field is carried on the wire so a future kind
/// could be acknowledged without a format change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckedKind {
    Fin = PacketType::Fin as isize,
}

impl AckedKind {
    fn from_u8(b: u8) -> Result<Self, WireError> {
        match b {
            x if x == PacketType::Fin as u8 => Ok(AckedKind::Fin),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

/// Reason codes carried by an [`Packet::Err`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrCode {
    /// The referenced transfer id is unknown to the receiver (it expired,
    /// was never seen, or was already delivered and recycled).
    IdNotFound = 0x0000,
}

impl ErrCode {
    fn from_u16(_code: u16) -> Self {
        // 0x0000 is the only defined code; any other value still means
        // "nothing useful to do with this id", so fold it in rather than
        // failing decode outright.
        ErrCode::IdNotFound
    }
}

/// A fully decoded packet, one variant per wire [`PacketType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A data fragment.
    Psh {
        id: u32,
        /// Position of this fragment within the transfer.
        seq: u16,
        /// The sender's current pacing-window hint (not authoritative;
        /// `total_count` is the one the receiver trusts for sizing).
        single_total: u16,
        /// Total number of fragments in the transfer.
        total_count: u16,
        payload: Bytes,
    },
    /// A request to retransmit the run-encoded sequence list `seqs`
    /// (already deflated back into individual sequence numbers via
    /// [`seqcodec::unzip`]).
    Req { id: u32, seqs: Vec<u16> },
    /// End-of-transfer notice: every fragment has been sent.
    Fin { id: u32 },
    /// Acknowledges a prior packet, identified by `acked`.
    Ack { id: u32, acked: AckedKind },
    /// Reports a condition the sender or receiver cannot satisfy.
    Err { id: u32, code: ErrCode },
}

impl Packet {
    pub fn id(&self) -> u32 {
        match self {
            Packet::Psh { id, .. }
            | Packet::Req { id, .. }
            | Packet::Fin { id }
            | Packet::Ack { id, .. }
            | Packet::Err { id, .. } => *id,
        }
    }

    /// Convenience constructor for the FIN acknowledgement this
    /// implementation actually sends.
    pub fn ack_fin(id: u32) -> Self {
        Packet::Ack {
            id,
            acked: AckedKind::Fin,
        }
    }

    fn packet_type(&self) -> PacketType {
        match self {
            Packet::Psh { .. } => PacketType::Psh,
            Packet::Req { .. } => PacketType::Req,
            Packet::Fin { .. } => PacketType::Fin,
            Packet::Ack { .. } => PacketType::Ack,
            Packet::Err { .. } => PacketType::Err,
        }
    }

    fn encode_header(&self, buf: &mut BytesMut) {
        buf.put_u8(self.packet_type() as u8);
        buf.put_u8(0); // reserved
        buf.put_u32(self.id());
    }

    /// Encode this packet to its wire form. The result is handed to
    /// [`crate::integrity::generate`] before it goes on the socket.
    pub fn encode(&self) -> Bytes {
        match self {
            Packet::Psh {
                seq,
                single_total,
                total_count,
                payload,
                ..
            } => {
                let mut buf = BytesMut::with_capacity(HEADER_LEN + 6 + payload.len());
                self.encode_header(&mut buf);
                buf.put_u16(*seq);
                buf.put_u16(*single_total);
                buf.put_u16(*total_count);
                buf.extend_from_slice(payload);
                buf.freeze()
            }
            Packet::Req { seqs, .. } => {
                let mut buf = BytesMut::with_capacity(HEADER_LEN + seqs.len() * 2);
                self.encode_header(&mut buf);
                // zip() only fails on values with the reserved high bit
                // set, which cannot occur for sequence numbers produced
                // internally (they're always < 0x8000).
                let zipped = seqcodec::zip(seqs).unwrap_or_default();
                for s in zipped {
                    buf.put_u16(s);
                }
                buf.freeze()
            }
            Packet::Fin { .. } => {
                let mut buf = BytesMut::with_capacity(HEADER_LEN);
                self.encode_header(&mut buf);
                buf.freeze()
            }
            Packet::Ack { acked, .. } => {
                let mut buf = BytesMut::with_capacity(HEADER_LEN + 1);
                self.encode_header(&mut buf);
                buf.put_u8(*acked as u8);
                buf.freeze()
            }
            Packet::Err { code, .. } => {
                let mut buf = BytesMut::with_capacity(HEADER_LEN + 2);
                self.encode_header(&mut buf);
                buf.put_u16(*code as u16);
                buf.freeze()
            }
        }
    }

    /// Decode a packet from its unwrapped wire form (after integrity
    /// verification has already stripped the checksum prefix and reversed
    /// the XOR obfuscation).
    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::Truncated(buf.len()));
        }
        let kind = PacketType::from_u8(buf.get_u8())?;
        let _reserved = buf.get_u8();
        let id = buf.get_u32();

        match kind {
            PacketType::Psh => {
                if buf.remaining() < 6 {
                    return Err(WireError::Truncated(buf.remaining()));
                }
                let seq = buf.get_u16();
                let single_total = buf.get_u16();
                let total_count = buf.get_u16();
                let payload = Bytes::copy_from_slice(buf.chunk());
                Ok(Packet::Psh {
                    id,
                    seq,
                    single_total,
                    total_count,
                    payload,
                })
            }
            PacketType::Req => {
                if buf.remaining() % 2 != 0 {
                    return Err(WireError::MalformedReqPayload(buf.remaining()));
                }
                let mut seqs = Vec::with_capacity(buf.remaining() / 2);
                while buf.has_remaining() {
                    seqs.push(buf.get_u16());
                }
                Ok(Packet::Req {
                    id,
                    seqs: seqcodec::unzip(&seqs),
                })
            }
            PacketType::Fin => Ok(Packet::Fin { id }),
            PacketType::Ack => {
                if !buf.has_remaining() {
                    return Err(WireError::MalformedAckPayload);
                }
                Ok(Packet::Ack {
                    id,
                    acked: AckedKind::from_u8(buf.get_u8())?,
                })
            }
            PacketType::Err => {
                if buf.remaining() < 2 {
                    return Err(WireError::MalformedErrPayload);
                }
                Ok(Packet::Err {
                    id,
                    code: ErrCode::from_u16(buf.get_u16()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psh_roundtrip() {
        let pkt = Packet::Psh {
            id: 42,
            seq: 7,
            single_total: 92,
            total_count: 150,
            payload: Bytes::from_static(b"fragment data"),
        };
        let encoded = pkt.encode();
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(pkt, decoded);
    }

    #[test]
    fn req_roundtrip_zips_on_encode() {
        let pkt = Packet::Req {
            id: 1,
            seqs: vec![1, 2, 3, 10],
        };
        let encoded = pkt.encode();
        // zip() collapses the [1,2,3] run to a marked pair, so the wire
        // form is shorter than 4 raw u16s.
        assert_eq!(encoded.len(), HEADER_LEN + 3 * 2);
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn fin_roundtrip() {
        let pkt = Packet::Fin { id: 99 };
        assert_eq!(Packet::decode(&pkt.encode()).unwrap(), pkt);
    }

    #[test]
    fn ack_fin_roundtrip() {
        let pkt = Packet::ack_fin(99);
        assert_eq!(Packet::decode(&pkt.encode()).unwrap(), pkt);
    }

    #[test]
    fn err_roundtrip() {
        let pkt = Packet::Err {
            id: 5,
            code: ErrCode::IdNotFound,
        };
        assert_eq!(Packet::decode(&pkt.encode()).unwrap(), pkt);
    }

    #[test]
    fn decode_rejects_truncated_header() {
        assert_eq!(
            Packet::decode(&[0x01, 0x00, 0x00]),
            Err(WireError::Truncated(3))
        );
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let buf = [0xFF, 0x00, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(Packet::decode(&buf), Err(WireError::UnknownType(0xFF)));
    }

    #[test]
    fn decode_rejects_odd_req_payload() {
        let buf = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01, 0xAB];
        assert_eq!(
            Packet::decode(&buf),
            Err(WireError::MalformedReqPayload(1))
        );
    }

    #[test]
    fn psh_with_empty_payload_decodes() {
        let pkt = Packet::Psh {
            id: 0,
            seq: 0,
            single_total: 1,
            total_count: 1,
            payload: Bytes::new(),
        };
        assert_eq!(Packet::decode(&pkt.encode()).unwrap(), pkt);
    }

    #[test]
    fn req_with_no_sequences_roundtrips_empty() {
        let pkt = Packet::Req { id: 3, seqs: vec![] };
        let encoded = pkt.encode();
        assert_eq!(encoded.len(), HEADER_LEN);
        assert_eq!(Packet::decode(&encoded).unwrap(), pkt);
    }
}
