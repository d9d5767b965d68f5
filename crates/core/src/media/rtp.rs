use crate::error::{ClientError, Result};

/// Length of the fixed RTP header (RFC 3550 §5.1).
pub const RTP_HEADER_LEN: usize = 12;

/// The only RTP version the client accepts.
pub const RTP_VERSION: u8 = 2;

/// A received RTP packet (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The payload borrows from the receive buffer and always starts right
/// after the fixed header. Padding, extension and CSRC fields are decoded
/// for inspection only; the client does not strip them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaPacket<'a> {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    /// RTP payload type (7-bit, RFC 3551). MJPEG is 26.
    pub payload_type: u8,
    /// 16-bit, wrapping.
    pub sequence_number: u16,
    pub timestamp: u32,
    /// Synchronization source identifier.
    pub ssrc: u32,
    pub payload: &'a [u8],
}

impl<'a> MediaPacket<'a> {
    /// Decode a datagram. Fails only when it is shorter than the fixed header.
    pub fn decode(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < RTP_HEADER_LEN {
            return Err(ClientError::Decode { len: bytes.len() });
        }

        Ok(MediaPacket {
            version: bytes[0] >> 6,
            padding: bytes[0] & 0x20 != 0,
            extension: bytes[0] & 0x10 != 0,
            csrc_count: bytes[0] & 0x0f,
            marker: bytes[1] & 0x80 != 0,
            payload_type: bytes[1] & 0x7f,
            sequence_number: u16::from_be_bytes([bytes[2], bytes[3]]),
            timestamp: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            ssrc: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            payload: &bytes[RTP_HEADER_LEN..],
        })
    }

    /// Serialize back to wire format. Used to build fixtures and by senders.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RTP_HEADER_LEN + self.payload.len());
        out.push(
            (self.version << 6)
                | ((self.padding as u8) << 5)
                | ((self.extension as u8) << 4)
                | (self.csrc_count & 0x0f),
        );
        out.push(((self.marker as u8) << 7) | (self.payload_type & 0x7f));
        out.extend_from_slice(&self.sequence_number.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        out.extend_from_slice(self.payload);
        out
    }
}

/// Builder for well-formed RTP datagrams, used to feed a media channel.
///
/// Version is always 2, the timestamp 0; padding, extension and CSRC count
/// are always 0. The sequence number advances by one per packet and wraps.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    pub ssrc: u32,
    sequence: u16,
}

impl RtpHeader {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        Self {
            pt,
            ssrc,
            sequence: 0,
        }
    }

    /// Start the stream at a specific sequence number.
    pub fn set_sequence(&mut self, sequence: u16) {
        self.sequence = sequence;
    }

    /// Header plus payload as one datagram; advances the sequence number.
    pub fn packet(&mut self, marker: bool, payload: &[u8]) -> Vec<u8> {
        let packet = MediaPacket {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker,
            payload_type: self.pt,
            sequence_number: self.sequence,
            timestamp: 0,
            ssrc: self.ssrc,
            payload,
        };
        self.sequence = self.sequence.wrapping_add(1);
        packet.encode()
    }
}
