use super::rtp::{MediaPacket, RTP_VERSION};

/// Outcome of running one packet through the [`PacketFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// In order and well-typed; the payload should be forwarded.
    Accepted,
    VersionMismatch(u8),
    PayloadTypeMismatch(u8),
    /// Duplicate or out-of-order: `seq` is not above the last accepted one.
    Stale { seq: u16, last: u16 },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Ordering and type filter for inbound media.
///
/// Forwards a packet iff its version is 2, its payload type is the
/// configured one, and its sequence number is strictly greater than the
/// last accepted one. The watermark starts at 0 and only moves forward,
/// so a stream whose sequence numbers wrap stops being accepted at the
/// wrap point until a new filter is created.
#[derive(Debug)]
pub struct PacketFilter {
    payload_type: u8,
    last_accepted: u16,
}

impl PacketFilter {
    pub fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            last_accepted: 0,
        }
    }

    /// Highest sequence number accepted so far (0 before the first packet).
    pub fn last_accepted(&self) -> u16 {
        self.last_accepted
    }

    /// Classify `packet`, advancing the watermark when it is accepted.
    pub fn check(&mut self, packet: &MediaPacket<'_>) -> Verdict {
        if packet.version != RTP_VERSION {
            return Verdict::VersionMismatch(packet.version);
        }
        if packet.payload_type != self.payload_type {
            return Verdict::PayloadTypeMismatch(packet.payload_type);
        }
        if packet.sequence_number <= self.last_accepted {
            return Verdict::Stale {
                seq: packet.sequence_number,
                last: self.last_accepted,
            };
        }
        self.last_accepted = packet.sequence_number;
        Verdict::Accepted
    }
}
