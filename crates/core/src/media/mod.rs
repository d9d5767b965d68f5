//! Media reception: RTP decoding and the inbound discard policy.
//!
//! ## RTP overview (RFC 3550)
//!
//! The server sends one JPEG frame per RTP packet. Every packet carries a
//! 12-byte fixed header ([`rtp::MediaPacket`]) containing:
//!
//! - **Version**: always 2.
//! - **Payload type**: 26 for MJPEG (RFC 3551).
//! - **Sequence number** (16-bit, wrapping): used here to drop duplicates
//!   and late packets.
//! - **Timestamp** (32-bit) and **SSRC** (32-bit): passed through.
//!
//! [`filter::PacketFilter`] decides which packets reach the
//! [`FrameSink`](crate::sink::FrameSink).

pub mod filter;
pub mod rtp;

pub use filter::{PacketFilter, Verdict};
pub use rtp::{MediaPacket, RTP_HEADER_LEN, RTP_VERSION, RtpHeader};

/// Static RTP payload type for JPEG video (RFC 3551 §6).
pub const PAYLOAD_TYPE_JPEG: u8 = 26;
