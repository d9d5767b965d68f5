//! RTSP control protocol, client side (RFC 2326 subset).
//!
//! The client speaks a reduced dialect of RTSP over one persistent TCP
//! connection: every request gets exactly one reply, correlated by the
//! `CSeq` header.
//!
//! ## Request format
//!
//! ```text
//! SETUP movie.Mjpeg RTSP/1.0
//! CSeq: 1
//! Transport: RTP/UDP; client_port= 25000
//! ```
//!
//! Lines are separated by `\n` and no blank line terminates the message,
//! which is what the companion streaming server reads.
//!
//! ## Reply format
//!
//! ```text
//! RTSP/1.0 200 OK
//! CSeq: 1
//! Session: 123456
//! ```
//!
//! ## Supported methods
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | SETUP | §10.4 | Negotiate the client RTP port, obtain a session id |
//! | PLAY | §10.5 | Start media delivery |
//! | PAUSE | §10.6 | Suspend media delivery |
//! | TEARDOWN | §10.7 | Destroy the session |

pub mod request;
pub mod response;

use std::fmt;

pub use request::RtspRequest;
pub use response::{ReplyStatus, RtspReply, split_replies};

/// Protocol version written on every request line.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// The control verbs the client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Setup,
    Play,
    Pause,
    Teardown,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
        }
    }

    /// Inverse of [`as_str`](Self::as_str). Case-sensitive, as RFC 2326 §6.1 requires.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SETUP" => Some(Self::Setup),
            "PLAY" => Some(Self::Play),
            "PAUSE" => Some(Self::Pause),
            "TEARDOWN" => Some(Self::Teardown),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
