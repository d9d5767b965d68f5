//! Error types for the RTSP client library.

use std::fmt;

use crate::protocol::Method;
use crate::session::SessionState;

/// Errors that can occur in the RTSP client library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Transport**: [`Io`](Self::Io), [`Connect`](Self::Connect),
///   [`Bind`](Self::Bind), [`NotConnected`](Self::NotConnected).
/// - **Protocol**: [`Parse`](Self::Parse) for malformed replies,
///   [`ReplyMismatch`](Self::ReplyMismatch) for stale or foreign ones.
/// - **Media**: [`Decode`](Self::Decode) for truncated RTP packets.
/// - **Session**: [`InvalidState`](Self::InvalidState),
///   [`RequestPending`](Self::RequestPending).
///
/// Server-reported failures (404, 500) are not errors of the client; they
/// surface as [`Status`](crate::Status) events instead.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The control connection could not be established. Never retried.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The media socket could not be bound to the requested local port.
    #[error("failed to bind media port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// There is no open control connection to send on.
    #[error("control connection not open")]
    NotConnected,

    /// Failed to parse an RTSP message.
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// A reply echoed a sequence number or session id other than ours.
    #[error("reply {field} mismatch: expected {expected}, got {actual}")]
    ReplyMismatch {
        field: &'static str,
        expected: u64,
        actual: u64,
    },

    /// Media datagram shorter than the fixed RTP header.
    #[error("media packet too short: {len} bytes")]
    Decode { len: usize },

    /// The command is not valid in the current session state. Nothing was sent.
    #[error("{method} not allowed in state {state:?}")]
    InvalidState { method: Method, state: SessionState },

    /// Another request is still waiting for its reply.
    #[error("{0} request still pending")]
    RequestPending(Method),
}

/// Specific kind of RTSP message parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Request or status line did not have three space-separated fields.
    InvalidStartLine,
    /// A required header was absent.
    MissingHeader(&'static str),
    /// A header line was malformed or carried a non-numeric value.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidStartLine => write!(f, "invalid start line"),
            Self::MissingHeader(name) => write!(f, "missing {name} header"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Convenience alias for `Result<T, ClientError>`.
pub type Result<T> = std::result::Result<T, ClientError>;
