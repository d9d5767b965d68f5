use crate::error::{ClientError, ParseErrorKind};
use crate::protocol::{Method, RTSP_VERSION};

/// An RTSP request (RFC 2326 §6).
///
/// Serializes to the line-oriented text format the server expects:
///
/// ```text
/// PLAY movie.Mjpeg RTSP/1.0
/// CSeq: 2
/// Session: 123456
/// ```
///
/// Uses a builder pattern: start from one of the per-method constructors,
/// optionally chain [`add_header`](Self::add_header), then call
/// [`serialize`](Self::serialize).
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct RtspRequest {
    pub method: Method,
    /// Name of the resource on the server, e.g. `movie.Mjpeg`.
    pub resource: String,
    /// Protocol version (always `RTSP/1.0` when built by the client).
    pub version: String,
    /// Headers as ordered (name, value) pairs.
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    pub fn new(method: Method, resource: &str, cseq: u32) -> Self {
        RtspRequest {
            method,
            resource: resource.to_string(),
            version: RTSP_VERSION.to_string(),
            headers: vec![("CSeq".to_string(), cseq.to_string())],
        }
    }

    /// SETUP announces the local RTP port the server should send to.
    pub fn setup(resource: &str, cseq: u32, client_port: u16) -> Self {
        Self::new(Method::Setup, resource, cseq)
            .add_header("Transport", &format!("RTP/UDP; client_port= {client_port}"))
    }

    /// PLAY, PAUSE and TEARDOWN all echo the server-assigned session id.
    pub fn with_session(method: Method, resource: &str, cseq: u32, session_id: u64) -> Self {
        Self::new(method, resource, cseq).add_header("Session", &session_id.to_string())
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Serialize to the RTSP text wire format, one `\n` between lines.
    pub fn serialize(&self) -> String {
        let mut lines = Vec::with_capacity(self.headers.len() + 1);
        lines.push(format!("{} {} {}", self.method, self.resource, self.version));
        for (name, value) in &self.headers {
            lines.push(format!("{}: {}", name, value));
        }
        lines.join("\n")
    }

    /// Parse a request from its text representation.
    ///
    /// The client never receives requests; this exists so that tools and
    /// test servers can read what the client wrote.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines();

        let request_line = lines.next().ok_or(ClientError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let method = match parts.as_slice() {
            [method, _, _] => Method::from_name(method),
            _ => None,
        }
        .ok_or(ClientError::Parse {
            kind: ParseErrorKind::InvalidStartLine,
        })?;

        let mut headers = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                break;
            }
            let colon_pos = line.find(':').ok_or(ClientError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            headers.push((
                line[..colon_pos].trim().to_string(),
                line[colon_pos + 1..].trim().to_string(),
            ));
        }

        Ok(RtspRequest {
            method,
            resource: parts[1].to_string(),
            version: parts[2].to_string(),
            headers,
        })
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq value as a number, if present and numeric.
    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq")?.parse().ok()
    }

    /// Client RTP port announced in a SETUP `Transport` header.
    pub fn client_port(&self) -> Option<u16> {
        let transport = self.get_header("Transport")?;
        transport
            .split(';')
            .find_map(|part| part.trim().strip_prefix("client_port="))
            .and_then(|port| port.trim().split('-').next())
            .and_then(|port| port.trim().parse().ok())
    }
}
