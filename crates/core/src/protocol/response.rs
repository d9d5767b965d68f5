use crate::error::{ClientError, ParseErrorKind};

/// A parsed RTSP reply (RFC 2326 §7).
///
/// ```text
/// RTSP/1.0 200 OK
/// CSeq: 1
/// Session: 123456
/// ```
///
/// `CSeq` is mandatory since it is the only way to correlate a reply with
/// the request that caused it. `Session` is optional at the parse level;
/// whether it must be present is decided by the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspReply {
    /// Protocol version from the status line.
    pub version: String,
    pub status_code: u16,
    pub reason: String,
    /// Echoed request sequence number (RFC 2326 §12.17).
    pub cseq: u32,
    /// Echoed session id, with any `;timeout=` suffix removed.
    pub session: Option<u64>,
    /// All headers as received, in order.
    pub headers: Vec<(String, String)>,
}

/// Classification of the status codes the client acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// 200 OK.
    Ok,
    /// 404 Not Found: the requested resource does not exist.
    NotFound,
    /// 500 Internal Server Error.
    ServerError,
    /// Anything else; ignored by the client.
    Other(u16),
}

impl From<u16> for ReplyStatus {
    fn from(code: u16) -> Self {
        match code {
            200 => Self::Ok,
            404 => Self::NotFound,
            500 => Self::ServerError,
            other => Self::Other(other),
        }
    }
}

impl RtspReply {
    /// Parse one reply from its text representation.
    ///
    /// Accepts both `\n` and `\r\n` line endings; parsing stops at the
    /// first blank line.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines().skip_while(|line| line.trim().is_empty());

        let status_line = lines.next().ok_or(ClientError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let mut parts = status_line.trim().splitn(3, ' ');
        let (version, code) = match (parts.next(), parts.next()) {
            (Some(version), Some(code)) if version.starts_with("RTSP/") => (version, code),
            _ => {
                return Err(ClientError::Parse {
                    kind: ParseErrorKind::InvalidStartLine,
                });
            }
        };
        let status_code: u16 = code.parse().map_err(|_| ClientError::Parse {
            kind: ParseErrorKind::InvalidStartLine,
        })?;
        let reason = parts.next().unwrap_or("").trim().to_string();

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

        let cseq = find_header(&headers, "CSeq")
            .ok_or(ClientError::Parse {
                kind: ParseErrorKind::MissingHeader("CSeq"),
            })?
            .parse()
            .map_err(|_| ClientError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;

        let session = match find_header(&headers, "Session") {
            Some(value) => Some(
                value
                    .split(';')
                    .next()
                    .unwrap_or(value)
                    .trim()
                    .parse()
                    .map_err(|_| ClientError::Parse {
                        kind: ParseErrorKind::InvalidHeader,
                    })?,
            ),
            None => None,
        };

        Ok(RtspReply {
            version: version.to_string(),
            status_code,
            reason,
            cseq,
            session,
            headers,
        })
    }

    pub fn status(&self) -> ReplyStatus {
        ReplyStatus::from(self.status_code)
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Split one chunk read from the control socket into individual replies.
///
/// Replies carry no length or terminator, so two replies written back to
/// back can arrive in a single read. Each line starting with `RTSP/` opens
/// a new reply. Text before the first status line is returned as its own
/// chunk so the parser can reject it.
pub fn split_replies(text: &str) -> Vec<&str> {
    let mut starts = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with("RTSP/") {
            starts.push(offset);
        }
        offset += line.len();
    }

    let mut chunks = Vec::with_capacity(starts.len() + 1);
    let first = starts.first().copied().unwrap_or(text.len());
    if !text[..first].trim().is_empty() {
        chunks.push(&text[..first]);
    }
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        chunks.push(&text[start..end]);
    }
    chunks
}
