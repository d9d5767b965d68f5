use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use super::{ChannelHandle, Signal};
use crate::error::{ClientError, Result};
use crate::protocol::{Method, RtspReply, RtspRequest, split_replies};

/// Size of one read from the control socket. Replies are a few lines long.
const RECV_BUFFER_SIZE: usize = 4096;

/// What the control listener hands to its owner.
#[derive(Debug)]
pub enum ControlEvent {
    /// A well-formed reply echoing the CSeq of the request in flight.
    Reply(RtspReply),
    /// The server closed the connection. The listener exits afterwards.
    Closed,
}

/// The owner's verdict on a [`ControlEvent::Reply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Reply rejected; keep waiting for the real one.
    Continue,
    /// Reply consumed; the listener disables itself until the next request.
    Release,
}

/// The request the listener is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub cseq: u32,
    pub method: Method,
}

/// The persistent RTSP control connection and its reply listener.
///
/// The listener is spawned with the connection but stays parked until
/// [`send`](Self::send) arms it. It reads with a bounded timeout so a stop
/// request is observed promptly, drops anything that does not parse or does
/// not echo the awaited CSeq, and passes the rest to the owner's handler.
/// Receive failures are never fatal to the listener.
pub struct ControlChannel {
    handle: ChannelHandle<TcpStream, Pending>,
    peer_addr: SocketAddr,
}

impl ControlChannel {
    /// Connect to `addr` (`host:port`) and start the parked listener.
    ///
    /// Fails with [`ClientError::Connect`] on refusal or timeout.
    pub fn open<F>(
        addr: &str,
        connect_timeout: Duration,
        recv_timeout: Duration,
        handler: F,
    ) -> Result<Self>
    where
        F: FnMut(ControlEvent) -> Disposition + Send + 'static,
    {
        let stream = connect(addr, connect_timeout)?;
        stream.set_read_timeout(Some(recv_timeout))?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        let reader = stream.try_clone()?;

        let handle = ChannelHandle::spawn("rtsp-control", stream, move |signal| {
            listen(reader, signal, handler);
        })?;

        tracing::info!(%peer_addr, "control connection established");

        Ok(Self { handle, peer_addr })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open() && !self.handle.signal().is_stopped()
    }

    /// Whether the listener is armed, i.e. a reply is awaited.
    pub fn is_listening(&self) -> bool {
        self.handle.signal().is_enabled()
    }

    /// Write `request`, then arm the listener for its CSeq.
    ///
    /// Only one request may be in flight; a second one is refused with
    /// [`ClientError::RequestPending`].
    pub fn send(&mut self, request: &RtspRequest) -> Result<()> {
        if let Some(pending) = self.handle.signal().ticket() {
            return Err(ClientError::RequestPending(pending.method));
        }
        let cseq = request.cseq().ok_or(ClientError::Parse {
            kind: crate::error::ParseErrorKind::MissingHeader("CSeq"),
        })?;
        let mut stream = match self.handle.socket() {
            Some(stream) if !self.handle.signal().is_stopped() => stream,
            _ => return Err(ClientError::NotConnected),
        };

        stream.write_all(request.serialize().as_bytes())?;
        stream.flush()?;

        tracing::debug!(method = %request.method, cseq, peer = %self.peer_addr, "request sent");

        self.handle.signal().arm(Pending {
            cseq,
            method: request.method,
        });
        Ok(())
    }

    /// Disarm the listener if it still awaits the reply to `cseq`.
    ///
    /// Lets the owner free the request slot at the moment it settles the
    /// reply, before the handler has returned. Returns whether it did.
    pub fn release(&self, cseq: u32, method: Method) -> bool {
        self.handle.signal().release(Pending { cseq, method })
    }

    /// Stop and join the listener, then close the connection.
    ///
    /// Safe to call more than once and from inside the handler.
    pub fn close(&mut self) {
        if let Some(stream) = self.handle.close() {
            let _ = stream.shutdown(Shutdown::Both);
            tracing::info!(peer = %self.peer_addr, "control connection closed");
        }
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let connect_error = |source: io::Error| ClientError::Connect {
        addr: addr.to_string(),
        source,
    };

    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing");
    for candidate in addr.to_socket_addrs().map_err(connect_error)? {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!(%candidate, error = %e, "connect attempt failed");
                last_error = e;
            }
        }
    }
    Err(connect_error(last_error))
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

/// Whether `chunk` is the start of a reply that may still be arriving.
///
/// Replies have no terminator, so the tail of a read that opens with a
/// status line (or a prefix of one) but does not parse yet is kept.
fn is_unfinished(chunk: &str) -> bool {
    let chunk = chunk.trim_start();
    !chunk.is_empty()
        && chunk.len() < RECV_BUFFER_SIZE
        && (chunk.starts_with("RTSP/") || "RTSP/".starts_with(chunk))
}

/// Control listener loop.
///
/// Parks while disabled; exits once stopped or when the server hangs up.
fn listen<F>(mut stream: TcpStream, signal: Arc<Signal<Pending>>, mut handler: F)
where
    F: FnMut(ControlEvent) -> Disposition,
{
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut partial = String::new();

    while signal.wait_enabled() {
        let len = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(len) => len,
            Err(e) if is_timeout(&e) => continue,
            Err(e) if is_disconnect(&e) => {
                tracing::debug!(error = %e, "control connection dropped");
                break;
            }
            Err(e) => {
                tracing::debug!(error = %e, "control receive failed");
                continue;
            }
        };

        partial.push_str(&String::from_utf8_lossy(&buf[..len]));
        let text = std::mem::take(&mut partial);
        let chunks = split_replies(&text);
        let last = chunks.len().saturating_sub(1);

        for (i, raw) in chunks.into_iter().enumerate() {
            match RtspReply::parse(raw) {
                Ok(reply) => dispatch(reply, &signal, &mut handler),
                Err(e) if i == last && is_unfinished(raw) => {
                    tracing::trace!(error = %e, bytes = raw.len(), "incomplete reply kept");
                    partial = raw.to_string();
                }
                Err(e) => tracing::debug!(error = %e, "malformed reply dropped"),
            }
        }
    }

    if !signal.is_stopped() {
        tracing::warn!("control connection closed by server");
        signal.stop();
        handler(ControlEvent::Closed);
    }
    tracing::trace!("control listener exited");
}

fn dispatch<F>(reply: RtspReply, signal: &Signal<Pending>, handler: &mut F)
where
    F: FnMut(ControlEvent) -> Disposition,
{
    let pending = match signal.ticket() {
        Some(pending) if pending.cseq == reply.cseq => pending,
        other => {
            tracing::debug!(
                cseq = reply.cseq,
                expected = ?other.map(|p| p.cseq),
                "reply with unexpected CSeq dropped"
            );
            return;
        }
    };

    tracing::debug!(
        cseq = reply.cseq,
        status = reply.status_code,
        session = ?reply.session,
        "reply received"
    );

    if handler(ControlEvent::Reply(reply)) == Disposition::Release {
        signal.release(pending);
    }
}
