use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use super::{ChannelHandle, Signal};
use crate::error::{ClientError, Result};
use crate::media::{MediaPacket, PacketFilter, Verdict};
use crate::sink::FrameSink;

/// Maximum UDP datagram size we'll receive.
const MAX_DATAGRAM_SIZE: usize = 65536;

/// Result of one listener iteration. Logged, never propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Payload handed to the sink.
    Forwarded(u16),
    /// Decoded but discarded by the filter.
    Rejected(Verdict),
    /// Shorter than an RTP header; carries the datagram length.
    Malformed(usize),
    /// Nothing arrived before the receive timeout, or the receive failed.
    Idle,
}

/// Snapshot of a media channel's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaStats {
    pub forwarded: u64,
    pub rejected: u64,
    pub malformed: u64,
    /// Highest accepted sequence number (0 before the first frame).
    pub last_sequence: u16,
}

#[derive(Debug, Default)]
struct Counters {
    forwarded: AtomicU64,
    rejected: AtomicU64,
    malformed: AtomicU64,
    last_sequence: AtomicU32,
}

impl Counters {
    fn snapshot(&self) -> MediaStats {
        MediaStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            last_sequence: self.last_sequence.load(Ordering::Relaxed) as u16,
        }
    }
}

/// Per-listener media state: decode, filter, forward.
///
/// Separate from the socket so the discard policy can be driven directly.
pub struct MediaReceiver {
    filter: PacketFilter,
    sink: Arc<FrameSink>,
    counters: Arc<Counters>,
}

impl MediaReceiver {
    pub fn new(payload_type: u8, sink: Arc<FrameSink>) -> Self {
        Self {
            filter: PacketFilter::new(payload_type),
            sink,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn stats(&self) -> MediaStats {
        self.counters.snapshot()
    }

    /// Run one datagram through decode and the discard policy.
    pub fn handle_datagram(&mut self, bytes: &[u8]) -> Delivery {
        let packet = match MediaPacket::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::trace!(error = %e, "malformed media packet dropped");
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                return Delivery::Malformed(bytes.len());
            }
        };

        match self.filter.check(&packet) {
            Verdict::Accepted => {
                let seq = packet.sequence_number;
                self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .last_sequence
                    .store(u32::from(seq), Ordering::Relaxed);
                self.sink.on_frame(seq, packet.timestamp, packet.payload);
                Delivery::Forwarded(seq)
            }
            verdict => {
                tracing::trace!(seq = packet.sequence_number, ?verdict, "media packet dropped");
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Delivery::Rejected(verdict)
            }
        }
    }

    /// Wait up to the socket timeout for one datagram and handle it.
    fn poll(&mut self, socket: &UdpSocket, buf: &mut [u8]) -> Delivery {
        match socket.recv_from(buf) {
            Ok((len, _)) => self.handle_datagram(&buf[..len]),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Delivery::Idle
            }
            Err(e) => {
                tracing::debug!(error = %e, "media receive failed");
                Delivery::Idle
            }
        }
    }

    fn run(mut self, socket: UdpSocket, signal: Arc<Signal>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        while signal.wait_enabled() {
            self.poll(&socket, &mut buf);
        }
        tracing::trace!("media listener exited");
    }
}

/// The RTP receive socket and its listener.
///
/// The socket is bound with a bounded receive timeout so the listener sees
/// pause and stop promptly. The same listener thread lives from SETUP to
/// TEARDOWN; PLAY and PAUSE only enable and disable it.
pub struct MediaChannel {
    handle: ChannelHandle<UdpSocket>,
    local_addr: SocketAddr,
    counters: Arc<Counters>,
}

impl MediaChannel {
    /// Bind `0.0.0.0:port` (0 picks an ephemeral port) and start the parked listener.
    pub fn open(
        port: u16,
        recv_timeout: Duration,
        payload_type: u8,
        sink: Arc<FrameSink>,
    ) -> Result<Self> {
        let socket =
            UdpSocket::bind(("0.0.0.0", port)).map_err(|source| ClientError::Bind { port, source })?;
        socket.set_read_timeout(Some(recv_timeout))?;
        let local_addr = socket.local_addr()?;
        let reader = socket.try_clone()?;

        let receiver = MediaReceiver::new(payload_type, sink);
        let counters = receiver.counters.clone();
        let handle = ChannelHandle::spawn("rtp-media", socket, move |signal| {
            receiver.run(reader, signal);
        })?;

        tracing::info!(%local_addr, payload_type, "media channel opened");

        Ok(Self {
            handle,
            local_addr,
            counters,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Let the listener receive.
    pub fn start(&self) {
        self.handle.signal().enable();
        tracing::debug!(port = self.local_port(), "media listener enabled");
    }

    /// Park the listener. The socket and thread stay alive.
    pub fn pause(&self) {
        self.handle.signal().disable();
        tracing::debug!(port = self.local_port(), "media listener disabled");
    }

    pub fn is_active(&self) -> bool {
        self.handle.signal().is_enabled()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    pub fn stats(&self) -> MediaStats {
        self.counters.snapshot()
    }

    /// Disable, stop and join the listener, then drop the socket.
    ///
    /// Completes within one receive timeout even if a receive is in flight.
    pub fn close(&mut self) {
        self.handle.signal().disable();
        if self.handle.close().is_some() {
            tracing::info!(local_addr = %self.local_addr, "media channel closed");
        }
    }
}

impl Drop for MediaChannel {
    fn drop(&mut self) {
        self.close();
    }
}
