//! Network channels for RTSP signaling and RTP media reception.
//!
//! The client uses a split transport model:
//!
//! - **TCP** ([`tcp`]): one persistent connection carrying RTSP
//!   requests and replies, serviced by a control listener thread.
//!
//! - **UDP** ([`udp`]): one socket bound to the client RTP port,
//!   serviced by a media listener thread.
//!
//! Both channels wrap their socket and listener in a [`ChannelHandle`].
//! A listener is started disabled and parks on its [`Signal`] until the
//! owner enables it; stopping is a two-phase handshake (stop + wake, then
//! join).

pub mod signal;
pub mod tcp;
pub mod udp;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub use signal::Signal;
pub use tcp::{ControlChannel, ControlEvent, Disposition};
pub use udp::{Delivery, MediaChannel, MediaReceiver, MediaStats};

use crate::error::Result;

/// A socket plus the one background listener bound to it.
///
/// Exclusively owned by its channel. The listener holds its own clone of
/// the socket; the handle keeps the original so the owner can write to it
/// and close it.
pub struct ChannelHandle<S, T = ()> {
    name: &'static str,
    socket: Option<S>,
    signal: Arc<Signal<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<S, T> ChannelHandle<S, T>
where
    T: Copy + PartialEq + Send + Sync + 'static,
{
    /// Spawn the listener `body` disabled.
    pub fn spawn<F>(name: &'static str, socket: S, body: F) -> Result<Self>
    where
        F: FnOnce(Arc<Signal<T>>) + Send + 'static,
    {
        let signal = Arc::new(Signal::new());
        let listener_signal = signal.clone();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(listener_signal))?;

        tracing::debug!(channel = name, "listener started");

        Ok(Self {
            name,
            socket: Some(socket),
            signal,
            worker: Some(worker),
        })
    }

    pub fn socket(&self) -> Option<&S> {
        self.socket.as_ref()
    }

    pub fn signal(&self) -> &Signal<T> {
        &self.signal
    }

    /// Whether [`close`](Self::close) has not run yet.
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Stop and join the listener, then hand back the socket for closing.
    ///
    /// Returns `None` when already closed. When called from the listener
    /// thread itself the join is skipped; the listener exits as soon as it
    /// returns to its loop.
    pub fn close(&mut self) -> Option<S> {
        self.signal.stop();

        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                tracing::trace!(channel = self.name, "close from own listener, not joining");
            } else if worker.join().is_err() {
                tracing::warn!(channel = self.name, "listener panicked");
            } else {
                tracing::debug!(channel = self.name, "listener stopped");
            }
        }

        self.socket.take()
    }
}
