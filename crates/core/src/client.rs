use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{ClientError, Result};
use crate::media::PAYLOAD_TYPE_JPEG;
use crate::protocol::{Method, ReplyStatus, RtspReply};
use crate::session::{Session, SessionState, TeardownAction};
use crate::sink::{FileCache, Frame, FrameCache, FrameSink, MemoryCache};
use crate::transport::{ControlChannel, ControlEvent, Disposition, MediaChannel, MediaStats};

/// Client-level configuration, fixed for the lifetime of a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// RTSP server host name or address.
    pub server_host: String,
    /// RTSP server TCP port.
    pub server_port: u16,
    /// Local UDP port announced in SETUP. `0` picks a free port at SETUP time.
    pub rtp_port: u16,
    /// Resource requested from the server, e.g. `movie.Mjpeg`.
    pub resource: String,
    /// RTP payload type accepted on the media channel.
    pub payload_type: u8,
    pub connect_timeout: Duration,
    /// Receive timeout of the control socket; bounds how long closing waits.
    pub control_timeout: Duration,
    /// Receive timeout of the media socket; bounds how long closing waits.
    pub media_timeout: Duration,
    /// When set, frames are cached as `cache-<session>.jpg` in this directory.
    /// Otherwise they are kept in memory.
    pub cache_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8554,
            rtp_port: 25000,
            resource: "movie.Mjpeg".to_string(),
            payload_type: PAYLOAD_TYPE_JPEG,
            connect_timeout: Duration::from_secs(2),
            control_timeout: Duration::from_millis(500),
            media_timeout: Duration::from_millis(500),
            cache_dir: None,
        }
    }
}

impl ClientConfig {
    /// `host:port` of the RTSP server.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

/// Events reported to the status callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// The server answered 404: the resource does not exist.
    NotFound,
    /// The server answered 500.
    ServerError,
    /// The server closed the control connection; the session is gone.
    Disconnected,
    /// SETUP succeeded but the media port could not be opened.
    MediaUnavailable(String),
}

/// Status callback registered through [`Client::on_status`].
pub type StatusCallback = Arc<dyn Fn(&Status) + Send + Sync>;

/// Everything guarded by the session lock.
struct Core {
    session: Session,
    control: Option<ControlChannel>,
    media: Option<MediaChannel>,
}

struct Inner {
    config: ClientConfig,
    core: Mutex<Core>,
    /// Signalled whenever a pending request is settled.
    settled: Condvar,
    sink: Arc<FrameSink>,
    status: RwLock<Option<StatusCallback>>,
}

/// RTSP client session controller.
///
/// Issues SETUP/PLAY/PAUSE/TEARDOWN over the control channel and applies
/// the replies, which arrive on the control listener thread: opening the
/// media channel after SETUP, enabling it on PLAY, parking it on PAUSE and
/// closing everything on TEARDOWN. Commands and replies mutate the session
/// under one lock. Sockets are joined outside that lock.
///
/// Commands return as soon as the request is written; the state changes
/// when the reply arrives. Use [`on_status`](Self::on_status) or
/// [`wait_for_reply`](Self::wait_for_reply) to observe it.
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Connect the control channel. Frames are cached according to
    /// [`ClientConfig::cache_dir`].
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let cache: Box<dyn FrameCache> = match &config.cache_dir {
            Some(dir) => Box::new(FileCache::new(dir)),
            None => Box::new(MemoryCache::new()),
        };
        Self::with_cache(config, cache)
    }

    /// Connect the control channel, storing frames in `cache`.
    pub fn with_cache(config: ClientConfig, cache: Box<dyn FrameCache>) -> Result<Self> {
        let session = Session::new(&config.resource, config.rtp_port);
        let inner = Arc::new(Inner {
            config,
            core: Mutex::new(Core {
                session,
                control: None,
                media: None,
            }),
            settled: Condvar::new(),
            sink: Arc::new(FrameSink::new(cache)),
            status: RwLock::new(None),
        });

        let control = inner.open_control()?;
        inner.core.lock().control = Some(control);

        Ok(Client { inner })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn setup(&self) -> Result<()> {
        self.issue(Method::Setup)
    }

    pub fn play(&self) -> Result<()> {
        self.issue(Method::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.issue(Method::Pause)
    }

    /// End the session.
    ///
    /// Sends TEARDOWN from Ready or Playing. While SETUP is still
    /// unanswered the session is dropped locally without a round trip. In
    /// Init, or with a TEARDOWN already in flight, this does nothing.
    pub fn teardown(&self) -> Result<()> {
        let action = self.inner.core.lock().session.teardown_action()?;
        match action {
            TeardownAction::Send => self.issue(Method::Teardown),
            TeardownAction::Nothing => Ok(()),
            TeardownAction::AbortSetup => {
                if self.inner.abort_setup() {
                    Ok(())
                } else {
                    // The SETUP reply won the race; decide again.
                    self.teardown()
                }
            }
        }
    }

    /// Register the status callback, replacing any previous one.
    pub fn on_status<F>(&self, callback: F)
    where
        F: Fn(&Status) + Send + Sync + 'static,
    {
        *self.inner.status.write() = Some(Arc::new(callback));
    }

    /// Register the frame callback, replacing any previous one.
    pub fn on_frame<F>(&self, callback: F)
    where
        F: Fn(&Frame<'_>) + Send + Sync + 'static,
    {
        self.inner.sink.set_callback(Arc::new(callback));
    }

    pub fn state(&self) -> SessionState {
        self.inner.core.lock().session.state()
    }

    /// Server-assigned session id; 0 outside a session.
    pub fn session_id(&self) -> u64 {
        self.inner.core.lock().session.id()
    }

    pub fn pending(&self) -> Option<Method> {
        self.inner.core.lock().session.pending()
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .core
            .lock()
            .control
            .as_ref()
            .is_some_and(ControlChannel::is_open)
    }

    /// Local port of the media channel, while it is open.
    pub fn media_port(&self) -> Option<u16> {
        self.inner
            .core
            .lock()
            .media
            .as_ref()
            .map(MediaChannel::local_port)
    }

    pub fn media_stats(&self) -> Option<MediaStats> {
        self.inner.core.lock().media.as_ref().map(MediaChannel::stats)
    }

    /// Whether the media listener is currently receiving.
    pub fn is_media_active(&self) -> bool {
        self.inner
            .core
            .lock()
            .media
            .as_ref()
            .is_some_and(MediaChannel::is_active)
    }

    /// Block until no request is pending or `timeout` elapses.
    ///
    /// Returns `true` if nothing is pending on return.
    pub fn wait_for_reply(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut core = self.inner.core.lock();
        while core.session.pending().is_some() {
            if self
                .inner
                .settled
                .wait_until(&mut core, deadline)
                .timed_out()
            {
                return core.session.pending().is_none();
            }
        }
        true
    }

    /// Shut the client down.
    ///
    /// An established session gets a best-effort TEARDOWN that is not
    /// waited for. Both channels are then closed and the frame slot
    /// released. Also runs on drop.
    pub fn close(&self) {
        let (media, control, session_id, previous) = {
            let mut core = self.inner.core.lock();
            if let Ok(TeardownAction::Send) = core.session.teardown_action() {
                if let Ok(request) = core.session.begin(Method::Teardown) {
                    if let Some(control) = core.control.as_mut() {
                        if let Err(e) = control.send(&request) {
                            tracing::debug!(error = %e, "TEARDOWN on close not sent");
                        }
                    }
                }
            }
            let session_id = core.session.id();
            let previous = core.session.reset();
            self.inner.settled.notify_all();
            (core.media.take(), core.control.take(), session_id, previous)
        };

        if let Some(mut media) = media {
            media.close();
        }
        self.inner.sink.release(session_id);
        if let Some(mut control) = control {
            control.close();
        }

        if previous != SessionState::Init {
            self.inner.emit(vec![Status::StateChanged {
                from: previous,
                to: SessionState::Init,
            }]);
        }
    }

    fn issue(&self, method: Method) -> Result<()> {
        // A control channel whose listener already exited is dropped
        // outside the lock; its drop joins the listener.
        let stale = {
            let mut core = self.inner.core.lock();
            core.session.check(method)?;
            let open = core.control.as_ref().is_some_and(ControlChannel::is_open);
            if open { None } else { core.control.take() }
        };
        drop(stale);

        let mut core = self.inner.core.lock();
        core.session.check(method)?;

        if core.control.is_none() {
            if method != Method::Setup {
                return Err(ClientError::NotConnected);
            }
            core.control = Some(self.inner.open_control()?);
        }
        if method == Method::Setup && self.inner.config.rtp_port == 0 {
            core.session.set_client_port(reserve_udp_port()?);
        }

        let request = core.session.begin(method)?;
        let Core {
            session, control, ..
        } = &mut *core;
        let Some(control) = control.as_mut() else {
            session.abandon();
            return Err(ClientError::NotConnected);
        };
        if let Err(e) = control.send(&request) {
            tracing::warn!(%method, error = %e, "request not sent");
            session.abandon();
            return Err(e);
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    fn open_control(self: &Arc<Self>) -> Result<ControlChannel> {
        let weak = Arc::downgrade(self);
        ControlChannel::open(
            &self.config.server_addr(),
            self.config.connect_timeout,
            self.config.control_timeout,
            move |event| match weak.upgrade() {
                Some(inner) => inner.on_control_event(event),
                None => Disposition::Release,
            },
        )
    }

    fn emit(&self, events: Vec<Status>) {
        if events.is_empty() {
            return;
        }
        let callback = self.status.read().clone();
        for event in &events {
            match event {
                Status::NotFound => tracing::warn!("server reported resource not found"),
                Status::ServerError => tracing::warn!("server reported an internal error"),
                Status::StateChanged { from, to } => {
                    tracing::info!(from = ?from, to = ?to, "session state changed")
                }
                Status::Disconnected | Status::MediaUnavailable(_) => {}
            }
            if let Some(callback) = &callback {
                callback(event);
            }
        }
    }

    /// Runs on the control listener thread.
    fn on_control_event(&self, event: ControlEvent) -> Disposition {
        match event {
            ControlEvent::Reply(reply) => self.on_reply(&reply),
            ControlEvent::Closed => {
                self.on_disconnect();
                Disposition::Release
            }
        }
    }

    fn on_reply(&self, reply: &RtspReply) -> Disposition {
        let mut core = self.core.lock();
        let method = match core.session.accept(reply) {
            Ok(method) => method,
            Err(e) => {
                tracing::debug!(error = %e, "reply discarded");
                return Disposition::Continue;
            }
        };
        // Free the request slot together with the session, so a command
        // issued as soon as `pending` clears is not refused.
        if let Some(control) = &core.control {
            control.release(reply.cseq, method);
        }

        let mut events = Vec::new();
        let current = core.session.state();
        match (reply.status(), method) {
            (ReplyStatus::Ok, Method::Setup) => {
                let session_id = reply.session.unwrap_or_default();
                self.on_setup_ok(&mut core, session_id, &mut events);
            }
            (ReplyStatus::Ok, Method::Play) => {
                if let Some(media) = &core.media {
                    media.start();
                }
                let from = core.session.settle(SessionState::Playing);
                events.push(Status::StateChanged {
                    from,
                    to: SessionState::Playing,
                });
            }
            (ReplyStatus::Ok, Method::Pause) => {
                if let Some(media) = &core.media {
                    media.pause();
                }
                let from = core.session.settle(SessionState::Ready);
                events.push(Status::StateChanged {
                    from,
                    to: SessionState::Ready,
                });
            }
            (ReplyStatus::Ok, Method::Teardown) => {
                drop(core);
                self.finish_teardown();
                return Disposition::Release;
            }
            (ReplyStatus::NotFound, _) => {
                core.session.settle(current);
                events.push(Status::NotFound);
            }
            (ReplyStatus::ServerError, _) => {
                core.session.settle(current);
                events.push(Status::ServerError);
            }
            (ReplyStatus::Other(code), _) => {
                tracing::debug!(%method, code, "reply status ignored");
                core.session.settle(current);
            }
        }

        self.settled.notify_all();
        drop(core);
        self.emit(events);
        Disposition::Release
    }

    fn on_setup_ok(&self, core: &mut Core, session_id: u64, events: &mut Vec<Status>) {
        let opened = MediaChannel::open(
            core.session.client_port(),
            self.config.media_timeout,
            self.config.payload_type,
            self.sink.clone(),
        );
        match opened {
            Ok(media) => {
                core.media = Some(media);
                self.sink.reset(session_id);
                let from = core.session.establish(session_id);
                tracing::info!(session_id, "session established");
                events.push(Status::StateChanged {
                    from,
                    to: SessionState::Ready,
                });
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "failed to open media channel");
                core.session.settle(SessionState::Init);
                events.push(Status::MediaUnavailable(e.to_string()));
            }
        }
    }

    /// Second half of TEARDOWN: the media listener is joined before the
    /// session returns to Init. TEARDOWN stays pending meanwhile, so no
    /// other command can slip in.
    fn finish_teardown(&self) {
        let media = self.core.lock().media.take();
        if let Some(mut media) = media {
            media.close();
        }

        let (control, events) = {
            let mut core = self.core.lock();
            if core.session.pending() != Some(Method::Teardown) {
                // `close` ran while the media listener was joined and has
                // already reset the session and released the slot.
                tracing::debug!("teardown already completed by close");
                return;
            }
            let session_id = core.session.id();
            self.sink.release(session_id);
            let from = core.session.reset();
            tracing::info!(session_id, "session torn down");
            self.settled.notify_all();
            (
                core.control.take(),
                vec![Status::StateChanged {
                    from,
                    to: SessionState::Init,
                }],
            )
        };

        // Called from the control listener itself: this stops it without
        // joining and closes the connection.
        if let Some(mut control) = control {
            control.close();
        }
        self.emit(events);
    }

    fn on_disconnect(&self) {
        let (media, control, session_id, from) = {
            let mut core = self.core.lock();
            let session_id = core.session.id();
            let from = core.session.reset();
            self.settled.notify_all();
            (core.media.take(), core.control.take(), session_id, from)
        };

        if let Some(mut media) = media {
            media.close();
        }
        self.sink.release(session_id);
        if let Some(mut control) = control {
            control.close();
        }

        let mut events = vec![Status::Disconnected];
        if from != SessionState::Init {
            events.push(Status::StateChanged {
                from,
                to: SessionState::Init,
            });
        }
        self.emit(events);
    }

    /// Drop an unanswered SETUP. Returns `false` if it was answered meanwhile.
    fn abort_setup(&self) -> bool {
        let control = {
            let mut core = self.core.lock();
            if core.session.pending() != Some(Method::Setup) {
                return false;
            }
            let session_id = core.session.id();
            core.session.reset();
            self.sink.release(session_id);
            self.settled.notify_all();
            core.control.take()
        };

        // A late SETUP reply must not reach the next session.
        if let Some(mut control) = control {
            control.close();
        }
        tracing::info!("unanswered SETUP abandoned");
        true
    }
}

/// Pick a free local UDP port for SETUP to announce.
fn reserve_udp_port() -> Result<u16> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    Ok(socket.local_addr()?.port())
}
