//! Integration tests: a scripted RTSP server on loopback drives the client
//! through SETUP → PLAY → PAUSE → TEARDOWN, with RTP datagrams sent to the
//! port it announced.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rtsp_client::media::RtpHeader;
use rtsp_client::protocol::{Method, RtspRequest};
use rtsp_client::{Client, ClientConfig, ClientError, MemoryCache, SessionState, Status};

const WAIT: Duration = Duration::from_secs(2);

/// The server end of one control connection.
struct Peer {
    stream: TcpStream,
}

impl Peer {
    fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().expect("accept control connection");
        stream.set_read_timeout(Some(WAIT)).unwrap();
        Self { stream }
    }

    /// Read one request and check its method.
    fn expect(&mut self, method: Method) -> RtspRequest {
        let mut buf = [0u8; 1024];
        let n = self.stream.read(&mut buf).expect("request");
        let text = std::str::from_utf8(&buf[..n]).expect("utf-8 request");
        let request = RtspRequest::parse(text).expect("well-formed request");
        assert_eq!(request.method, method, "unexpected request: {text}");
        request
    }

    fn send(&mut self, text: &str) {
        self.stream.write_all(text.as_bytes()).expect("write reply");
    }

    fn reply(&mut self, request: &RtspRequest, code: u16, reason: &str, session: u64) {
        let cseq = request.cseq().expect("request CSeq");
        self.send(&format!("RTSP/1.0 {code} {reason}\nCSeq: {cseq}\nSession: {session}"));
    }

    /// Whether the client closed its end.
    fn sees_eof(&mut self) -> bool {
        let mut buf = [0u8; 64];
        matches!(self.stream.read(&mut buf), Ok(0))
    }
}

struct Harness {
    listener: TcpListener,
    client: Client,
    peer: Peer,
    cache: MemoryCache,
    statuses: mpsc::Receiver<Status>,
}

fn config(port: u16) -> ClientConfig {
    ClientConfig {
        server_port: port,
        rtp_port: 0,
        connect_timeout: Duration::from_secs(1),
        control_timeout: Duration::from_millis(50),
        media_timeout: Duration::from_millis(50),
        ..ClientConfig::default()
    }
}

fn start_with(configure: impl FnOnce(&mut ClientConfig)) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind control listener");
    let mut config = config(listener.local_addr().unwrap().port());
    configure(&mut config);

    let cache = MemoryCache::new();
    let client = Client::with_cache(config, Box::new(cache.clone())).expect("connect");
    let peer = Peer::accept(&listener);

    let (tx, statuses) = mpsc::channel();
    client.on_status(move |status| {
        let _ = tx.send(status.clone());
    });

    Harness {
        listener,
        client,
        peer,
        cache,
        statuses,
    }
}

fn start() -> Harness {
    start_with(|_| {})
}

impl Harness {
    fn next_status(&self) -> Status {
        self.statuses.recv_timeout(WAIT).expect("status event")
    }

    fn establish(&mut self, session: u64) -> RtspRequest {
        self.client.setup().unwrap();
        let request = self.peer.expect(Method::Setup);
        self.peer.reply(&request, 200, "OK", session);
        assert!(self.client.wait_for_reply(WAIT));
        assert_eq!(
            self.next_status(),
            Status::StateChanged {
                from: SessionState::Init,
                to: SessionState::Ready
            }
        );
        request
    }

    fn command(&mut self, method: Method, session: u64) -> RtspRequest {
        let sent = match method {
            Method::Setup => self.client.setup(),
            Method::Play => self.client.play(),
            Method::Pause => self.client.pause(),
            Method::Teardown => self.client.teardown(),
        };
        sent.unwrap();
        let request = self.peer.expect(method);
        self.peer.reply(&request, 200, "OK", session);
        assert!(self.client.wait_for_reply(WAIT));
        request
    }
}

fn datagram(seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut header = RtpHeader::new(26, 0xfeed);
    header.set_sequence(seq);
    header.packet(true, payload)
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while !done() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    true
}

#[test]
fn full_session_setup_play_pause_teardown() {
    let mut h = start();
    let frames = Arc::new(Mutex::new(Vec::new()));
    let seen = frames.clone();
    h.client.on_frame(move |frame| {
        seen.lock().unwrap().push((frame.sequence, frame.data.to_vec()));
    });

    // SETUP
    let setup = h.establish(9);
    assert_eq!(setup.cseq(), Some(1));
    assert_eq!(setup.resource, "movie.Mjpeg");
    let port = setup.client_port().expect("announced client port");
    assert_eq!(h.client.state(), SessionState::Ready);
    assert_eq!(h.client.session_id(), 9);
    assert_eq!(h.client.media_port(), Some(port));
    assert!(h.cache.contains(9));
    assert!(!h.client.is_media_active());

    // PLAY
    let play = h.command(Method::Play, 9);
    assert_eq!(play.cseq(), Some(2));
    assert_eq!(play.get_header("Session"), Some("9"));
    assert_eq!(h.client.state(), SessionState::Playing);
    assert!(h.client.is_media_active());

    let target: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut wrong_version = datagram(8, b"v1");
    wrong_version[0] = (1 << 6) | (wrong_version[0] & 0x3f);
    let mut wrong_type = RtpHeader::new(96, 0xfeed);
    wrong_type.set_sequence(7);
    for packet in [
        datagram(5, b"five"),
        datagram(5, b"five again"),
        datagram(3, b"three"),
        wrong_type.packet(true, b"h264"),
        wrong_version,
        vec![0x80, 26, 0],
        datagram(6, b"six"),
    ] {
        sender.send_to(&packet, target).unwrap();
    }

    assert!(wait_until(|| frames.lock().unwrap().len() >= 2));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(
        *frames.lock().unwrap(),
        vec![(5, b"five".to_vec()), (6, b"six".to_vec())]
    );
    assert_eq!(h.cache.frame(9).as_deref(), Some(&b"six"[..]));
    let stats = h.client.media_stats().expect("media stats");
    assert_eq!(stats.forwarded, 2);
    assert_eq!(stats.rejected, 4);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.last_sequence, 6);

    // PAUSE
    let pause = h.command(Method::Pause, 9);
    assert_eq!(pause.cseq(), Some(3));
    assert_eq!(h.client.state(), SessionState::Ready);
    assert!(!h.client.is_media_active());

    // TEARDOWN
    let teardown = h.command(Method::Teardown, 9);
    assert_eq!(teardown.cseq(), Some(4));
    assert_eq!(h.client.state(), SessionState::Init);
    assert_eq!(h.client.session_id(), 0);
    assert_eq!(h.client.media_port(), None);
    assert!(!h.cache.contains(9));
    assert!(!h.client.is_connected());
    assert!(h.peer.sees_eof());

    let transitions: Vec<Status> = std::iter::from_fn(|| h.statuses.recv_timeout(WAIT).ok())
        .take(3)
        .collect();
    assert_eq!(
        transitions,
        vec![
            Status::StateChanged {
                from: SessionState::Ready,
                to: SessionState::Playing
            },
            Status::StateChanged {
                from: SessionState::Playing,
                to: SessionState::Ready
            },
            Status::StateChanged {
                from: SessionState::Ready,
                to: SessionState::Init
            },
        ]
    );

    // A second TEARDOWN is a no-op.
    h.client.teardown().unwrap();
    assert_eq!(h.client.state(), SessionState::Init);

    // The next SETUP reconnects and restarts the CSeq counter.
    h.client.setup().unwrap();
    let mut peer = Peer::accept(&h.listener);
    let again = peer.expect(Method::Setup);
    assert_eq!(again.cseq(), Some(1));
    peer.reply(&again, 200, "OK", 10);
    assert!(h.client.wait_for_reply(WAIT));
    assert_eq!(h.client.session_id(), 10);
    assert!(h.cache.contains(10));
}

#[test]
fn reply_with_foreign_session_is_ignored() {
    let mut h = start();
    h.establish(9);

    h.client.play().unwrap();
    let play = h.peer.expect(Method::Play);
    h.peer.reply(&play, 200, "OK", 10);
    assert!(!h.client.wait_for_reply(Duration::from_millis(300)));
    assert_eq!(h.client.state(), SessionState::Ready);
    assert_eq!(h.client.pending(), Some(Method::Play));

    h.peer.reply(&play, 200, "OK", 9);
    assert!(h.client.wait_for_reply(WAIT));
    assert_eq!(h.client.state(), SessionState::Playing);
}

#[test]
fn reply_with_wrong_cseq_is_ignored() {
    let mut h = start();
    h.client.setup().unwrap();
    h.peer.expect(Method::Setup);
    h.peer.send("RTSP/1.0 200 OK\nCSeq: 5\nSession: 9");
    assert!(!h.client.wait_for_reply(Duration::from_millis(300)));
    assert_eq!(h.client.state(), SessionState::Init);
    assert_eq!(h.client.pending(), Some(Method::Setup));
}

#[test]
fn malformed_reply_is_ignored() {
    let mut h = start();
    h.client.setup().unwrap();
    let setup = h.peer.expect(Method::Setup);
    h.peer.send("garbage without a status line");
    assert!(!h.client.wait_for_reply(Duration::from_millis(300)));
    h.peer.reply(&setup, 200, "OK", 4);
    assert!(h.client.wait_for_reply(WAIT));
    assert_eq!(h.client.state(), SessionState::Ready);
}

#[test]
fn error_replies_are_reported_without_transition() {
    let mut h = start();

    h.client.setup().unwrap();
    let setup = h.peer.expect(Method::Setup);
    h.peer.send(&format!(
        "RTSP/1.0 404 FILE_NOT_FOUND\nCSeq: {}",
        setup.cseq().unwrap()
    ));
    assert!(h.client.wait_for_reply(WAIT));
    assert_eq!(h.next_status(), Status::NotFound);
    assert_eq!(h.client.state(), SessionState::Init);

    h.establish(9);
    h.client.play().unwrap();
    let play = h.peer.expect(Method::Play);
    h.peer.reply(&play, 500, "CONNECTION_ERROR", 9);
    assert!(h.client.wait_for_reply(WAIT));
    assert_eq!(h.next_status(), Status::ServerError);
    assert_eq!(h.client.state(), SessionState::Ready);
    assert!(!h.client.is_media_active());
}

#[test]
fn commands_in_wrong_state_send_nothing() {
    let mut h = start();

    assert!(matches!(
        h.client.play(),
        Err(ClientError::InvalidState {
            method: Method::Play,
            state: SessionState::Init
        })
    ));
    assert!(matches!(
        h.client.pause(),
        Err(ClientError::InvalidState { .. })
    ));
    h.client.teardown().unwrap();
    assert_eq!(h.client.pending(), None);

    h.client.setup().unwrap();
    assert!(matches!(
        h.client.setup(),
        Err(ClientError::RequestPending(Method::Setup))
    ));
    // Only the first SETUP reached the server.
    let setup = h.peer.expect(Method::Setup);
    assert_eq!(setup.cseq(), Some(1));
}

#[test]
fn teardown_before_setup_reply_aborts_locally() {
    let mut h = start();
    h.client.setup().unwrap();
    h.peer.expect(Method::Setup);

    h.client.teardown().unwrap();
    assert_eq!(h.client.state(), SessionState::Init);
    assert_eq!(h.client.pending(), None);
    assert!(!h.client.is_connected());
    assert!(h.peer.sees_eof());
}

#[test]
fn refused_connection_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let result = Client::connect(config(port));
    assert!(matches!(result, Err(ClientError::Connect { .. })));
}

#[test]
fn server_hangup_resets_session() {
    let mut h = start();
    h.establish(9);
    assert!(h.cache.contains(9));

    // The hangup is noticed while a reply is awaited.
    h.peer.stream.shutdown(Shutdown::Both).unwrap();
    h.client.play().unwrap();
    assert_eq!(h.next_status(), Status::Disconnected);
    assert_eq!(
        h.next_status(),
        Status::StateChanged {
            from: SessionState::Ready,
            to: SessionState::Init
        }
    );
    assert_eq!(h.client.state(), SessionState::Init);
    assert!(!h.client.is_connected());
    assert!(!h.cache.contains(9));
}

#[test]
fn media_port_conflict_keeps_session_in_init() {
    let taken = UdpSocket::bind("0.0.0.0:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let mut h = start_with(|config| config.rtp_port = port);

    h.client.setup().unwrap();
    let setup = h.peer.expect(Method::Setup);
    assert_eq!(setup.client_port(), Some(port));
    h.peer.reply(&setup, 200, "OK", 9);
    assert!(h.client.wait_for_reply(WAIT));

    assert!(matches!(h.next_status(), Status::MediaUnavailable(_)));
    assert_eq!(h.client.state(), SessionState::Init);
    assert_eq!(h.client.media_port(), None);
    assert!(!h.cache.contains(9));
}

#[test]
fn close_sends_best_effort_teardown() {
    let mut h = start();
    h.establish(9);

    h.client.close();
    let teardown = h.peer.expect(Method::Teardown);
    assert_eq!(teardown.get_header("Session"), Some("9"));
    assert_eq!(h.client.state(), SessionState::Init);
    assert!(!h.cache.contains(9));
    assert!(h.peer.sees_eof());
}

#[test]
fn next_command_accepted_while_status_callback_runs() {
    let mut h = start();
    h.client
        .on_status(|_| std::thread::sleep(Duration::from_millis(200)));

    h.client.setup().unwrap();
    let setup = h.peer.expect(Method::Setup);
    h.peer.reply(&setup, 200, "OK", 9);
    assert!(h.client.wait_for_reply(WAIT));
    assert_eq!(h.client.state(), SessionState::Ready);
    assert_eq!(h.client.pending(), None);

    // The status callback is still sleeping on the listener thread.
    h.client.play().unwrap();
    let play = h.peer.expect(Method::Play);
    assert_eq!(play.cseq(), Some(2));
    h.peer.reply(&play, 200, "OK", 9);
    assert!(h.client.wait_for_reply(WAIT));
    assert_eq!(h.client.state(), SessionState::Playing);
}

#[test]
fn close_during_teardown_reports_one_transition() {
    let mut h = start();
    let (entered_tx, entered) = mpsc::channel();
    let (resume, resume_rx) = mpsc::channel::<()>();
    let resume_rx = Mutex::new(resume_rx);
    h.client.on_frame(move |_| {
        let _ = entered_tx.send(());
        let _ = resume_rx.lock().unwrap().recv_timeout(WAIT);
    });

    let setup = h.establish(9);
    h.command(Method::Play, 9);
    assert_eq!(
        h.next_status(),
        Status::StateChanged {
            from: SessionState::Ready,
            to: SessionState::Playing
        }
    );

    // Park the media listener inside the frame callback.
    let port = setup.client_port().expect("announced client port");
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender
        .send_to(&datagram(1, b"jpeg"), ("127.0.0.1", port))
        .unwrap();
    entered.recv_timeout(WAIT).expect("frame callback entered");

    // The TEARDOWN reply now blocks on joining the media listener.
    h.client.teardown().unwrap();
    let teardown = h.peer.expect(Method::Teardown);
    h.peer.reply(&teardown, 200, "OK", 9);
    assert!(wait_until(|| h.client.media_port().is_none()));
    assert_eq!(h.client.pending(), Some(Method::Teardown));

    std::thread::scope(|s| {
        s.spawn(|| h.client.close());
        assert!(wait_until(|| h.client.state() == SessionState::Init));
        resume.send(()).unwrap();
    });

    let statuses: Vec<Status> = h.statuses.try_iter().collect();
    assert_eq!(
        statuses,
        vec![Status::StateChanged {
            from: SessionState::Playing,
            to: SessionState::Init
        }]
    );
    assert!(!h.cache.contains(9));
}
