//! Client-side RTSP session state (RFC 2326 §A.1).
//!
//! A [`Session`] tracks the protocol state, the server-assigned session
//! id, the CSeq counter and the request in flight. It is pure bookkeeping:
//! it builds requests and validates replies but never touches a socket, so
//! the [`Client`](crate::Client) can drive it under a single lock.
//!
//! ## Session lifecycle
//!
//! ```text
//! Init    --SETUP/200-->    Ready
//! Ready   --PLAY/200-->     Playing
//! Playing --PAUSE/200-->    Ready
//! Ready|Playing --TEARDOWN/200--> Init
//! ```
//!
//! A state changes only when the reply to the matching request arrives;
//! until then the request stays pending and no other may be sent.

use crate::error::{ClientError, ParseErrorKind, Result};
use crate::protocol::{Method, ReplyStatus, RtspReply, RtspRequest};

/// Client session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session: initial state, and final state after TEARDOWN.
    #[default]
    Init,
    /// Session established, media paused.
    Ready,
    /// Media is being received.
    Playing,
}

/// What [`Client::teardown`](crate::Client::teardown) has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownAction {
    /// Send a TEARDOWN request.
    Send,
    /// SETUP is still unanswered: drop it locally, no round trip.
    AbortSetup,
    /// Nothing to tear down, or a TEARDOWN is already in flight.
    Nothing,
}

/// One client-server streaming engagement.
#[derive(Debug)]
pub struct Session {
    resource: String,
    client_port: u16,
    state: SessionState,
    id: u64,
    cseq: u32,
    /// CSeq before the pending request was prepared.
    prior_cseq: u32,
    pending: Option<Method>,
}

impl Session {
    pub fn new(resource: &str, client_port: u16) -> Self {
        Self {
            resource: resource.to_string(),
            client_port,
            state: SessionState::Init,
            id: 0,
            cseq: 0,
            prior_cseq: 0,
            pending: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Server-assigned id; 0 until SETUP succeeds.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// CSeq of the most recent request written or in flight.
    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    pub fn pending(&self) -> Option<Method> {
        self.pending
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn client_port(&self) -> u16 {
        self.client_port
    }

    /// Port announced in the next SETUP.
    pub fn set_client_port(&mut self, port: u16) {
        self.client_port = port;
    }

    /// Check that `method` may be issued now.
    pub fn check(&self, method: Method) -> Result<()> {
        if let Some(pending) = self.pending {
            return Err(ClientError::RequestPending(pending));
        }
        let allowed = match method {
            Method::Setup => self.state == SessionState::Init,
            Method::Play => self.state == SessionState::Ready,
            Method::Pause => self.state == SessionState::Playing,
            Method::Teardown => self.state != SessionState::Init,
        };
        if allowed {
            Ok(())
        } else {
            Err(ClientError::InvalidState {
                method,
                state: self.state,
            })
        }
    }

    /// Build the request for `method` and mark it pending.
    ///
    /// SETUP restarts the CSeq counter at 1; every other request takes the
    /// next number. Nothing changes if the method is not allowed.
    pub fn begin(&mut self, method: Method) -> Result<RtspRequest> {
        self.check(method)?;

        self.prior_cseq = self.cseq;
        self.cseq = match method {
            Method::Setup => 1,
            _ => self.cseq.wrapping_add(1),
        };
        self.pending = Some(method);

        let request = match method {
            Method::Setup => RtspRequest::setup(&self.resource, self.cseq, self.client_port),
            _ => RtspRequest::with_session(method, &self.resource, self.cseq, self.id),
        };
        tracing::debug!(%method, cseq = self.cseq, session_id = self.id, "request prepared");
        Ok(request)
    }

    /// Forget the pending request after it could not be written.
    ///
    /// Its CSeq is given back, so the next request reuses it.
    pub fn abandon(&mut self) {
        if let Some(method) = self.pending.take() {
            tracing::debug!(%method, cseq = self.cseq, "request abandoned");
            self.cseq = self.prior_cseq;
        }
    }

    /// Validate `reply` against the request in flight.
    ///
    /// Returns the method it answers. A reply is foreign when nothing is
    /// pending, when its CSeq is not the last one sent, or (after SETUP)
    /// when its session id is not ours; a successful SETUP reply must carry
    /// a session id. The session is not modified.
    pub fn accept(&self, reply: &RtspReply) -> Result<Method> {
        let Some(method) = self.pending else {
            return Err(ClientError::ReplyMismatch {
                field: "cseq",
                expected: 0,
                actual: u64::from(reply.cseq),
            });
        };

        if reply.cseq != self.cseq {
            return Err(ClientError::ReplyMismatch {
                field: "cseq",
                expected: u64::from(self.cseq),
                actual: u64::from(reply.cseq),
            });
        }

        match (method, reply.session) {
            (Method::Setup, None) if reply.status() == ReplyStatus::Ok => {
                return Err(ClientError::Parse {
                    kind: ParseErrorKind::MissingHeader("Session"),
                });
            }
            (Method::Setup, _) => {}
            (_, Some(id)) if id == self.id => {}
            (_, other) => {
                return Err(ClientError::ReplyMismatch {
                    field: "session",
                    expected: self.id,
                    actual: other.unwrap_or(0),
                });
            }
        }

        Ok(method)
    }

    /// Clear the pending request and move to `next`. Returns the previous state.
    pub fn settle(&mut self, next: SessionState) -> SessionState {
        self.pending = None;
        let previous = self.state;
        self.state = next;
        if previous != next {
            tracing::debug!(session_id = self.id, from = ?previous, to = ?next, "state transition");
        }
        previous
    }

    /// Record the id from a successful SETUP and become Ready.
    pub fn establish(&mut self, id: u64) -> SessionState {
        self.id = id;
        self.settle(SessionState::Ready)
    }

    /// Drop the session id and return to Init. Returns the previous state.
    pub fn reset(&mut self) -> SessionState {
        let previous = self.settle(SessionState::Init);
        self.id = 0;
        previous
    }

    pub fn teardown_action(&self) -> Result<TeardownAction> {
        match self.pending {
            Some(Method::Setup) => Ok(TeardownAction::AbortSetup),
            Some(Method::Teardown) => Ok(TeardownAction::Nothing),
            Some(other) => Err(ClientError::RequestPending(other)),
            None if self.state == SessionState::Init => Ok(TeardownAction::Nothing),
            None => Ok(TeardownAction::Send),
        }
    }
}
