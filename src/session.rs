//! # Call Session State Machine
//!
//! Tracks one phone call's lifecycle across its two legs. The socket handler
//! owns exactly one `CallSession` and drives every transition from its own
//! event handlers, so no locking is needed; correctness rests on the
//! explicit states below rather than on ad hoc flags.
//!
//! ## Lifecycle:
//! 1. **Connecting**: telephony connected, AI connection not yet open
//! 2. **AwaitingAiReady**: AI connection open, settings handshake in flight
//! 3. **Active**: AI signaled ready, audio flows both directions
//! 4. **Closed**: either leg disconnected; terminal and idempotent

use crate::context::CallerContext;

/// Where the session currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingAiReady,
    Active,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::AwaitingAiReady => "awaiting_ai_ready",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        }
    }
}

/// Per-call session record owned by the telephony socket handler.
pub struct CallSession {
    state: SessionState,
    stream_sid: Option<String>,
    call_sid: Option<String>,
    caller_context: Option<CallerContext>,

    /// Inbound media frames seen, used only for sampled logging.
    frames_received: u64,

    /// Whether the pre-ready discard notice has been logged for this
    /// session. Logged once, not per frame.
    discard_logged: bool,
}

impl CallSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Connecting,
            stream_sid: None,
            call_sid: None,
            caller_context: None,
            frames_received: 0,
            discard_logged: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    pub fn call_sid(&self) -> Option<&str> {
        self.call_sid.as_deref()
    }

    pub fn caller_context(&self) -> Option<&CallerContext> {
        self.caller_context.as_ref()
    }

    /// Telephony `start` arrived: record identifiers and caller context, and
    /// move into the AI settings handshake.
    pub fn begin_handshake(
        &mut self,
        stream_sid: String,
        call_sid: String,
        caller_context: Option<CallerContext>,
    ) -> Result<(), String> {
        match self.state {
            SessionState::Connecting => {
                self.stream_sid = Some(stream_sid);
                self.call_sid = Some(call_sid);
                self.caller_context = caller_context;
                self.state = SessionState::AwaitingAiReady;
                Ok(())
            }
            other => Err(format!("cannot start handshake from state: {}", other.as_str())),
        }
    }

    /// The AI acknowledged the session settings; audio may flow.
    ///
    /// Several acknowledgement kinds count as readiness, so a repeat signal
    /// while already `Active` is accepted silently.
    pub fn mark_ready(&mut self) -> Result<(), String> {
        match self.state {
            SessionState::AwaitingAiReady => {
                self.state = SessionState::Active;
                Ok(())
            }
            SessionState::Active => Ok(()),
            other => Err(format!("cannot mark ready from state: {}", other.as_str())),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Terminal transition. Returns true only the first time; a second close
    /// on an already-closed session is a no-op, not an error.
    pub fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        self.caller_context = None;
        true
    }

    /// Count an inbound media frame and return the running total.
    pub fn record_frame(&mut self) -> u64 {
        self.frames_received += 1;
        self.frames_received
    }

    /// True exactly once per session, the first time pre-ready caller audio
    /// has to be discarded.
    pub fn should_log_discard(&mut self) -> bool {
        if self.discard_logged {
            return false;
        }
        self.discard_logged = true;
        true
    }
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started_session() -> CallSession {
        let mut session = CallSession::new();
        session
            .begin_handshake("MZ123".to_string(), "CA456".to_string(), None)
            .unwrap();
        session
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut session = CallSession::new();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(!session.is_active());

        session
            .begin_handshake("MZ123".to_string(), "CA456".to_string(), None)
            .unwrap();
        assert_eq!(session.state(), SessionState::AwaitingAiReady);
        assert_eq!(session.stream_sid(), Some("MZ123"));
        assert_eq!(session.call_sid(), Some("CA456"));
        assert!(!session.is_active());

        session.mark_ready().unwrap();
        assert!(session.is_active());

        assert!(session.close());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_cannot_mark_ready_before_handshake() {
        let mut session = CallSession::new();
        assert!(session.mark_ready().is_err());
    }

    #[test]
    fn test_repeat_ready_signal_is_accepted() {
        let mut session = started_session();
        session.mark_ready().unwrap();
        // The AI may emit several acknowledgement kinds back to back.
        assert!(session.mark_ready().is_ok());
        assert!(session.is_active());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = started_session();
        assert!(session.close());
        assert!(!session.close());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.mark_ready().is_err());
    }

    #[test]
    fn test_second_start_event_is_rejected() {
        let mut session = started_session();
        assert!(session
            .begin_handshake("MZ999".to_string(), "CA999".to_string(), None)
            .is_err());
        assert_eq!(session.stream_sid(), Some("MZ123"));
    }

    #[test]
    fn test_discard_notice_logs_once() {
        let mut session = started_session();
        assert!(session.should_log_discard());
        assert!(!session.should_log_discard());
        assert!(!session.should_log_discard());
    }

    #[test]
    fn test_frame_counter_increments() {
        let mut session = started_session();
        assert_eq!(session.record_frame(), 1);
        assert_eq!(session.record_frame(), 2);
    }
}
