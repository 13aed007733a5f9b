//! # Telephony Media Stream Handler
//!
//! Handles the telephony provider's per-call WebSocket and bridges it to the
//! voice-AI service. One connection is one phone call is one actor; sessions
//! share nothing with each other.
//!
//! ## Telephony Protocol:
//! JSON control envelopes discriminated by an `event` field:
//! 1. **start**: stream/call identifiers, media format, and a base64
//!    custom-parameter blob carrying the caller-context JSON
//! 2. **media**: `{payload}` base64 μ-law audio, both directions
//! 3. **stop**: the provider is terminating the stream
//! 4. Outbound only: **clear** (discard buffered playback) and **mark**
//!    (`{name}`, a named synchronization marker the provider echoes back)
//!
//! ## Session Flow:
//! The `start` event opens the AI connection; caller audio is discarded
//! until the AI acknowledges the settings handshake; AI audio rides the
//! outbound sequencer so playback stays gapless and ordered; either leg
//! closing tears the whole session down.

use crate::ai::client::{self, AiClosed, AiConnection, AiEventMessage};
use crate::ai::protocol::{ClientMessage, ServerEvent};
use crate::audio::codec;
use crate::audio::sequencer::{OutboundSequencer, TelephonyOutbound};
use crate::config::AppConfig;
use crate::context;
use crate::session::{CallSession, SessionState};
use crate::state::AppState;
use crate::tools;
use crate::tools::backend::BackendClient;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// How often the gateway pings the telephony connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long without any pong before the connection is considered dead.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Depth of the ordered outbound frame channel between the sequencer's
/// drain loop and this actor.
const OUTBOUND_BUFFER: usize = 64;

/// Control envelope on the telephony media stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelephonyMessage {
    /// Stream established; carries identifiers and the caller context blob.
    Start { start: StartInfo },

    /// One audio frame.
    Media { media: MediaPayload },

    /// The provider is terminating the stream.
    Stop,

    /// Outbound: discard any playback the provider has buffered.
    Clear,

    /// Named synchronization marker; outbound from the gateway, echoed back
    /// by the provider once buffered audio was actually discarded.
    Mark { mark: MarkInfo },

    /// Any event kind this gateway does not handle.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartInfo {
    pub stream_sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
    /// Base64 blob containing the caller-context JSON.
    #[serde(default)]
    pub custom_parameters: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Base64 μ-law audio.
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkInfo {
    pub name: String,
}

/// The AI connection came up for this session.
#[derive(Message)]
#[rtype(result = "()")]
struct AiConnected {
    connection: AiConnection,
}

/// The AI connection could not be established.
#[derive(Message)]
#[rtype(result = "()")]
struct AiFailed {
    reason: String,
}

/// WebSocket actor owning one call session end to end.
///
/// Actix invokes an actor's handlers sequentially, so every field here is
/// plain owned state; the per-session invariants (readiness gating, one
/// drain loop, one priming message) need no locks.
pub struct TelephonySocket {
    /// Shared gateway state, used only for metrics and configuration.
    app_state: web::Data<AppState>,

    /// Configuration snapshot taken when the connection was accepted.
    config: AppConfig,

    /// This call's lifecycle state machine.
    session: CallSession,

    /// Ordered outbound playback queue; created in `started`.
    sequencer: Option<OutboundSequencer>,

    /// Handle to the voice-AI leg once it is up.
    ai: Option<AiConnection>,

    /// HTTP client for tool dispatch.
    backend: BackendClient,

    /// Whether the one-shot context priming has been sent.
    primed: bool,

    /// Whether this connection counted into the active-call gauge.
    call_registered: bool,

    last_heartbeat: Instant,
}

impl TelephonySocket {
    pub fn new(app_state: web::Data<AppState>, config: AppConfig, backend: BackendClient) -> Self {
        Self {
            app_state,
            config,
            session: CallSession::new(),
            sequencer: None,
            ai: None,
            backend,
            primed: false,
            call_registered: false,
            last_heartbeat: Instant::now(),
        }
    }

    /// Telephony `start`: record the session identifiers, decode the caller
    /// context, and dial the voice-AI service.
    fn handle_start(&mut self, start: StartInfo, ctx: &mut ws::WebsocketContext<Self>) {
        let caller_context = start
            .custom_parameters
            .as_deref()
            .and_then(context::decode_caller_context);
        let context_resolved = caller_context.as_ref().map(|c| c.found).unwrap_or(false);

        if let Some(format) = &start.media_format {
            if format.encoding != "audio/x-mulaw"
                || format.sample_rate != self.config.audio.telephony_sample_rate
                || format.channels != self.config.audio.telephony_channels
            {
                warn!(?format, "unexpected telephony media format declared");
            }
        }

        if let Err(err) = self.session.begin_handshake(
            start.stream_sid.clone(),
            start.call_sid.clone(),
            caller_context,
        ) {
            warn!(error = %err, "ignoring start event");
            return;
        }

        self.app_state.call_started();
        self.call_registered = true;
        info!(
            stream_sid = %start.stream_sid,
            call_sid = %start.call_sid,
            context_resolved,
            "call started, opening AI connection"
        );

        let ai_config = self.config.ai.clone();
        let telephony_rate = self.config.audio.telephony_sample_rate;
        let addr = ctx.address();
        let events: Recipient<AiEventMessage> = addr.clone().recipient();
        let closed: Recipient<AiClosed> = addr.clone().recipient();
        tokio::spawn(async move {
            match client::connect(&ai_config, telephony_rate, events, closed).await {
                Ok(connection) => addr.do_send(AiConnected { connection }),
                Err(err) => addr.do_send(AiFailed {
                    reason: err.to_string(),
                }),
            }
        });
    }

    /// Inbound caller audio: gate on readiness, transcode to linear16, and
    /// forward to the AI leg.
    fn handle_media(&mut self, payload: String) {
        let frames = self.session.record_frame();

        // Pre-ready audio is discarded, not buffered: holding it produced no
        // observed benefit and grows without bound if the AI never becomes
        // ready. Logged once per session, not per frame.
        if !self.session.is_active() {
            if self.session.should_log_discard() {
                info!(
                    state = self.session.state().as_str(),
                    "discarding caller audio until the AI session is ready"
                );
            }
            self.app_state.record_discarded_frame();
            return;
        }

        let mulaw = match BASE64.decode(payload.as_bytes()) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "media frame payload was not valid base64");
                return;
            }
        };
        let linear = codec::decode_mulaw_to_linear16_bytes(&mulaw);
        if linear.is_empty() {
            return;
        }

        if let Some(ai) = &self.ai {
            let data = BASE64.encode(&linear);
            if ai.send(ClientMessage::AudioInput { data }).is_err() {
                debug!("AI send queue full, dropping caller audio frame");
            }
        }

        if frames % self.config.audio.frame_log_interval == 0 {
            debug!(frames, "forwarding caller audio");
        }
    }

    /// One AI event from the reader task, in arrival order.
    fn handle_ai_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::AudioOutput { data } => {
                if let Some(sequencer) = &self.sequencer {
                    sequencer.enqueue(data);
                }
            }
            ServerEvent::UserInterruption => {
                info!(stream_sid = ?self.session.stream_sid(), "caller barge-in, halting playback");
                if let Some(sequencer) = &self.sequencer {
                    sequencer.clear_and_halt();
                }
            }
            ServerEvent::SessionSettingsResponse | ServerEvent::ChatMetadata { .. } => {
                let was_active = self.session.is_active();
                match self.session.mark_ready() {
                    Ok(()) if !was_active => {
                        info!(stream_sid = ?self.session.stream_sid(), "AI session ready, audio flowing");
                    }
                    Ok(()) => {}
                    Err(err) => warn!(error = %err, "readiness signal in unexpected state"),
                }
            }
            ServerEvent::ToolCall {
                tool_call_id,
                name,
                parameters,
            } => self.handle_tool_call(tool_call_id, name, parameters),
            ServerEvent::UserMessage { message } => {
                info!(
                    stream_sid = ?self.session.stream_sid(),
                    role = "caller",
                    content = message.content.as_deref().unwrap_or(""),
                    "transcript"
                );
            }
            ServerEvent::AssistantMessage { message } => {
                info!(
                    stream_sid = ?self.session.stream_sid(),
                    role = "assistant",
                    content = message.content.as_deref().unwrap_or(""),
                    "transcript"
                );
            }
            ServerEvent::Error { code, message } => {
                warn!(?code, message = %message, "AI service reported an error");
            }
            ServerEvent::Unknown => {
                debug!("ignoring unrecognized AI message kind");
            }
        }
    }

    /// Run one tool call to completion off the actor, guaranteeing exactly
    /// one `tool_response` for its call id.
    fn handle_tool_call(&mut self, tool_call_id: String, name: String, parameters: Option<Value>) {
        self.app_state.record_tool_call();
        let Some(ai) = self.ai.clone() else {
            warn!(tool = %name, "tool call arrived with no AI connection");
            return;
        };
        let backend = self.backend.clone();
        let caller = self.session.caller_context().cloned();

        tokio::spawn(async move {
            let outcome = tools::dispatch(&backend, caller.as_ref(), &name, parameters).await;
            let content = serde_json::to_string(&outcome).unwrap_or_else(|_| {
                r#"{"success":false,"message":"failed to encode tool result"}"#.to_string()
            });
            if let Err(err) = ai.send(ClientMessage::ToolResponse {
                tool_call_id,
                content,
            }) {
                warn!(error = %err, tool = %name, "failed to deliver tool response");
            }
        });
    }

    /// Idempotent session teardown: halt the sequencer, drop the AI leg,
    /// and settle the metrics. Safe to call from any handler any number of
    /// times.
    fn teardown(&mut self, reason: &str) {
        if !self.session.close() {
            return;
        }
        if let Some(sequencer) = &self.sequencer {
            self.app_state.add_dropped_chunks(sequencer.dropped_chunks());
            sequencer.halt();
        }
        // Dropping the last handle ends the writer task, which closes the
        // AI socket.
        self.ai = None;
        if self.call_registered {
            self.app_state.call_ended();
            self.call_registered = false;
        }
        info!(
            stream_sid = ?self.session.stream_sid(),
            call_sid = ?self.session.call_sid(),
            reason,
            "call session closed"
        );
    }
}

impl Actor for TelephonySocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("telephony connection started");

        // Ordered path from the sequencer's drain loop to the socket. This
        // actor is the only writer, so frames hit the wire in channel order.
        let (tx, rx) = mpsc::channel::<TelephonyOutbound>(OUTBOUND_BUFFER);
        self.sequencer = Some(OutboundSequencer::new(
            tx,
            self.config.audio.telephony_sample_rate,
            Duration::from_millis(self.config.ai.interruption_reset_ms),
        ));
        ctx.add_stream(ReceiverStream::new(rx));

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("telephony heartbeat timeout, closing connection");
                act.teardown("heartbeat timeout");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.teardown("connection closed");
    }
}

/// Inbound telephony frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TelephonySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<TelephonyMessage>(&text) {
                Ok(TelephonyMessage::Start { start }) => self.handle_start(start, ctx),
                Ok(TelephonyMessage::Media { media }) => self.handle_media(media.payload),
                Ok(TelephonyMessage::Stop) => {
                    info!(stream_sid = ?self.session.stream_sid(), "telephony stop event");
                    self.teardown("stop event");
                    ctx.stop();
                }
                Ok(TelephonyMessage::Mark { mark }) => {
                    // The provider's acknowledgement that buffered audio was
                    // discarded after a barge-in. Logged, not awaited.
                    debug!(name = %mark.name, "provider confirmed playback flush");
                }
                Ok(TelephonyMessage::Clear) => {
                    debug!("ignoring inbound clear event");
                }
                Ok(TelephonyMessage::Unknown) => {
                    debug!("ignoring unrecognized telephony event");
                }
                Err(err) => {
                    warn!(error = %err, "unparseable telephony message ignored");
                }
            },
            Ok(ws::Message::Binary(_)) => {
                warn!("unexpected binary frame on telephony connection");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(?reason, "telephony connection closed");
                self.teardown("socket closed");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(error = %err, "telephony protocol error");
                self.teardown("protocol error");
                ctx.stop();
            }
        }
    }
}

/// Ordered outbound frames from the sequencer.
impl StreamHandler<TelephonyOutbound> for TelephonySocket {
    fn handle(&mut self, frame: TelephonyOutbound, ctx: &mut Self::Context) {
        let message = match frame {
            TelephonyOutbound::Media { payload } => TelephonyMessage::Media {
                media: MediaPayload { payload },
            },
            TelephonyOutbound::Clear => TelephonyMessage::Clear,
            TelephonyOutbound::Mark { name } => TelephonyMessage::Mark {
                mark: MarkInfo { name },
            },
        };
        match serde_json::to_string(&message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(error = %err, "failed to encode outbound telephony frame"),
        }
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        // The sequencer dropped its sender during teardown; the actor's own
        // lifecycle decides when to stop.
        debug!("outbound frame stream ended");
    }
}

impl Handler<AiConnected> for TelephonySocket {
    type Result = ();

    fn handle(&mut self, msg: AiConnected, _ctx: &mut Self::Context) {
        if self.session.state() == SessionState::Closed {
            // The telephony leg ended while we were dialing; let the new
            // socket drop and close itself.
            debug!("AI connection completed after session close");
            return;
        }

        // Context priming goes out before any caller audio can be
        // forwarded; the session is not Active until the AI acknowledges
        // the settings sent during connect.
        if !self.primed {
            let text = context::render_priming(self.session.caller_context());
            if let Err(err) = msg.connection.send(ClientMessage::UserInput { text }) {
                warn!(error = %err, "failed to send context priming");
            }
            self.primed = true;
        }

        self.ai = Some(msg.connection);
        info!(stream_sid = ?self.session.stream_sid(), "AI connection established");
    }
}

impl Handler<AiFailed> for TelephonySocket {
    type Result = ();

    fn handle(&mut self, msg: AiFailed, ctx: &mut Self::Context) {
        error!(reason = %msg.reason, "AI connection failed, ending call");
        self.teardown("AI connection failed");
        ctx.stop();
    }
}

impl Handler<AiEventMessage> for TelephonySocket {
    type Result = ();

    fn handle(&mut self, msg: AiEventMessage, _ctx: &mut Self::Context) {
        self.handle_ai_event(msg.0);
    }
}

impl Handler<AiClosed> for TelephonySocket {
    type Result = ();

    fn handle(&mut self, _msg: AiClosed, ctx: &mut Self::Context) {
        if self.session.state() != SessionState::Closed {
            warn!(stream_sid = ?self.session.stream_sid(), "AI leg closed, ending call");
            self.teardown("AI connection closed");
            ctx.stop();
        }
    }
}

/// WebSocket endpoint handler for `/ws/telephony`.
///
/// Upgrades the HTTP request and hands the connection to a fresh
/// `TelephonySocket` actor. Everything per-call lives in that actor.
pub async fn telephony_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        peer = ?req.connection_info().peer_addr(),
        "new telephony connection request"
    );

    let config = app_state.get_config();
    let backend = BackendClient::new(config.tools.clone())?;
    let socket = TelephonySocket::new(app_state, config, backend);
    ws::start(socket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_event_parses_with_context_blob() {
        let json = r#"{
            "event": "start",
            "start": {
                "stream_sid": "MZ1234",
                "call_sid": "CA5678",
                "media_format": {"encoding": "audio/x-mulaw", "sample_rate": 8000, "channels": 1},
                "custom_parameters": "eyJmb3VuZCI6ZmFsc2V9"
            }
        }"#;
        match serde_json::from_str::<TelephonyMessage>(json).unwrap() {
            TelephonyMessage::Start { start } => {
                assert_eq!(start.stream_sid, "MZ1234");
                assert_eq!(start.call_sid, "CA5678");
                assert_eq!(start.media_format.unwrap().sample_rate, 8000);
                assert!(start.custom_parameters.is_some());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_media_and_stop_events_parse() {
        let media: TelephonyMessage =
            serde_json::from_str(r#"{"event":"media","media":{"payload":"f39/fw=="}}"#).unwrap();
        match media {
            TelephonyMessage::Media { media } => assert_eq!(media.payload, "f39/fw=="),
            other => panic!("wrong variant: {other:?}"),
        }

        let stop: TelephonyMessage = serde_json::from_str(r#"{"event":"stop"}"#).unwrap();
        assert!(matches!(stop, TelephonyMessage::Stop));
    }

    #[test]
    fn test_unknown_event_does_not_fail_parsing() {
        let msg: TelephonyMessage =
            serde_json::from_str(r#"{"event":"dtmf","digit":"5"}"#).unwrap();
        assert!(matches!(msg, TelephonyMessage::Unknown));
    }

    #[test]
    fn test_outbound_frames_serialize_with_event_tags() {
        let media = TelephonyMessage::Media {
            media: MediaPayload {
                payload: "AAAA".to_string(),
            },
        };
        let json: Value = serde_json::from_str(&serde_json::to_string(&media).unwrap()).unwrap();
        assert_eq!(json["event"], "media");
        assert_eq!(json["media"]["payload"], "AAAA");

        let clear = serde_json::to_string(&TelephonyMessage::Clear).unwrap();
        assert!(clear.contains(r#""event":"clear""#));

        let mark = TelephonyMessage::Mark {
            mark: MarkInfo {
                name: "barge-in-1".to_string(),
            },
        };
        let json: Value = serde_json::from_str(&serde_json::to_string(&mark).unwrap()).unwrap();
        assert_eq!(json["event"], "mark");
        assert_eq!(json["mark"]["name"], "barge-in-1");
    }
}
