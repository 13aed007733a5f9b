//! # Voice-AI Connection Client
//!
//! Opens the per-call WebSocket to the voice-AI service and keeps both
//! directions ordered without blocking the session's event handlers.
//!
//! ## Task Layout:
//! - A **writer task** drains a bounded channel of [`ClientMessage`]s and
//!   owns the socket's sink half; every outbound message goes through it,
//!   so writes can never interleave.
//! - A **reader task** parses inbound frames and forwards them to the
//!   session actor's mailbox, preserving arrival order.
//!
//! Dropping the last [`AiConnection`] handle ends the writer task, which
//! closes the socket; the reader then reports the closure to the session.

use crate::ai::protocol::{AudioFormat, ClientMessage, ServerEvent};
use crate::config::AiConfig;
use crate::error::{AppError, AppResult};
use actix::prelude::{Message, Recipient};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

/// How many outbound messages may queue before audio frames get dropped.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// A parsed AI event delivered to the session actor.
#[derive(Message)]
#[rtype(result = "()")]
pub struct AiEventMessage(pub ServerEvent);

/// The AI leg closed, cleanly or otherwise.
#[derive(Message)]
#[rtype(result = "()")]
pub struct AiClosed;

/// Handle for sending to an open AI connection.
///
/// Cloned into tool-dispatch tasks; the underlying socket closes once every
/// clone is gone.
#[derive(Clone)]
pub struct AiConnection {
    tx: mpsc::Sender<ClientMessage>,
}

impl AiConnection {
    /// Queue a message for ordered delivery.
    ///
    /// Non-blocking so it can be called from the session's event handlers.
    /// A full queue means the AI leg has stalled badly; the frame is dropped
    /// rather than stalling the telephony leg with it.
    pub fn send(&self, message: ClientMessage) -> AppResult<()> {
        self.tx
            .try_send(message)
            .map_err(|_| AppError::Connection("AI send queue full or closed".to_string()))
    }
}

/// Open the voice-AI WebSocket for one call session.
///
/// Sends the `session_settings` handshake before returning, so the first
/// message the service sees is always the audio configuration. Parsed
/// events flow to `events`; `closed` fires once when the socket ends.
pub async fn connect(
    config: &AiConfig,
    telephony_rate: u32,
    events: Recipient<AiEventMessage>,
    closed: Recipient<AiClosed>,
) -> AppResult<AiConnection> {
    let mut url = config.ws_url.clone();
    if let Some(config_id) = &config.config_id {
        let separator = if url.contains('?') { '&' } else { '?' };
        url.push(separator);
        url.push_str("config_id=");
        url.push_str(config_id);
    }

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| AppError::Connection(format!("invalid AI endpoint: {e}")))?;
    if !config.api_key.is_empty() {
        let value = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| AppError::Connection(format!("invalid AI api key: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (socket, _response) = connect_async(request).await?;
    let (mut write, mut read) = socket.split();

    // Session-configuration handshake: telephony-rate mono linear16.
    let settings = ClientMessage::SessionSettings {
        audio: AudioFormat::linear16(telephony_rate, 1),
    };
    let json = serde_json::to_string(&settings)?;
    write.send(WsMessage::Text(json)).await?;

    let (tx, mut rx) = mpsc::channel::<ClientMessage>(OUTBOUND_QUEUE_DEPTH);

    // Writer: sole owner of the sink half.
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to encode AI message, skipping");
                    continue;
                }
            };
            if let Err(err) = write.send(WsMessage::Text(json)).await {
                warn!(error = %err, "AI socket write failed");
                break;
            }
        }
        let _ = write.send(WsMessage::Close(None)).await;
    });

    // Reader: forwards parsed events to the session actor in arrival order.
    tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => {
                        // Best effort: the session actor may already be gone
                        // during teardown.
                        events.do_send(AiEventMessage(event));
                    }
                    Err(err) => {
                        // Malformed frames are logged and skipped; one bad
                        // message must not end the call.
                        warn!(error = %err, "unparseable AI message ignored");
                    }
                },
                Ok(WsMessage::Close(reason)) => {
                    debug!(?reason, "AI socket closed");
                    break;
                }
                Ok(_) => {
                    // Ping/pong and binary frames carry nothing for us.
                }
                Err(err) => {
                    warn!(error = %err, "AI socket read failed");
                    break;
                }
            }
        }
        closed.do_send(AiClosed);
    });

    Ok(AiConnection { tx })
}
