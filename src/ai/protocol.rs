//! # Voice-AI Wire Protocol
//!
//! JSON messages exchanged with the voice-AI service, discriminated by a
//! `type` field. The inbound set is deliberately open: kinds this gateway
//! does not recognize deserialize into `Unknown` and are ignored, so new
//! message kinds the service introduces never break an in-progress call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audio format block sent in `session_settings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// The format this gateway always requests: telephony-rate mono linear16.
    pub fn linear16(sample_rate: u32, channels: u16) -> Self {
        Self {
            encoding: "linear16".to_string(),
            sample_rate,
            channels,
        }
    }
}

/// Messages the gateway sends to the AI service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Session-configuration handshake, sent first on every connection.
    SessionSettings { audio: AudioFormat },

    /// Base64 linear16 caller audio.
    AudioInput { data: String },

    /// Text injected into the conversation, used for context priming.
    UserInput { text: String },

    /// Structured result for a tool call, JSON-encoded in `content`.
    ToolResponse { tool_call_id: String, content: String },
}

/// Conversation content carried by transcript events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatContent {
    #[serde(default)]
    pub content: Option<String>,
}

/// Messages the AI service sends to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// An audio clip to play to the caller: base64 WAV.
    AudioOutput { data: String },

    /// The caller spoke over in-progress playback.
    UserInterruption,

    /// Transcript of what the caller said.
    UserMessage { message: ChatContent },

    /// Transcript of what the assistant said.
    AssistantMessage { message: ChatContent },

    /// Settings acknowledgement; counts as a readiness signal.
    SessionSettingsResponse,

    /// Chat bookkeeping; also counts as a readiness signal.
    ChatMetadata {
        #[serde(default)]
        chat_id: Option<String>,
    },

    /// The AI wants a backend operation performed mid-conversation.
    ToolCall {
        tool_call_id: String,
        name: String,
        #[serde(default)]
        parameters: Option<Value>,
    },

    /// Service-side error report.
    Error {
        #[serde(default)]
        code: Option<String>,
        message: String,
    },

    /// Any message kind this gateway does not handle.
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Whether this event means the AI session is ready to accept audio.
    ///
    /// The exact acknowledgement kind is not contractually fixed by the
    /// service, so every settings/metadata acknowledgement is treated as
    /// equivalent.
    pub fn is_ready_signal(&self) -> bool {
        matches!(
            self,
            ServerEvent::SessionSettingsResponse | ServerEvent::ChatMetadata { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_settings_serializes_with_type_tag() {
        let msg = ClientMessage::SessionSettings {
            audio: AudioFormat::linear16(8000, 1),
        };
        let json: Value = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "session_settings");
        assert_eq!(json["audio"]["encoding"], "linear16");
        assert_eq!(json["audio"]["sample_rate"], 8000);
        assert_eq!(json["audio"]["channels"], 1);
    }

    #[test]
    fn test_tool_response_carries_call_id() {
        let msg = ClientMessage::ToolResponse {
            tool_call_id: "tc_42".to_string(),
            content: r#"{"success":true}"#.to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"tool_response""#));
        assert!(json.contains("tc_42"));
    }

    #[test]
    fn test_audio_output_parses() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"audio_output","data":"UklGRg=="}"#).unwrap();
        match event {
            ServerEvent::AudioOutput { data } => assert_eq!(data, "UklGRg=="),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_tool_call_accepts_string_and_object_parameters() {
        let as_object: ServerEvent = serde_json::from_str(
            r#"{"type":"tool_call","tool_call_id":"tc_1","name":"check_caller_details","parameters":{"phone_number":"+441234"}}"#,
        )
        .unwrap();
        match as_object {
            ServerEvent::ToolCall { parameters, .. } => {
                assert!(parameters.unwrap().is_object());
            }
            other => panic!("wrong variant: {other:?}"),
        }

        let as_string: ServerEvent = serde_json::from_str(
            r#"{"type":"tool_call","tool_call_id":"tc_2","name":"send_portal_link","parameters":"{\"phone_number\":\"+441234\"}"}"#,
        )
        .unwrap();
        match as_string {
            ServerEvent::ToolCall { parameters, .. } => {
                assert!(parameters.unwrap().is_string());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_readiness_signals() {
        let settings: ServerEvent =
            serde_json::from_str(r#"{"type":"session_settings_response"}"#).unwrap();
        assert!(settings.is_ready_signal());

        let metadata: ServerEvent =
            serde_json::from_str(r#"{"type":"chat_metadata","chat_id":"chat_7"}"#).unwrap();
        assert!(metadata.is_ready_signal());

        let audio: ServerEvent =
            serde_json::from_str(r#"{"type":"audio_output","data":""}"#).unwrap();
        assert!(!audio.is_ready_signal());
    }

    #[test]
    fn test_unrecognized_kind_becomes_unknown() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"brand_new_event","payload":{"x":1}}"#).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }
}
