//! # Configuration Management
//!
//! Loads gateway configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Secret/deployment environment variables (AI_API_KEY, TOOL_API_KEY,
//!    HOST, PORT)
//! 2. Environment variables with the APP_ prefix
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub ai: AiConfig,
    pub tools: ToolBackendConfig,
}

/// HTTP/WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Telephony media settings.
///
/// The provider's media stream is fixed-format: 8kHz mono μ-law. These are
/// configurable only so tests and future providers can vary them; the
/// defaults are what every production call uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub telephony_sample_rate: u32,
    pub telephony_channels: u16,

    /// Log one debug line per this many forwarded caller-audio frames.
    /// Per-session sampling; keeps a 50-frames-per-second stream from
    /// flooding the logs.
    pub frame_log_interval: u64,
}

/// Voice-AI service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// WebSocket endpoint of the conversational voice-AI service.
    pub ws_url: String,

    /// Bearer token; empty disables the Authorization header (local dev).
    pub api_key: String,

    /// Optional service-side configuration id appended as a query parameter.
    pub config_id: Option<String>,

    /// How long the barge-in interruption flag stays set before new AI
    /// audio may resume playing, in milliseconds.
    pub interruption_reset_ms: u64,
}

/// Tool backend endpoints and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolBackendConfig {
    pub base_url: String,
    pub api_key: String,
    pub caller_lookup_path: String,
    pub portal_link_path: String,
    pub callback_path: String,
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioConfig::default(),
            ai: AiConfig::default(),
            tools: ToolBackendConfig::default(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            telephony_sample_rate: 8000, // G.711 telephony rate
            telephony_channels: 1,       // Mono
            frame_log_interval: 50,      // Roughly one line per second of audio
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:9100/v1/agent".to_string(),
            api_key: String::new(),
            config_id: None,
            interruption_reset_ms: 200,
        }
    }
}

impl Default for ToolBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            api_key: String::new(),
            caller_lookup_path: "/api/callers/lookup".to_string(),
            portal_link_path: "/api/portal-links".to_string(),
            callback_path: "/api/callbacks".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    ///
    /// Secrets never belong in config.toml, so AI_API_KEY and TOOL_API_KEY
    /// are read directly from the environment, as are the HOST/PORT
    /// variables deployment platforms set.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(key) = env::var("AI_API_KEY") {
            settings = settings.set_override("ai.api_key", key)?;
        }
        if let Ok(url) = env::var("AI_WS_URL") {
            settings = settings.set_override("ai.ws_url", url)?;
        }
        if let Ok(key) = env::var("TOOL_API_KEY") {
            settings = settings.set_override("tools.api_key", key)?;
        }
        if let Ok(url) = env::var("TOOL_BASE_URL") {
            settings = settings.set_override("tools.base_url", url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }
        if self.audio.telephony_sample_rate == 0 {
            return Err(anyhow::anyhow!("Telephony sample rate cannot be 0"));
        }
        if self.audio.frame_log_interval == 0 {
            return Err(anyhow::anyhow!("Frame log interval must be greater than 0"));
        }
        if self.ai.ws_url.is_empty() {
            return Err(anyhow::anyhow!("AI WebSocket URL cannot be empty"));
        }
        if self.ai.interruption_reset_ms == 0 {
            return Err(anyhow::anyhow!("Interruption reset must be greater than 0"));
        }
        if self.tools.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Tool request timeout must be greater than 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.audio.telephony_sample_rate, 8000);
        assert_eq!(config.audio.telephony_channels, 1);
        assert_eq!(config.ai.interruption_reset_ms, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_port() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_broken_audio_settings() {
        let mut config = AppConfig::default();
        config.audio.telephony_sample_rate = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.frame_log_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_ai_endpoint() {
        let mut config = AppConfig::default();
        config.ai.ws_url = String::new();
        assert!(config.validate().is_err());
    }
}
