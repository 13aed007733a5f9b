//! # Error Handling
//!
//! Custom error types for the gateway and their conversion to HTTP
//! responses on the operational endpoints.
//!
//! ## Error Taxonomy:
//! - **Codec failures** never reach this type: transcoding returns empty
//!   results and the offending chunk is dropped, because one bad chunk must
//!   not end a call.
//! - **Protocol**: unexpected or malformed wire messages on either leg.
//!   Logged and ignored for forward compatibility.
//! - **Tool**: backend call failures and malformed tool parameters. Always
//!   converted to a structured `{success: false}` tool result.
//! - **Connection**: a leg disconnecting unexpectedly. Fatal to that one
//!   session only; there is no cross-session fatal condition.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// Server-side problems with no more specific category
    Internal(String),

    /// A wire message violated the expected protocol shape
    Protocol(String),

    /// A tool backend operation failed
    Tool(String),

    /// One of the session's two connections failed
    Connection(String),

    /// Configuration file or environment variable problems
    ConfigError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            AppError::Tool(msg) => write!(f, "Tool dispatch error: {}", msg),
            AppError::Connection(msg) => write!(f, "Connection error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::Protocol(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "protocol_error",
                msg.clone(),
            ),
            AppError::Tool(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "tool_error",
                msg.clone(),
            ),
            AppError::Connection(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "connection_error",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Protocol(format!("JSON error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Tool(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::Connection(err.to_string())
    }
}

/// Shorthand for Results that use the gateway's error type.
pub type AppResult<T> = Result<T, AppError>;
