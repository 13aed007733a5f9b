//! # Voice-AI Leg
//!
//! Client side of the conversational voice-AI service. One outbound
//! WebSocket per active call, opened when the telephony `start` event
//! arrives and closed with the session.
//!
//! ## Key Components:
//! - **protocol**: `type`-tagged message enums for both directions
//! - **client**: connection setup plus the reader/writer tasks that keep
//!   the socket ordered without ever blocking the session's event handlers

pub mod client;
pub mod protocol;
