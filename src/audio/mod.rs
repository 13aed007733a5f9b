//! # Audio Pipeline
//!
//! Everything between the two legs' wire formats: G.711 μ-law transcoding,
//! WAV envelope handling, and the ordered outbound playback queue.
//!
//! ## Data Flow:
//! - **Inbound**: telephony μ-law frame → `codec` → linear16 → AI leg
//! - **Outbound**: AI WAV clip → `sequencer` → `wav` (parse + decimate) →
//!   `codec` (μ-law encode) → telephony leg, strictly one chunk at a time
//!
//! ## Telephony Format:
//! 8kHz, mono, 8-bit μ-law. The AI leg negotiates linear16 at the same rate
//! for input; its output clips arrive at whatever native rate the service
//! uses and are decimated here.

pub mod codec;
pub mod sequencer;
pub mod wav;
