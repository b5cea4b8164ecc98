//! Gemini Live API.
//!
//! - Input audio: 16kHz mono PCM (`audio/pcm;rate=16000`)
//! - Output audio: 24kHz mono PCM
//! - Tool calls arrive as `toolCall.functionCalls` and are answered with one
//!   `toolResponse` frame
//!
//! [`protocol`] builds and parses frames; `WebSocketTransport` (feature
//! `gemini`) carries them.

pub mod protocol;
#[cfg(feature = "gemini")]
mod transport;

#[cfg(feature = "gemini")]
pub use transport::WebSocketTransport;

pub use crate::config::{DEFAULT_MODEL, GEMINI_VOICES};

/// Gemini Live API WebSocket URL.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
