//! # live-voice
//!
//! Real-time duplex voice pipeline and Gemini Live session client.
//!
//! ## Architecture
//!
//! Two execution contexts cooperate:
//!
//! - the **control context** (tokio tasks) owns the [`LiveSessionClient`] state
//!   machine, the send calls and every application callback;
//! - the **render context** (audio device threads) runs the fixed-size block
//!   callbacks: [`CaptureProcessor`], [`PlaybackRenderer`] and their
//!   [`VolumeMeter`]s.
//!
//! They only talk through wait-free `rtrb` ring buffers, so a device callback
//! never waits on a lock held by the control side.
//!
//! ```text
//!  microphone ─▶ CaptureProcessor ──ring──▶ AudioInputRecorder ─data─▶ LiveSessionClient
//!                                                                          │
//!  speaker ◀── PlaybackRenderer ◀──ring── AudioOutputStreamer ◀──Audio─────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use live_voice::gemini::WebSocketTransport;
//! use live_voice::{EventKind, LiveSessionClient, SessionConfig, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(WebSocketTransport::new(std::env::var("GEMINI_API_KEY")?));
//!     let client = LiveSessionClient::new(transport);
//!
//!     client.on(EventKind::Audio, |event| {
//!         if let SessionEvent::Audio(pcm) = event {
//!             println!("{} bytes of reply audio", pcm.len());
//!         }
//!     });
//!
//!     client
//!         .connect_with(SessionConfig::default().with_instruction("You are a helpful assistant."))
//!         .await?;
//!     client.send_text("Hello!", true)?;
//!     // ...
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod gemini;
pub mod input;
pub mod output;
pub mod resample;
pub mod session;
pub mod transport;
pub mod volume;

pub use audio::{AudioChunk, AudioFormat, MediaChunk};
pub use config::{ClientOptions, ResponseModality, SessionConfig, ToolDeclaration};
pub use error::{RealtimeError, Result};
pub use events::{EventKind, FunctionCall, ListenerId, SessionEvent, ToolResponse};
pub use input::{AudioInputRecorder, CaptureProcessor, CaptureSink, RecorderConfig};
pub use output::{AudioClock, AudioOutputStreamer, PlaybackEntry, PlaybackRenderer, StreamerConfig};
pub use session::{LiveSessionClient, SessionState};
pub use transport::{FrameSink, FrameSource, Transport, TransportFrame};
pub use volume::{VolumeLevels, VolumeMeter};
