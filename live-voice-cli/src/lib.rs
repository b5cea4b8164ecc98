//! # live-voice-cli
//!
//! Terminal front end for [`live_voice`]: speak to Gemini Live through the default
//! microphone and hear the reply on the default speaker.
//!
//! ```text
//! GEMINI_API_KEY=... live-voice --voice Puck --meter
//! ```
//!
//! Use `--dry-run` to replace the sound card with a synthetic tone and a silent sink.

pub mod app;
pub mod cli;
pub mod config;
pub mod tools;

pub use cli::Cli;
pub use config::AppConfig;

use std::sync::Once;

static INIT_TRACING: Once = Once::new();

/// Install the global `tracing` subscriber. `filter` wins over `RUST_LOG`; default `info`.
pub fn init_tracing(filter: Option<&str>) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    INIT_TRACING.call_once(|| {
        let filter = match filter {
            Some(f) => EnvFilter::new(f),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        };
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
    });
}
