use clap::{Parser, ValueEnum};
use live_voice::ResponseModality;
use live_voice::config::DEFAULT_MODEL;

/// Talk to Gemini Live from the terminal.
#[derive(Parser, Debug, Clone)]
#[command(name = "live-voice")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Gemini API key (falls back to GOOGLE_API_KEY)
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Live model to connect to
    #[arg(short, long, env = "LIVE_VOICE_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Prebuilt voice for spoken replies
    #[arg(short, long, env = "LIVE_VOICE_VOICE")]
    pub voice: Option<String>,

    /// System instruction for the assistant
    #[arg(short = 'i', long, env = "LIVE_VOICE_INSTRUCTION")]
    pub instruction: Option<String>,

    /// Reply modality
    #[arg(long, value_enum, default_value_t = Modality::Audio)]
    pub modality: Modality,

    /// Let the model ground answers with Google Search
    #[arg(long)]
    pub google_search: bool,

    /// Length of each microphone chunk sent upstream, in milliseconds
    #[arg(long, default_value_t = 20)]
    pub chunk_ms: u64,

    /// Debounce window for batching tool responses, in milliseconds
    #[arg(long, default_value_t = 200)]
    pub tool_delay_ms: u64,

    /// Text turn sent right after the session opens
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Input device name (default device when omitted)
    #[arg(long)]
    pub input_device: Option<String>,

    /// Output device name (default device when omitted)
    #[arg(long)]
    pub output_device: Option<String>,

    /// List input devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a synthetic tone for the microphone and a silent speaker
    #[arg(long)]
    pub dry_run: bool,

    /// Draw live input/output level bars on stderr
    #[arg(long)]
    pub meter: bool,

    /// Log filter, e.g. `live_voice=debug` (overrides RUST_LOG)
    #[arg(long)]
    pub log: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Modality {
    Audio,
    Text,
}

impl From<Modality> for ResponseModality {
    fn from(m: Modality) -> Self {
        match m {
            Modality::Audio => ResponseModality::Audio,
            Modality::Text => ResponseModality::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["live-voice"]).unwrap();
        assert_eq!(cli.model, DEFAULT_MODEL);
        assert_eq!(cli.chunk_ms, 20);
        assert_eq!(cli.tool_delay_ms, 200);
        assert_eq!(cli.modality, Modality::Audio);
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "live-voice",
            "--voice",
            "Kore",
            "--modality",
            "text",
            "--google-search",
            "--dry-run",
            "--chunk-ms",
            "40",
        ])
        .unwrap();
        assert_eq!(cli.voice.as_deref(), Some("Kore"));
        assert_eq!(ResponseModality::from(cli.modality), ResponseModality::Text);
        assert!(cli.google_search);
        assert!(cli.dry_run);
        assert_eq!(cli.chunk_ms, 40);
    }
}
