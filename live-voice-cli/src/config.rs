use crate::cli::Cli;
use crate::tools;
use anyhow::{Context, Result, bail};
use live_voice::{ClientOptions, RecorderConfig, SessionConfig};
use std::time::Duration;

const DEFAULT_INSTRUCTION: &str = "You are a friendly voice assistant. Keep answers short and \
conversational. When the user asks for a graph, call render_chart.";

/// Everything the app needs, resolved from flags, environment and `.env`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub session: SessionConfig,
    pub options: ClientOptions,
    pub recorder: RecorderConfig,
    pub prompt: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub dry_run: bool,
    pub meter: bool,
}

impl AppConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let api_key = cli
            .api_key
            .clone()
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .context("GEMINI_API_KEY or GOOGLE_API_KEY environment variable not set")?;

        if cli.chunk_ms == 0 {
            bail!("--chunk-ms must be at least 1");
        }

        let mut session = SessionConfig::new(cli.model.clone())
            .with_modality(cli.modality.into())
            .with_instruction(cli.instruction.clone().unwrap_or_else(|| DEFAULT_INSTRUCTION.into()))
            .with_tool(tools::render_chart_declaration())
            .with_google_search(cli.google_search);
        if let Some(voice) = &cli.voice {
            session = session.with_voice(voice.clone());
        }
        session.validate().context("invalid session configuration")?;

        Ok(Self {
            api_key,
            session,
            options: ClientOptions::default()
                .with_tool_response_delay(Duration::from_millis(cli.tool_delay_ms)),
            recorder: RecorderConfig::default()
                .with_chunk_duration(Duration::from_millis(cli.chunk_ms)),
            prompt: cli.prompt.clone(),
            input_device: cli.input_device.clone(),
            output_device: cli.output_device.clone(),
            dry_run: cli.dry_run,
            meter: cli.meter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("live-voice").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_builds_session_with_chart_tool() {
        let config = AppConfig::from_cli(&parse(&["--api-key", "k", "--voice", "Puck"])).unwrap();
        assert_eq!(config.api_key, "k");
        assert_eq!(config.session.voice.as_deref(), Some("Puck"));
        assert_eq!(config.session.tools.len(), 1);
        assert_eq!(config.session.tools[0].name, tools::RENDER_CHART);
        assert_eq!(config.options.tool_response_delay, Duration::from_millis(200));
        assert_eq!(config.recorder.chunk_bytes(), 640);
    }

    #[test]
    fn test_rejects_zero_chunk() {
        let err = AppConfig::from_cli(&parse(&["--api-key", "k", "--chunk-ms", "0"])).unwrap_err();
        assert!(err.to_string().contains("chunk-ms"));
    }

    #[test]
    fn test_rejects_blank_voice() {
        assert!(AppConfig::from_cli(&parse(&["--api-key", "k", "--voice", " "])).is_err());
    }
}
