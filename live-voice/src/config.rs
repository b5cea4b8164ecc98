//! Configuration types for live sessions.

use crate::error::{RealtimeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

/// Default model for Gemini Live.
pub const DEFAULT_MODEL: &str = "models/gemini-live-2.5-flash-native-audio";

/// Prebuilt voices offered by the native-audio models.
pub const GEMINI_VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

/// What the model replies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseModality {
    /// Spoken replies streamed as PCM.
    #[default]
    Audio,
    /// Text replies.
    Text,
}

impl std::str::FromStr for ResponseModality {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(Self::Audio),
            "text" => Ok(Self::Text),
            other => Err(RealtimeError::config(format!("unknown response modality '{other}'"))),
        }
    }
}

/// Function the model may call during the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    /// Function name.
    pub name: String,
    /// What the function does, shown to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl ToolDeclaration {
    /// Create a new tool declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None, parameters: None }
    }

    /// Set the tool description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set the parameters schema.
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }
}

/// Everything the setup frame carries. Read once per connection attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Model resource name, e.g. `models/gemini-live-2.5-flash-native-audio`.
    pub model: String,
    /// Reply modality.
    #[serde(default)]
    pub response_modality: ResponseModality,
    /// Prebuilt voice name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// System instruction text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    /// Declared functions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDeclaration>,
    /// Let the model ground answers with Google Search.
    #[serde(default)]
    pub google_search: bool,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl SessionConfig {
    /// Create a configuration for `model` with audio replies.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            response_modality: ResponseModality::Audio,
            voice: None,
            system_instruction: None,
            tools: Vec::new(),
            google_search: false,
            temperature: None,
        }
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the reply modality.
    pub fn with_modality(mut self, modality: ResponseModality) -> Self {
        self.response_modality = modality;
        self
    }

    /// Set the voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Set the system instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Add a tool declaration.
    pub fn with_tool(mut self, tool: ToolDeclaration) -> Self {
        self.tools.push(tool);
        self
    }

    /// Enable or disable Google Search grounding.
    pub fn with_google_search(mut self, enabled: bool) -> Self {
        self.google_search = enabled;
        self
    }

    /// Set temperature.
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    /// Model name with the `models/` prefix the endpoint expects.
    pub fn model_resource(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }

    /// Check the configuration before any transport activity.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() || self.model.trim() == "models/" {
            return Err(RealtimeError::config("model must not be empty"));
        }
        if let Some(voice) = &self.voice {
            if voice.trim().is_empty() {
                return Err(RealtimeError::config("voice must not be empty when set"));
            }
            if !GEMINI_VOICES.contains(&voice.as_str()) {
                tracing::warn!(%voice, "voice is not one of the known prebuilt voices");
            }
        }
        if let Some(temp) = self.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err(RealtimeError::config(format!(
                    "temperature {temp} outside 0.0..=2.0"
                )));
            }
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(RealtimeError::config("tool name must not be empty"));
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(RealtimeError::config(format!("duplicate tool '{}'", tool.name)));
            }
        }
        Ok(())
    }
}

/// Client behavior that is not part of the wire setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Debounce window for batching tool responses into one frame.
    pub tool_response_delay: Duration,
    /// Upper bound on opening the transport and writing the setup frame.
    pub connect_timeout: Duration,
    /// Realtime input frames that may wait for the socket before new ones are dropped.
    pub realtime_queue: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            tool_response_delay: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(10),
            // 64 frames of 20 ms microphone audio.
            realtime_queue: 64,
        }
    }
}

impl ClientOptions {
    /// Set the tool response debounce window.
    pub fn with_tool_response_delay(mut self, delay: Duration) -> Self {
        self.tool_response_delay = delay;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set how many realtime input frames may be queued behind a slow socket.
    pub fn with_realtime_queue(mut self, frames: usize) -> Self {
        self.realtime_queue = frames;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert_eq!(config.response_modality, ResponseModality::Audio);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_model_resource_prefix() {
        assert_eq!(
            SessionConfig::new("gemini-2.0-flash-exp").model_resource(),
            "models/gemini-2.0-flash-exp"
        );
        assert_eq!(SessionConfig::new("models/x").model_resource(), "models/x");
    }

    #[test]
    fn test_validation_failures() {
        assert!(SessionConfig::new("").validate().is_err());
        assert!(SessionConfig::default().with_voice(" ").validate().is_err());
        assert!(SessionConfig::default().with_temperature(3.0).validate().is_err());
        assert!(
            SessionConfig::default()
                .with_tool(ToolDeclaration::new("a"))
                .with_tool(ToolDeclaration::new("a"))
                .validate()
                .is_err()
        );
        assert!(SessionConfig::default().with_tool(ToolDeclaration::new("")).validate().is_err());
    }

    #[test]
    fn test_modality_parse_and_serde() {
        assert_eq!("TEXT".parse::<ResponseModality>().unwrap(), ResponseModality::Text);
        assert!("video".parse::<ResponseModality>().is_err());
        assert_eq!(serde_json::to_value(ResponseModality::Audio).unwrap(), json!("AUDIO"));
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::default()
            .with_voice("Kore")
            .with_instruction("Be brief.")
            .with_google_search(true)
            .with_tool(
                ToolDeclaration::new("render_chart")
                    .with_description("Render a chart")
                    .with_parameters(json!({"type": "object"})),
            );
        assert_eq!(config.voice.as_deref(), Some("Kore"));
        assert!(config.google_search);
        assert_eq!(config.tools.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_options_defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.tool_response_delay, Duration::from_millis(200));
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert_eq!(options.realtime_queue, 64);
    }
}
