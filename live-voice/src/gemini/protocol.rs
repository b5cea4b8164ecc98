//! Gemini Live `BidiGenerateContent` message format.
//!
//! Outbound frames are built from typed structs; inbound frames are walked as
//! JSON values and translated into [`SessionEvent`]s.

use crate::audio::MediaChunk;
use crate::config::{ResponseModality, SessionConfig, ToolDeclaration};
use crate::error::{RealtimeError, Result};
use crate::events::{FunctionCall, SessionEvent, ToolResponse};
use base64::Engine;
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    setup: Option<Setup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    realtime_input: Option<RealtimeInput<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_content: Option<ClientContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_response: Option<ToolResponseMessage<'a>>,
}

impl ClientMessage<'_> {
    fn empty() -> Self {
        Self { setup: None, realtime_input: None, client_content: None, tool_response: None }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    generation_config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput<'a> {
    media_chunks: &'a [MediaChunk],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContent<'a> {
    turns: Vec<Turn<'a>>,
    turn_complete: bool,
}

#[derive(Debug, Serialize)]
struct Turn<'a> {
    role: &'static str,
    parts: Vec<TurnPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TurnPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolResponseMessage<'a> {
    function_responses: Vec<FunctionResponse<'a>>,
}

#[derive(Debug, Serialize)]
struct FunctionResponse<'a> {
    id: &'a str,
    name: &'a str,
    response: Value,
}

/// The first frame of every connection.
pub fn setup_frame(config: &SessionConfig) -> Result<String> {
    let modality = match config.response_modality {
        ResponseModality::Audio => "AUDIO",
        ResponseModality::Text => "TEXT",
    };
    let mut generation_config = json!({ "responseModalities": [modality] });
    if let Some(voice) = &config.voice {
        generation_config["speechConfig"] = json!({
            "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
        });
    }
    if let Some(temp) = config.temperature {
        generation_config["temperature"] = json!(temp);
    }

    let message = ClientMessage {
        setup: Some(Setup {
            model: config.model_resource(),
            generation_config,
            system_instruction: config
                .system_instruction
                .as_ref()
                .map(|text| Content { parts: vec![TextPart { text: text.clone() }] }),
            tools: convert_tools(&config.tools, config.google_search),
        }),
        ..ClientMessage::empty()
    };
    Ok(serde_json::to_string(&message)?)
}

/// Streaming input: microphone audio and camera stills.
pub fn realtime_input_frame(chunks: &[MediaChunk]) -> Result<String> {
    let message = ClientMessage {
        realtime_input: Some(RealtimeInput { media_chunks: chunks }),
        ..ClientMessage::empty()
    };
    Ok(serde_json::to_string(&message)?)
}

/// A user text turn.
pub fn client_content_frame(text: &str, turn_complete: bool) -> Result<String> {
    let message = ClientMessage {
        client_content: Some(ClientContent {
            turns: vec![Turn { role: "user", parts: vec![TurnPart { text }] }],
            turn_complete,
        }),
        ..ClientMessage::empty()
    };
    Ok(serde_json::to_string(&message)?)
}

/// One frame answering every response in `responses`, in order.
pub fn tool_response_frame(responses: &[ToolResponse]) -> Result<String> {
    let message = ClientMessage {
        tool_response: Some(ToolResponseMessage {
            function_responses: responses
                .iter()
                .map(|r| FunctionResponse {
                    id: &r.id,
                    name: &r.name,
                    response: json!({ "output": r.output }),
                })
                .collect(),
        }),
        ..ClientMessage::empty()
    };
    Ok(serde_json::to_string(&message)?)
}

fn convert_tools(tools: &[ToolDeclaration], google_search: bool) -> Vec<Value> {
    let mut out = Vec::new();
    if !tools.is_empty() {
        let function_declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description.clone().unwrap_or_default(),
                    "parameters": t.parameters.clone()
                        .unwrap_or_else(|| json!({ "type": "object", "properties": {} }))
                })
            })
            .collect();
        out.push(json!({ "functionDeclarations": function_declarations }));
    }
    if google_search {
        out.push(json!({ "googleSearch": {} }));
    }
    out
}

/// Translate one inbound frame into events, in the order they should be delivered.
///
/// Frames this client has no use for (usage metadata, transcriptions) yield no events.
pub fn decode_server_message(raw: &str) -> Result<Vec<SessionEvent>> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| RealtimeError::protocol(format!("Parse error: {e}")))?;
    if !value.is_object() {
        return Err(RealtimeError::protocol("server message is not a JSON object"));
    }

    let mut events = Vec::new();

    if value.get("setupComplete").is_some() {
        events.push(SessionEvent::SetupComplete);
    }

    if let Some(content) = value.get("serverContent") {
        if let Some(parts) =
            content.get("modelTurn").and_then(|t| t.get("parts")).and_then(Value::as_array)
        {
            for part in parts {
                if let Some(inline) = part.get("inlineData") {
                    let mime = inline.get("mimeType").and_then(Value::as_str).unwrap_or("");
                    let Some(data) = inline.get("data").and_then(Value::as_str) else {
                        return Err(RealtimeError::protocol("inlineData without data"));
                    };
                    if mime.is_empty() || mime.starts_with("audio/") {
                        let bytes = base64::engine::general_purpose::STANDARD
                            .decode(data)
                            .map_err(|e| RealtimeError::protocol(format!("Invalid audio: {e}")))?;
                        events.push(SessionEvent::Audio(bytes));
                    } else {
                        tracing::debug!(%mime, "ignoring non-audio inline data");
                    }
                }
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    events.push(SessionEvent::Text(text.to_string()));
                }
            }
        }
        if content.get("interrupted").and_then(Value::as_bool).unwrap_or(false) {
            events.push(SessionEvent::Interrupted);
        }
        if content.get("turnComplete").and_then(Value::as_bool).unwrap_or(false) {
            events.push(SessionEvent::TurnComplete);
        }
    }

    if let Some(tool_call) = value.get("toolCall") {
        let calls = tool_call
            .get("functionCalls")
            .and_then(Value::as_array)
            .ok_or_else(|| RealtimeError::protocol("toolCall without functionCalls"))?;
        let calls = calls
            .iter()
            .map(|call| {
                let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
                let name = call
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RealtimeError::protocol("function call without name"))?;
                Ok(FunctionCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    args: call.get("args").cloned().unwrap_or_else(|| json!({})),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        events.push(SessionEvent::ToolCall(calls));
    }

    if let Some(cancel) = value.get("toolCallCancellation") {
        let ids = cancel
            .get("ids")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        events.push(SessionEvent::ToolCallCancellation(ids));
    }

    if let Some(go_away) = value.get("goAway") {
        let time_left = go_away.get("timeLeft").and_then(Value::as_str).and_then(parse_duration);
        events.push(SessionEvent::GoAway { time_left });
    }

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        events.push(SessionEvent::Error(message));
    }

    if events.is_empty() {
        tracing::debug!("server message produced no events");
    }
    Ok(events)
}

/// Parse a protobuf JSON duration such as `"12.5s"`.
fn parse_duration(s: &str) -> Option<Duration> {
    let secs: f64 = s.strip_suffix('s')?.parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}
