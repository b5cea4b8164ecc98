//! Local functions the model can call.

use live_voice::{FunctionCall, ToolDeclaration, ToolResponse};
use serde_json::{Value, json};

pub const RENDER_CHART: &str = "render_chart";

/// Declaration for the chart tool. The model passes a Vega-Lite spec as a JSON string.
pub fn render_chart_declaration() -> ToolDeclaration {
    ToolDeclaration::new(RENDER_CHART)
        .with_description("Displays a graph for the user from a Vega-Lite JSON specification.")
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "json_graph": {
                    "type": "string",
                    "description": "JSON STRING representation of the graph to render. \
                        Must be a string, not a json object",
                }
            },
            "required": ["json_graph"],
        }))
}

/// Answer one call. Unknown functions and bad arguments are reported back to the model.
pub fn handle(call: &FunctionCall) -> ToolResponse {
    match call.name.as_str() {
        RENDER_CHART => match render_chart(&call.args) {
            Ok(summary) => {
                println!("\n[chart] {summary}");
                ToolResponse::for_call(call, json!({ "success": true }))
            }
            Err(reason) => {
                tracing::warn!(call_id = %call.id, %reason, "render_chart failed");
                ToolResponse::for_call(call, json!({ "success": false, "error": reason }))
            }
        },
        other => {
            tracing::warn!(call_id = %call.id, name = %other, "unknown function call");
            ToolResponse::for_call(call, json!({ "error": format!("unknown function {other}") }))
        }
    }
}

/// Parse the Vega-Lite JSON and summarize it for the terminal.
fn render_chart(args: &Value) -> Result<String, String> {
    let raw = args
        .get("json_graph")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing json_graph string".to_string())?;
    let spec: Value = serde_json::from_str(raw).map_err(|e| format!("invalid graph JSON: {e}"))?;

    let mark = match spec.get("mark") {
        Some(Value::String(m)) => m.clone(),
        Some(m) => m.get("type").and_then(Value::as_str).unwrap_or("unknown").to_string(),
        None => "layered".to_string(),
    };
    let title = spec.get("title").and_then(Value::as_str).unwrap_or("untitled");
    let points = spec
        .get("data")
        .and_then(|d| d.get("values"))
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    Ok(format!("{mark} chart \"{title}\" with {points} data points"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Value) -> FunctionCall {
        FunctionCall { id: "c1".into(), name: name.into(), args }
    }

    #[test]
    fn test_renders_chart_spec() {
        let spec = json!({
            "title": "Sales",
            "mark": "bar",
            "data": { "values": [{ "a": 1 }, { "a": 2 }] },
        });
        let response = handle(&call(RENDER_CHART, json!({ "json_graph": spec.to_string() })));
        assert_eq!(response.id, "c1");
        assert_eq!(response.output, json!({ "success": true }));
    }

    #[test]
    fn test_summary_reads_mark_object() {
        let spec = json!({ "mark": { "type": "line" } }).to_string();
        let summary = render_chart(&json!({ "json_graph": spec })).unwrap();
        assert_eq!(summary, "line chart \"untitled\" with 0 data points");
    }

    #[test]
    fn test_bad_arguments_reported() {
        let response = handle(&call(RENDER_CHART, json!({ "json_graph": "{not json" })));
        assert_eq!(response.output["success"], false);

        let response = handle(&call(RENDER_CHART, json!({})));
        assert_eq!(response.output["error"], "missing json_graph string");
    }

    #[test]
    fn test_unknown_function() {
        let response = handle(&call("launch_rocket", json!({})));
        assert_eq!(response.name, "launch_rocket");
        assert!(response.output["error"].as_str().unwrap().contains("launch_rocket"));
    }
}
