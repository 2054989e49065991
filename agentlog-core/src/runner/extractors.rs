//! Defensive probes over runner inputs and outputs.
//!
//! Everything here works on `serde_json::Value`, so callers can hand in typed
//! structs (via [`crate::serialization::to_field_value`]) or raw JSON alike.
//! Missing or oddly shaped fields are skipped, never reported.

use serde::Serialize;
use serde_json::{Map, Value};

/// Identity fields copied from the runner input into the `adk` block.
pub const RUNNER_METADATA_FIELDS: [&str; 4] =
    ["session_id", "user_id", "tenant_id", "conversation_id"];

/// One tool invocation observed in a runner response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Empty strings, zero, `false`, empty containers and `null` do not count as
/// present.
fn is_present(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn present<'a>(v: &'a Value, key: &str) -> Option<&'a Value> {
    v.get(key).filter(|x| is_present(x))
}

/// Session/user/tenant/conversation ids from the top level of `input`, then
/// from a nested `context` object for ids still missing.
pub fn extract_runner_metadata(input: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    for field in RUNNER_METADATA_FIELDS {
        if let Some(v) = present(input, field) {
            out.insert(field.to_string(), v.clone());
        }
    }
    if let Some(ctx) = present(input, "context") {
        for field in RUNNER_METADATA_FIELDS {
            if out.contains_key(field) {
                continue;
            }
            if let Some(v) = present(ctx, field) {
                out.insert(field.to_string(), v.clone());
            }
        }
    }
    out
}

/// Agent name, model and sampling temperature of a runner.
///
/// The agent is `runner.agent` when present, otherwise the runner itself.
/// Temperature is looked up on the model first, then its
/// `generation_config`, then the agent's `generate_content_config`.
pub fn extract_agent_config(runner: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    let agent = present(runner, "agent").unwrap_or(runner);

    if let Some(name) = present(agent, "name").filter(|v| v.is_string()) {
        out.insert("agent_name".into(), name.clone());
    }

    let model = agent.get("model");
    let model_name = match model {
        Some(Value::String(s)) if !s.is_empty() => Some(Value::String(s.clone())),
        Some(m @ Value::Object(_)) => present(m, "model_name")
            .or_else(|| present(m, "name"))
            .cloned(),
        _ => None,
    };
    if let Some(name) = model_name {
        out.insert("model".into(), name);
    }

    let temperature = model
        .and_then(|m| m.get("temperature"))
        .filter(|t| t.is_number())
        .or_else(|| {
            model
                .and_then(|m| m.get("generation_config"))
                .and_then(|g| g.get("temperature"))
                .filter(|t| t.is_number())
        })
        .or_else(|| {
            agent
                .get("generate_content_config")
                .and_then(|g| g.get("temperature"))
                .filter(|t| t.is_number())
        });
    if let Some(t) = temperature {
        out.insert("temperature".into(), t.clone());
    }
    out
}

fn tool_call_from(entry: &Value) -> Option<ToolCall> {
    let function = entry.get("function");
    let name = entry
        .get("name")
        .or_else(|| function.and_then(|f| f.get("name")))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())?;
    let args = entry
        .get("args")
        .or_else(|| entry.get("arguments"))
        .or_else(|| function.and_then(|f| f.get("arguments")))
        .filter(|v| !v.is_null())
        .cloned();
    let id = entry.get("id").and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    Some(ToolCall {
        name: name.to_string(),
        args,
        id,
    })
}

/// Tool invocations carried by one response chunk: `tool_calls`,
/// `function_calls` and `content.parts[*].function_call`, in that order.
pub fn extract_tool_calls(chunk: &Value) -> Vec<ToolCall> {
    let mut out = Vec::new();
    for key in ["tool_calls", "function_calls"] {
        if let Some(Value::Array(entries)) = chunk.get(key) {
            out.extend(entries.iter().filter_map(tool_call_from));
        }
    }
    if let Some(Value::Array(parts)) = chunk.get("content").and_then(|c| c.get("parts")) {
        out.extend(
            parts
                .iter()
                .filter_map(|p| p.get("function_call"))
                .filter_map(tool_call_from),
        );
    }
    out
}

/// Running token total reported by a chunk (`usage` or `usage_metadata`,
/// `total_tokens` or `total_token_count`).
pub fn extract_total_tokens(chunk: &Value) -> Option<u64> {
    let usage = present(chunk, "usage").or_else(|| present(chunk, "usage_metadata"))?;
    usage
        .get("total_tokens")
        .and_then(Value::as_u64)
        .or_else(|| usage.get("total_token_count").and_then(Value::as_u64))
}

/// Name of the agent that produced a chunk (`agent_name`, else `source`).
pub fn extract_agent_name(chunk: &Value) -> Option<&str> {
    present(chunk, "agent_name")
        .or_else(|| present(chunk, "source"))
        .and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_from_top_level_and_context() {
        let input = json!({
            "session_id": "s-1",
            "user_id": "",
            "context": {"user_id": "u-9", "session_id": "ignored", "tenant_id": "t"}
        });
        let meta = extract_runner_metadata(&input);
        assert_eq!(
            Value::Object(meta),
            json!({"session_id": "s-1", "user_id": "u-9", "tenant_id": "t"})
        );
    }

    #[test]
    fn metadata_of_non_object_is_empty() {
        assert!(extract_runner_metadata(&json!("just text")).is_empty());
        assert!(extract_runner_metadata(&Value::Null).is_empty());
    }

    #[test]
    fn temperature_direct_on_model() {
        let runner = json!({"agent": {
            "name": "weather-agent",
            "model": {"model_name": "gemini-1.5-flash", "temperature": 0.7}
        }});
        let cfg = extract_agent_config(&runner);
        assert_eq!(cfg["agent_name"], json!("weather-agent"));
        assert_eq!(cfg["model"], json!("gemini-1.5-flash"));
        assert_eq!(cfg["temperature"], json!(0.7));
    }

    #[test]
    fn temperature_from_generation_config() {
        let runner = json!({"agent": {
            "name": "a",
            "model": {"name": "gemini-pro", "generation_config": {"temperature": 0.8}}
        }});
        let cfg = extract_agent_config(&runner);
        assert_eq!(cfg["model"], json!("gemini-pro"));
        assert_eq!(cfg["temperature"], json!(0.8));
    }

    #[test]
    fn temperature_from_agent_content_config() {
        let agent = json!({
            "name": "planner",
            "model": "gemini-2.0-flash",
            "generate_content_config": {"temperature": 0.9}
        });
        let cfg = extract_agent_config(&agent);
        assert_eq!(cfg["agent_name"], json!("planner"));
        assert_eq!(cfg["model"], json!("gemini-2.0-flash"));
        assert_eq!(cfg["temperature"], json!(0.9));
    }

    #[test]
    fn agent_config_tolerates_missing_fields() {
        assert!(extract_agent_config(&json!({})).is_empty());
        assert!(extract_agent_config(&json!({"agent": {"model": 3}})).is_empty());
    }

    #[test]
    fn tool_calls_from_all_shapes() {
        let chunk = json!({
            "tool_calls": [
                {"id": "call_1", "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}}
            ],
            "function_calls": [{"name": "lookup", "args": {"q": "x"}}],
            "content": {"parts": [
                {"text": "thinking"},
                {"function_call": {"name": "search", "args": {"term": "rust"}, "id": 7}}
            ]}
        });
        let calls = extract_tool_calls(&chunk);
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(calls[0].args, Some(json!("{\"city\":\"Paris\"}")));
        assert_eq!(calls[1].name, "lookup");
        assert_eq!(calls[1].id, None);
        assert_eq!(calls[2].name, "search");
        assert_eq!(calls[2].id.as_deref(), Some("7"));
    }

    #[test]
    fn tool_call_without_name_is_skipped() {
        let chunk = json!({"tool_calls": [{"args": {}}, "garbage"]});
        assert!(extract_tool_calls(&chunk).is_empty());
    }

    #[test]
    fn tool_call_serializes_without_empty_fields() {
        let call = ToolCall {
            name: "n".into(),
            args: None,
            id: None,
        };
        assert_eq!(serde_json::to_value(&call).unwrap(), json!({"name": "n"}));
    }

    #[test]
    fn token_totals_in_both_dict_forms() {
        assert_eq!(extract_total_tokens(&json!({"usage": {"total_tokens": 200}})), Some(200));
        assert_eq!(
            extract_total_tokens(&json!({"usage_metadata": {"total_tokens": 250}})),
            Some(250)
        );
        assert_eq!(
            extract_total_tokens(&json!({"usage_metadata": {"total_token_count": 150}})),
            Some(150)
        );
        assert_eq!(extract_total_tokens(&json!({"text": "hi"})), None);
    }

    #[test]
    fn agent_name_prefers_agent_name_over_source() {
        assert_eq!(
            extract_agent_name(&json!({"agent_name": "a", "source": "b"})),
            Some("a")
        );
        assert_eq!(extract_agent_name(&json!({"source": "b"})), Some("b"));
        assert_eq!(extract_agent_name(&json!({"agent_name": 5})), None);
    }
}
