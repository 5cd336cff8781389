//! OpenAI-style wire conversion shared by the provider adapters.

use serde_json::{json, Value};

use cb_domain::chat::{ChatMessage, ChatResponse, Role, ToolCall, ToolDefinition, Usage};
use cb_domain::{Error, Result};

pub fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert one domain message into the OpenAI chat-completions shape.
pub fn message_to_wire(msg: &ChatMessage) -> Value {
    match msg.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content,
        }),
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let tool_calls: Vec<Value> = msg.tool_calls.iter().map(tool_call_to_wire).collect();
            json!({
                "role": "assistant",
                "content": if msg.content.is_empty() { Value::Null } else { Value::String(msg.content.clone()) },
                "tool_calls": tool_calls,
            })
        }
        _ => json!({
            "role": role_to_str(msg.role),
            "content": msg.content,
        }),
    }
}

/// `arguments` goes over the wire as a JSON string; keep an already-string
/// value as-is, serialize anything structured.
fn tool_call_to_wire(tc: &ToolCall) -> Value {
    let arguments = match &tc.arguments {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    json!({
        "id": tc.id,
        "type": "function",
        "function": {
            "name": tc.name,
            "arguments": arguments,
        }
    })
}

pub fn tool_def_to_wire(def: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters,
        }
    })
}

/// Parse an OpenAI-style chat completion body into a [`ChatResponse`].
///
/// Tool-call `arguments` stay as the raw JSON string; the orchestrator
/// parses them before tool dispatch.
pub fn parse_chat_completion(
    provider: &str,
    data: &Value,
    fallback_model: &str,
) -> Result<ChatResponse> {
    let message = data
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| Error::provider(provider, "response has no choices[0].message"))?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_owned();

    let tool_calls = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(i, tc)| {
                    let function = tc.get("function").cloned().unwrap_or(Value::Null);
                    ToolCall {
                        id: tc
                            .get("id")
                            .and_then(|v| v.as_str())
                            .map(str::to_owned)
                            .unwrap_or_else(|| format!("call_{i}")),
                        name: function
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_owned(),
                        arguments: function
                            .get("arguments")
                            .cloned()
                            .unwrap_or_else(|| Value::String("{}".into())),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = data.get("usage").map(|u| Usage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        completion_tokens: u
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
    });

    Ok(ChatResponse {
        content,
        tool_calls,
        model: data
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(fallback_model)
            .to_owned(),
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_messages_convert() {
        let wire = message_to_wire(&ChatMessage::user("hi"));
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"], "hi");
    }

    #[test]
    fn tool_result_converts_with_call_id() {
        let wire = message_to_wire(&ChatMessage::tool_result("c1", "output"));
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "c1");
        assert_eq!(wire["content"], "output");
    }

    #[test]
    fn assistant_with_tools_keeps_string_arguments() {
        let msg = ChatMessage::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "c1".into(),
                name: "read_file".into(),
                arguments: Value::String(r#"{"path":"foo.txt"}"#.into()),
            }],
        );
        let wire = message_to_wire(&msg);
        assert_eq!(wire["content"], Value::Null);
        assert_eq!(
            wire["tool_calls"][0]["function"]["arguments"],
            r#"{"path":"foo.txt"}"#
        );
    }

    #[test]
    fn parses_completion_with_tool_calls() {
        let data = serde_json::json!({
            "model": "gpt-test",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "c1",
                        "type": "function",
                        "function": {"name": "read_file", "arguments": "{\"path\":\"foo.txt\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let resp = parse_chat_completion("ppq", &data, "fallback").unwrap();
        assert_eq!(resp.content, "");
        assert!(resp.has_tool_calls());
        assert_eq!(resp.tool_calls[0].name, "read_file");
        assert_eq!(resp.model, "gpt-test");
        assert_eq!(resp.tokens_in(), 10);
        assert_eq!(resp.tokens_out(), 5);
    }

    #[test]
    fn missing_choices_is_an_error() {
        let data = serde_json::json!({"error": {"message": "nope"}});
        assert!(parse_chat_completion("ppq", &data, "m").is_err());
    }
}
