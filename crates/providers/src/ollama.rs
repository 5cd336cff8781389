//! Ollama provider — local LLM inference via the Ollama HTTP API.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;

use cb_domain::chat::{ChatRequest, ChatResponse, ToolCall, Usage};
use cb_domain::config::Config;
use cb_domain::{Error, Result};
use cb_kernel::{Capability, Kernel, LlmProvider, Plugin, PluginMeta};

use crate::wire;

const DEFAULT_MAX_TOKENS: u32 = 2048;
const REQUEST_TIMEOUT_SECS: u64 = 120;

static META: PluginMeta = PluginMeta::new("ollama", "1.0.0")
    .with_capabilities(&[Capability::Llm])
    .with_dependencies(&["config"])
    .with_priority(20);

#[derive(Default)]
struct OllamaState {
    base_url: String,
    model: String,
    client: Option<reqwest::Client>,
}

/// Ollama local LLM provider plugin.
pub struct OllamaPlugin {
    state: RwLock<OllamaState>,
}

impl OllamaPlugin {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(OllamaState::default()),
        }
    }
}

impl Default for OllamaPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for OllamaPlugin {
    fn meta(&self) -> &PluginMeta {
        &META
    }

    fn configure(&self, config: &Config) -> Result<()> {
        let mut state = self.state.write();
        state.base_url = std::env::var("OLLAMA_HOST")
            .unwrap_or_else(|_| config.ollama.base_url.clone())
            .trim_end_matches('/')
            .to_owned();
        state.model = config.ollama.model.clone();
        Ok(())
    }

    async fn start(&self, _kernel: &Arc<Kernel>) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        let (base_url, model) = {
            let mut state = self.state.write();
            state.client = Some(client.clone());
            (state.base_url.clone(), state.model.clone())
        };

        // Probe the server; a failure is a warning, not fatal.
        match client
            .get(format!("{base_url}/api/tags"))
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                let count = resp
                    .json::<Value>()
                    .await
                    .ok()
                    .and_then(|v| v.get("models").and_then(|m| m.as_array()).map(|a| a.len()))
                    .unwrap_or(0);
                tracing::info!(url = %base_url, models = count, model = %model, "ollama provider ready");
            }
            Ok(resp) => {
                tracing::warn!(url = %base_url, status = %resp.status(), "ollama server responded with an error");
            }
            Err(e) => {
                tracing::warn!(url = %base_url, error = %e, "cannot reach ollama server");
            }
        }
        Ok(())
    }

    fn as_llm(&self) -> Option<&dyn LlmProvider> {
        Some(self)
    }
}

#[async_trait]
impl LlmProvider for OllamaPlugin {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let (url, body, client, model) = {
            let state = self.state.read();
            let client = state
                .client
                .clone()
                .ok_or_else(|| Error::provider("ollama", "provider not started"))?;

            let model = req.model.clone().unwrap_or_else(|| state.model.clone());
            let messages: Vec<Value> = req.messages.iter().map(wire::message_to_wire).collect();
            let mut body = json!({
                "model": model,
                "messages": messages,
                "stream": false,
                "options": {
                    "num_predict": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                },
            });
            if !req.tools.is_empty() {
                let tools: Vec<Value> = req.tools.iter().map(wire::tool_def_to_wire).collect();
                body["tools"] = Value::Array(tools);
            }

            (format!("{}/api/chat", state.base_url), body, client, model)
        };

        let response = client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("ollama chat: {e}"))
                } else if e.is_connect() {
                    Error::provider(
                        "ollama",
                        format!("cannot connect to {url}. Is Ollama running?"),
                    )
                } else {
                    Error::provider("ollama", format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                "ollama",
                format!("API error: {status} - {text}"),
            ));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::provider("ollama", format!("invalid response body: {e}")))?;

        Ok(parse_ollama_response(&data, &model))
    }
}

/// Normalize the Ollama response shape: `message.tool_calls[].function`
/// carries structured arguments and no call ids, so ids are synthesized.
fn parse_ollama_response(data: &Value, fallback_model: &str) -> ChatResponse {
    let message = data.get("message").cloned().unwrap_or(Value::Null);

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
                        id: format!("call_{i}"),
                        name: function
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_owned(),
                        arguments: function
                            .get("arguments")
                            .cloned()
                            .unwrap_or_else(|| json!({})),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let prompt_tokens = data
        .get("prompt_eval_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    let completion_tokens = data.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let usage = if prompt_tokens > 0 || completion_tokens > 0 {
        Some(Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        })
    } else {
        None
    };

    ChatResponse {
        content: message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned(),
        tool_calls,
        model: data
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(fallback_model)
            .to_owned(),
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_calls_with_structured_arguments() {
        let data = json!({
            "model": "llama3.2:latest",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "exec", "arguments": {"command": "ls"}}}
                ]
            },
            "prompt_eval_count": 20,
            "eval_count": 7
        });
        let resp = parse_ollama_response(&data, "fallback");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "call_0");
        assert_eq!(resp.tool_calls[0].name, "exec");
        assert_eq!(resp.tool_calls[0].arguments["command"], "ls");
        assert_eq!(resp.tokens_in(), 20);
        assert_eq!(resp.tokens_out(), 7);
    }

    #[test]
    fn missing_usage_counts_yield_none() {
        let data = json!({"message": {"content": "hi"}});
        let resp = parse_ollama_response(&data, "m");
        assert_eq!(resp.content, "hi");
        assert!(resp.usage.is_none());
        assert_eq!(resp.model, "m");
    }
}
