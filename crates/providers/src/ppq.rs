//! PPQ provider — LLM inference via the ppq.ai OpenAI-compatible API.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;

use cb_domain::chat::{ChatRequest, ChatResponse};
use cb_domain::config::Config;
use cb_domain::{Error, Result};
use cb_kernel::{Capability, Kernel, LlmProvider, Plugin, PluginMeta};

use crate::wire;

const DEFAULT_MAX_TOKENS: u32 = 2048;
const REQUEST_TIMEOUT_SECS: u64 = 60;

static META: PluginMeta = PluginMeta::new("ppq", "1.0.0")
    .with_capabilities(&[Capability::Llm])
    .with_dependencies(&["config"])
    .with_priority(20);

#[derive(Default)]
struct PpqState {
    api_base: String,
    api_key: String,
    model: String,
    client: Option<reqwest::Client>,
}

/// PPQ.ai LLM provider plugin.
pub struct PpqPlugin {
    state: RwLock<PpqState>,
}

impl PpqPlugin {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(PpqState::default()),
        }
    }
}

impl Default for PpqPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for PpqPlugin {
    fn meta(&self) -> &PluginMeta {
        &META
    }

    fn configure(&self, config: &Config) -> Result<()> {
        let mut state = self.state.write();
        state.api_base = config.ppq.api_base.trim_end_matches('/').to_owned();
        state.api_key = if config.ppq.api_key.is_empty() {
            std::env::var("PPQ_API_KEY").unwrap_or_default()
        } else {
            config.ppq.api_key.clone()
        };
        state.model = config.ppq.model.clone();
        Ok(())
    }

    async fn start(&self, _kernel: &Arc<Kernel>) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        let mut state = self.state.write();
        state.client = Some(client);

        if state.api_key.is_empty() {
            tracing::warn!("ppq: no API key configured");
        } else {
            tracing::info!(model = %state.model, "ppq provider ready");
        }
        Ok(())
    }

    fn as_llm(&self) -> Option<&dyn LlmProvider> {
        Some(self)
    }
}

#[async_trait]
impl LlmProvider for PpqPlugin {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let (url, body, api_key, client, model) = {
            let state = self.state.read();
            if state.api_key.is_empty() {
                return Err(Error::provider("ppq", "API key not configured"));
            }
            let client = state
                .client
                .clone()
                .ok_or_else(|| Error::provider("ppq", "provider not started"))?;

            let model = req.model.clone().unwrap_or_else(|| state.model.clone());
            let messages: Vec<Value> = req.messages.iter().map(wire::message_to_wire).collect();
            let mut body = json!({
                "model": model,
                "messages": messages,
                "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            });
            if !req.tools.is_empty() {
                let tools: Vec<Value> = req.tools.iter().map(wire::tool_def_to_wire).collect();
                body["tools"] = Value::Array(tools);
            }
            if let Some(temp) = req.temperature {
                body["temperature"] = json!(temp);
            }

            (
                format!("{}/chat/completions", state.api_base),
                body,
                state.api_key.clone(),
                client,
                model,
            )
        };

        let response = client
            .post(&url)
            .bearer_auth(&api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("ppq chat: {e}"))
                } else {
                    Error::provider("ppq", format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.as_u16() == 402 {
            return Err(Error::provider("ppq", "not enough credits for inference"));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                "ppq",
                format!("API error: {status} - {text}"),
            ));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::provider("ppq", format!("invalid response body: {e}")))?;

        wire::parse_chat_completion("ppq", &data, &model)
    }
}
