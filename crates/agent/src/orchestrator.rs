//! The message orchestrator.
//!
//! Drives the poll → dispatch → reply loop. Messages within one poll
//! cycle are handled as sibling tasks and awaited jointly; a failure in
//! one never cancels the others. Hooks fire in a strict order for each
//! message; between sibling messages no order is guaranteed.

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;

use cb_domain::chat::{ChatMessage, ChatRequest, ToolDefinition};
use cb_domain::config::Config;
use cb_domain::message::{IncomingMessage, OutgoingMessage};
use cb_kernel::{
    Capability, Communicator, CtxKey, Hook, HookContext, Kernel, LlmProvider, Plugin,
    ToolProvider,
};

use crate::dedupe::DedupeSet;

/// Maximum LLM/tool iterations per response.
const MAX_ROUNDS: usize = 10;

/// Reply used when the model produced no visible text.
const EMPTY_REPLY_PLACEHOLDER: &str =
    "(No response generated - model may have hit token limit)";

/// How a run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Normal shutdown (signal or stdin EOF).
    Shutdown,
    /// A tool asked for a restart; the caller should re-exec.
    Restart,
}

/// The agent loop.
pub struct Agent {
    kernel: Arc<Kernel>,
    soul: String,
    provider: String,
    interval: Duration,
    dedupe: Mutex<DedupeSet>,
    shutdown: watch::Receiver<bool>,
}

impl Agent {
    pub fn new(kernel: Arc<Kernel>, config: &Config, shutdown: watch::Receiver<bool>) -> Self {
        let soul = std::fs::read_to_string(&config.paths.soul).unwrap_or_else(|_| {
            format!(
                "You are {}, a helpful AI assistant.",
                config.identity.name
            )
        });

        Self {
            kernel,
            soul,
            provider: config.provider.clone(),
            interval: Duration::from_secs(config.polling.interval_seconds),
            dedupe: Mutex::new(DedupeSet::new()),
            shutdown,
        }
    }

    fn communicator_plugin(&self) -> Option<Arc<dyn Plugin>> {
        self.kernel.get_by_capability(Capability::Communication)
    }

    fn tools_plugin(&self) -> Option<Arc<dyn Plugin>> {
        self.kernel.get_by_capability(Capability::Tools)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Outer loop
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Run the polling loop until shutdown or a restart request.
    ///
    /// The next tick always waits for the previous cycle's fan-out, then
    /// sleeps only the remaining part of the interval.
    pub async fn run_loop(&self) -> RunOutcome {
        if let Some(plugin) = self.communicator_plugin() {
            if let Some(comm) = plugin.as_communicator() {
                let channels = comm.channels();
                if channels.is_empty() {
                    tracing::warn!("no channels registered");
                } else {
                    tracing::info!(channels = ?channels, "polling started");
                }
            }
        }

        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                break;
            }

            let cycle_start = Instant::now();
            if self.poll_once().await {
                return RunOutcome::Restart;
            }

            let remaining = self.interval.saturating_sub(cycle_start.elapsed());
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(remaining) => {}
            }
        }

        RunOutcome::Shutdown
    }

    /// One poll cycle: fetch, fan out, await all. Returns true when a
    /// restart was requested by a tool during this cycle.
    pub async fn poll_once(&self) -> bool {
        let Some(comm_plugin) = self.communicator_plugin() else {
            return false;
        };
        let Some(comm) = comm_plugin.as_communicator() else {
            return false;
        };

        let messages = comm.poll().await;
        if !messages.is_empty() {
            tracing::debug!(count = messages.len(), "poll cycle dispatching");
            join_all(messages.into_iter().map(|msg| self.handle_message(msg))).await;
        }

        self.tools_plugin()
            .and_then(|p| p.as_tools().map(|t| t.restart_requested()))
            .unwrap_or(false)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Per-message handling
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Handle one incoming message end to end. Never panics or returns
    /// an error: every failure is scoped to this message.
    pub async fn handle_message(&self, msg: IncomingMessage) {
        // At-most-once: the key is recorded before any hook runs.
        if !self.dedupe.lock().insert(msg.dedup_key()) {
            tracing::debug!(key = %msg.dedup_key(), "duplicate message dropped");
            return;
        }

        let mut ctx = HookContext::new()
            .with(CtxKey::Message, msg.content.clone())
            .with(CtxKey::Sender, msg.sender_name.clone())
            .with(CtxKey::SenderId, msg.sender_id.clone())
            .with(CtxKey::ChannelType, msg.channel_type.clone())
            .with(CtxKey::ChannelId, msg.channel_id.clone())
            .with(CtxKey::EventId, msg.id.clone());
        self.kernel.run_hook(Hook::MessageReceived, &mut ctx).await;
        if ctx.abort {
            return;
        }

        // Typing indicator, fire-and-forget.
        if let Some(comm_plugin) = self.communicator_plugin() {
            let channel_type = msg.channel_type.clone();
            let channel_id = msg.channel_id.clone();
            tokio::spawn(async move {
                if let Some(comm) = comm_plugin.as_communicator() {
                    comm.typing(&channel_type, &channel_id).await;
                }
            });
        }

        let message_text = ctx
            .get_str(CtxKey::Message)
            .unwrap_or(&msg.content)
            .to_owned();
        let response_text = self.respond(&message_text, &msg.sender_name).await;

        let mut ctx = HookContext::new()
            .with(CtxKey::Text, response_text.clone())
            .with(CtxKey::Recipient, msg.sender_name.clone());
        self.kernel.run_hook(Hook::BeforeSend, &mut ctx).await;
        if ctx.abort {
            return;
        }
        let response_text = ctx
            .get_str(CtxKey::Text)
            .unwrap_or(&response_text)
            .to_owned();

        let Some(comm_plugin) = self.communicator_plugin() else {
            return;
        };
        let Some(comm) = comm_plugin.as_communicator() else {
            return;
        };

        let outgoing = OutgoingMessage::new(
            msg.channel_type.clone(),
            msg.channel_id.clone(),
            response_text.clone(),
        )
        .in_reply_to(msg.id.clone());

        if comm.send(outgoing).await {
            let mut ctx = HookContext::new()
                .with(CtxKey::Text, response_text)
                .with(CtxKey::Recipient, msg.sender_name.clone())
                .with(CtxKey::ChannelType, msg.channel_type.clone())
                .with(CtxKey::ChannelId, msg.channel_id.clone());
            self.kernel.run_hook(Hook::AfterSend, &mut ctx).await;
        } else {
            let mut ctx = HookContext::new()
                .with(CtxKey::ErrorMessage, "Send failed")
                .with(CtxKey::HookName, "send");
            self.kernel.run_hook(Hook::Error, &mut ctx).await;
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // The LLM/tool inner loop
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Produce the reply text for one message. Never raises: LLM errors
    /// come back as an `"Error: …"` string.
    pub async fn respond(&self, message: &str, sender: &str) -> String {
        let Some(llm_plugin) = self.kernel.get_by_capability(Capability::Llm) else {
            return "Error: No LLM configured".into();
        };
        let Some(llm) = llm_plugin.as_llm() else {
            return "Error: No LLM configured".into();
        };

        let tools_plugin = self.tools_plugin();
        let tools = tools_plugin.as_deref().and_then(Plugin::as_tools);

        let mut messages = vec![
            ChatMessage::system(&self.soul),
            ChatMessage::user(message),
        ];

        // Hook: transform_system_prompt.
        let mut ctx = HookContext::new()
            .with(CtxKey::Prompt, self.soul.clone())
            .with(CtxKey::Peer, sender)
            .with_json(CtxKey::Messages, &messages);
        self.kernel
            .run_hook(Hook::TransformSystemPrompt, &mut ctx)
            .await;
        if let Some(prompt) = ctx.get_str(CtxKey::Prompt) {
            messages[0].content = prompt.to_owned();
        }

        // Hook: transform_history.
        let mut ctx = HookContext::new()
            .with_json(CtxKey::Messages, &messages)
            .with(CtxKey::Peer, sender);
        self.kernel.run_hook(Hook::TransformHistory, &mut ctx).await;
        if let Some(transformed) = ctx.get_as::<Vec<ChatMessage>>(CtxKey::Messages) {
            messages = transformed;
        }

        let tool_defs: Vec<ToolDefinition> =
            tools.map(|t| t.definitions()).unwrap_or_default();

        let mut final_content = String::new();

        for round in 0..MAX_ROUNDS {
            // Hook: on_before_llm_call.
            let mut ctx = HookContext::new()
                .with_json(CtxKey::Messages, &messages)
                .with(CtxKey::Model, self.provider.clone())
                .with_json(CtxKey::Tools, &tool_defs);
            self.kernel.run_hook(Hook::BeforeLlmCall, &mut ctx).await;
            if ctx.abort {
                return ctx
                    .abort_message
                    .unwrap_or_else(|| "Request aborted.".into());
            }

            let request = ChatRequest {
                messages: messages.clone(),
                tools: tool_defs.clone(),
                ..ChatRequest::default()
            };
            let response = match llm.chat(request).await {
                Ok(response) => response,
                Err(e) => {
                    let mut ctx = HookContext::new()
                        .with(CtxKey::ErrorMessage, e.to_string())
                        .with(CtxKey::HookName, "llm_call");
                    self.kernel.run_hook(Hook::Error, &mut ctx).await;
                    return format!("Error: {e}");
                }
            };

            // Hook: on_after_llm_call.
            let mut ctx = HookContext::new()
                .with(CtxKey::Response, response.content.clone())
                .with(CtxKey::Model, response.model.clone())
                .with(CtxKey::TokensIn, response.tokens_in() as u64)
                .with(CtxKey::TokensOut, response.tokens_out() as u64)
                .with(CtxKey::HasToolCalls, response.has_tool_calls());
            self.kernel.run_hook(Hook::AfterLlmCall, &mut ctx).await;

            final_content = response.content.clone();

            if !response.has_tool_calls() {
                break;
            }
            if round + 1 == MAX_ROUNDS {
                // Round budget exhausted with tool calls still pending:
                // no further LLM call, the current content is the reply.
                tracing::warn!("tool loop limit reached ({MAX_ROUNDS} rounds)");
                break;
            }

            messages.push(ChatMessage::assistant_with_tools(
                &response.content,
                response.tool_calls.clone(),
            ));

            for tool_call in response.tool_calls {
                let args = parse_tool_arguments(&tool_call.arguments);

                // Hook: on_before_tool_exec.
                let mut ctx = HookContext::new()
                    .with(CtxKey::Tool, tool_call.name.clone())
                    .with(CtxKey::Args, args.clone());
                self.kernel.run_hook(Hook::BeforeToolExec, &mut ctx).await;

                let result = if ctx.abort {
                    // The abort message *is* the tool result.
                    ctx.abort_message.unwrap_or_else(|| "Blocked.".into())
                } else if let Some(tools) = tools {
                    tools.execute(&tool_call.name, &args).await
                } else {
                    "Error: Tools not available".into()
                };

                // Hook: on_after_tool_exec.
                let mut ctx = HookContext::new()
                    .with(CtxKey::Tool, tool_call.name.clone())
                    .with(CtxKey::Args, args)
                    .with(CtxKey::ToolResult, result.clone());
                self.kernel.run_hook(Hook::AfterToolExec, &mut ctx).await;

                messages.push(ChatMessage::tool_result(tool_call.id, result));
            }
        }

        // Hook: transform_response.
        let mut ctx = HookContext::new()
            .with(CtxKey::Text, final_content.clone())
            .with(CtxKey::Recipient, sender);
        self.kernel
            .run_hook(Hook::TransformResponse, &mut ctx)
            .await;

        let final_text = ctx
            .get_str(CtxKey::Text)
            .unwrap_or(&final_content)
            .to_owned();
        if final_text.trim().is_empty() {
            return EMPTY_REPLY_PLACEHOLDER.into();
        }
        final_text
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Stdin mode
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Line-oriented REPL over stdin, through the same hook chain.
    pub async fn run_stdin(&self) -> RunOutcome {
        eprintln!("Cobot ready. Type a message (Ctrl+D to exit):");

        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        let mut shutdown = self.shutdown.clone();

        loop {
            let line = tokio::select! {
                _ = shutdown.changed() => break,
                line = lines.next_line() => line,
            };

            let message = match line {
                Ok(Some(line)) => line.trim().to_owned(),
                Ok(None) | Err(_) => break,
            };
            if message.is_empty() {
                continue;
            }

            let mut ctx = HookContext::new()
                .with(CtxKey::Message, message.clone())
                .with(CtxKey::Sender, "stdin")
                .with(CtxKey::SenderId, "stdin")
                .with(CtxKey::ChannelType, "stdin")
                .with(
                    CtxKey::EventId,
                    format!("stdin-{}", uuid::Uuid::new_v4()),
                );
            self.kernel.run_hook(Hook::MessageReceived, &mut ctx).await;
            if ctx.abort {
                eprintln!("[blocked]");
                continue;
            }

            let message_text = ctx
                .get_str(CtxKey::Message)
                .unwrap_or(&message)
                .to_owned();
            let response = self.respond(&message_text, "stdin").await;

            let mut ctx = HookContext::new()
                .with(CtxKey::Text, response.clone())
                .with(CtxKey::Recipient, "stdin");
            self.kernel.run_hook(Hook::BeforeSend, &mut ctx).await;
            if ctx.abort {
                continue;
            }

            println!("{}", ctx.get_str(CtxKey::Text).unwrap_or(&response));

            let mut ctx = HookContext::new()
                .with(CtxKey::Text, response)
                .with(CtxKey::Recipient, "stdin");
            self.kernel.run_hook(Hook::AfterSend, &mut ctx).await;

            let restart = self
                .tools_plugin()
                .and_then(|p| p.as_tools().map(|t| t.restart_requested()))
                .unwrap_or(false);
            if restart {
                return RunOutcome::Restart;
            }
        }

        RunOutcome::Shutdown
    }
}

/// Tool arguments arrive either structured or as a JSON string; normalize
/// to a mapping before dispatch.
fn parse_tool_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(s) if s.trim().is_empty() => json!({}),
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "tool arguments are not valid JSON; using empty object");
            json!({})
        }),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_arguments_are_parsed() {
        let parsed = parse_tool_arguments(&Value::String(r#"{"path":"foo.txt"}"#.into()));
        assert_eq!(parsed["path"], "foo.txt");
    }

    #[test]
    fn structured_arguments_pass_through() {
        let parsed = parse_tool_arguments(&json!({"command": "ls"}));
        assert_eq!(parsed["command"], "ls");
    }

    #[test]
    fn invalid_and_empty_strings_become_empty_objects() {
        assert_eq!(parse_tool_arguments(&Value::String("not json".into())), json!({}));
        assert_eq!(parse_tool_arguments(&Value::String("  ".into())), json!({}));
    }
}
