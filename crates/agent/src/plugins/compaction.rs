//! Conversation compaction.
//!
//! A `transform_history` plugin: when the estimated token count of the
//! middle of the conversation exceeds the budget, the older part is
//! summarized through the primary LLM and replaced by one synthetic
//! system turn. The leading system turn and the trailing user turn are
//! fixed endpoints and survive verbatim.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

use cb_domain::chat::{ChatMessage, ChatRequest, Role};
use cb_domain::Result;
use cb_kernel::{
    Capability, CtxKey, Hook, HookContext, Kernel, LlmProvider, Plugin, PluginMeta,
};

/// Token budget for the (system-and-user-excluded) history.
const MAX_TOKENS: usize = 12_000;
/// How much recent history survives a compaction.
const TARGET_RECENT_TOKENS: usize = 4_000;
/// Token estimate: total characters divided by this.
const CHARS_PER_TOKEN: usize = 4;

static META: PluginMeta = PluginMeta::new("compaction", "1.0.0")
    .with_capabilities(&[Capability::Compaction])
    .with_dependencies(&["config"])
    .with_priority(16);

pub struct CompactionPlugin {
    kernel: RwLock<Weak<Kernel>>,
}

impl CompactionPlugin {
    pub fn new() -> Self {
        Self {
            kernel: RwLock::new(Weak::new()),
        }
    }

    /// Summarize via the primary LLM; the call goes straight to the
    /// provider and does not re-enter the hook chain. Falls back to a
    /// count marker when no LLM is reachable.
    async fn summarize(&self, old: &[ChatMessage]) -> String {
        let fallback = format!("[Earlier conversation - {} messages]", old.len());

        let Some(kernel) = self.kernel.read().upgrade() else {
            return fallback;
        };
        let Some(llm_plugin) = kernel.get_by_capability(Capability::Llm) else {
            return fallback;
        };
        let Some(llm) = llm_plugin.as_llm() else {
            return fallback;
        };

        let mut text = String::new();
        for msg in old {
            let content: String = msg.content.chars().take(500).collect();
            text.push_str(&format!("{:?}: {content}\n", msg.role));
        }

        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(
                    "Summarize this conversation in 2-3 sentences. \
                     Focus on key topics and decisions.",
                ),
                ChatMessage::user(format!("Conversation:\n\n{text}")),
            ],
            max_tokens: Some(200),
            ..ChatRequest::default()
        };

        match llm.chat(request).await {
            Ok(response) if !response.content.trim().is_empty() => response.content,
            Ok(_) => fallback,
            Err(e) => {
                tracing::warn!(error = %e, "compaction summarization failed");
                fallback
            }
        }
    }
}

impl Default for CompactionPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for CompactionPlugin {
    fn meta(&self) -> &PluginMeta {
        &META
    }

    async fn start(&self, kernel: &Arc<Kernel>) -> Result<()> {
        *self.kernel.write() = Arc::downgrade(kernel);
        Ok(())
    }

    fn hooks(&self) -> &'static [Hook] {
        &[Hook::TransformHistory]
    }

    async fn on_hook(&self, _hook: Hook, ctx: &mut HookContext) -> Result<()> {
        let Some(messages) = ctx.get_as::<Vec<ChatMessage>>(CtxKey::Messages) else {
            return Ok(());
        };
        if messages.len() < 3 {
            return Ok(());
        }

        let (system, middle, trailing_user) = split_endpoints(&messages);
        if middle.is_empty() {
            return Ok(());
        }

        let total = estimate_tokens(middle);
        if total <= MAX_TOKENS {
            return Ok(());
        }

        let split = split_point(middle);
        if split == 0 {
            return Ok(());
        }
        let (old, recent) = middle.split_at(split);

        tracing::info!(
            estimated_tokens = total,
            compacted = old.len(),
            kept = recent.len(),
            "history over budget, compacting"
        );

        let summary = self.summarize(old).await;

        let mut rebuilt = Vec::with_capacity(recent.len() + 3);
        if let Some(system) = system {
            rebuilt.push(system.clone());
        }
        rebuilt.push(ChatMessage::system(format!(
            "[Earlier conversation summary: {summary}]"
        )));
        rebuilt.extend_from_slice(recent);
        if let Some(user) = trailing_user {
            rebuilt.push(user.clone());
        }

        ctx.set_json(CtxKey::Messages, &rebuilt);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Budget math
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn estimate_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| m.content.len()).sum::<usize>() / CHARS_PER_TOKEN
}

/// Peel the fixed endpoints off: a leading system turn and a trailing
/// user turn.
fn split_endpoints(
    messages: &[ChatMessage],
) -> (Option<&ChatMessage>, &[ChatMessage], Option<&ChatMessage>) {
    let mut start = 0;
    let mut end = messages.len();

    let system = if messages
        .first()
        .map(|m| m.role == Role::System)
        .unwrap_or(false)
    {
        start = 1;
        messages.first()
    } else {
        None
    };

    let trailing_user = if messages
        .last()
        .map(|m| m.role == Role::User)
        .unwrap_or(false)
    {
        end -= 1;
        messages.last()
    } else {
        None
    };

    (system, &messages[start..end], trailing_user)
}

/// Walk the middle back to front; everything that falls outside the last
/// [`TARGET_RECENT_TOKENS`] is the old slice. Returns the first index of
/// the recent part.
fn split_point(middle: &[ChatMessage]) -> usize {
    let mut recent_tokens = 0;
    for (i, msg) in middle.iter().enumerate().rev() {
        let msg_tokens = msg.content.len() / CHARS_PER_TOKEN;
        if recent_tokens + msg_tokens > TARGET_RECENT_TOKENS {
            return i + 1;
        }
        recent_tokens += msg_tokens;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: Role, chars: usize) -> ChatMessage {
        let content = "x".repeat(chars);
        match role {
            Role::System => ChatMessage::system(content),
            Role::User => ChatMessage::user(content),
            _ => ChatMessage::assistant(content),
        }
    }

    #[test]
    fn endpoints_are_detected() {
        let messages = vec![
            turn(Role::System, 10),
            turn(Role::User, 10),
            turn(Role::Assistant, 10),
            turn(Role::User, 10),
        ];
        let (system, middle, trailing) = split_endpoints(&messages);
        assert!(system.is_some());
        assert!(trailing.is_some());
        assert_eq!(middle.len(), 2);
    }

    #[test]
    fn split_point_keeps_the_recent_budget() {
        // 10 turns of 2000 chars = 500 tokens each; the last 8 fit into
        // the 4000-token recent budget.
        let middle: Vec<_> = (0..10).map(|_| turn(Role::Assistant, 2000)).collect();
        let split = split_point(&middle);
        assert_eq!(split, 2);
        let recent = &middle[split..];
        assert!(estimate_tokens(recent) <= TARGET_RECENT_TOKENS);
    }

    #[tokio::test]
    async fn under_budget_history_is_untouched() {
        let plugin = CompactionPlugin::new();
        let messages = vec![
            turn(Role::System, 100),
            turn(Role::User, 100),
            turn(Role::Assistant, 100),
            turn(Role::User, 100),
        ];
        let mut ctx = HookContext::new();
        ctx.set_json(CtxKey::Messages, &messages);
        plugin.on_hook(Hook::TransformHistory, &mut ctx).await.unwrap();

        let after: Vec<ChatMessage> = ctx.get_as(CtxKey::Messages).unwrap();
        assert_eq!(after.len(), 4);
        assert_eq!(after[2].content, messages[2].content);
    }

    #[tokio::test]
    async fn over_budget_history_is_compacted_without_an_llm() {
        // No kernel: the fallback summary is used, the shape still holds.
        let plugin = CompactionPlugin::new();
        let mut messages = vec![turn(Role::System, 40)];
        for _ in 0..30 {
            messages.push(turn(Role::User, 2000));
            messages.push(turn(Role::Assistant, 2000));
        }
        messages.push(turn(Role::User, 40));

        let mut ctx = HookContext::new();
        ctx.set_json(CtxKey::Messages, &messages);
        plugin.on_hook(Hook::TransformHistory, &mut ctx).await.unwrap();

        let after: Vec<ChatMessage> = ctx.get_as(CtxKey::Messages).unwrap();
        assert!(after.len() < messages.len());
        assert_eq!(after[0].role, Role::System);
        assert!(after[1].content.starts_with("[Earlier conversation summary:"));
        assert_eq!(after.last().unwrap().role, Role::User);

        // The rebuilt middle fits the overall budget again.
        let (_, middle, _) = split_endpoints(&after);
        assert!(estimate_tokens(middle) <= MAX_TOKENS);
    }
}
