//! The hook chain types.
//!
//! Hooks are a fixed, closed set of interception points on the message
//! pipeline. The context threaded through a chain is a tagged map keyed by
//! a closed enumeration, plus two dedicated control fields: `abort` stops
//! the chain and marks the event consumed, `abort_message` optionally
//! replaces the response.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hook
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The fixed hook set, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    MessageReceived,
    TransformSystemPrompt,
    TransformHistory,
    BeforeLlmCall,
    AfterLlmCall,
    BeforeToolExec,
    AfterToolExec,
    TransformResponse,
    BeforeSend,
    AfterSend,
    Error,
}

impl Hook {
    /// All hooks, in pipeline order.
    pub const ALL: &'static [Hook] = &[
        Hook::MessageReceived,
        Hook::TransformSystemPrompt,
        Hook::TransformHistory,
        Hook::BeforeLlmCall,
        Hook::AfterLlmCall,
        Hook::BeforeToolExec,
        Hook::AfterToolExec,
        Hook::TransformResponse,
        Hook::BeforeSend,
        Hook::AfterSend,
        Hook::Error,
    ];

    /// The wire name of this hook.
    pub fn as_str(self) -> &'static str {
        match self {
            Hook::MessageReceived => "on_message_received",
            Hook::TransformSystemPrompt => "transform_system_prompt",
            Hook::TransformHistory => "transform_history",
            Hook::BeforeLlmCall => "on_before_llm_call",
            Hook::AfterLlmCall => "on_after_llm_call",
            Hook::BeforeToolExec => "on_before_tool_exec",
            Hook::AfterToolExec => "on_after_tool_exec",
            Hook::TransformResponse => "transform_response",
            Hook::BeforeSend => "on_before_send",
            Hook::AfterSend => "on_after_send",
            Hook::Error => "on_error",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context keys
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Closed key set for [`HookContext`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CtxKey {
    /// Incoming message text.
    Message,
    /// Sender display name.
    Sender,
    SenderId,
    ChannelType,
    ChannelId,
    /// Message/event id on the source channel.
    EventId,
    /// System prompt text.
    Prompt,
    /// Conversation partner for prompt/history transforms.
    Peer,
    /// Full message list (`Vec<ChatMessage>` as JSON).
    Messages,
    Model,
    /// Tool definitions offered to the model.
    Tools,
    /// Model output text.
    Response,
    TokensIn,
    TokensOut,
    HasToolCalls,
    /// Tool name for tool-exec hooks.
    Tool,
    /// Parsed tool arguments.
    Args,
    ToolResult,
    /// Reply text for response/send hooks.
    Text,
    Recipient,
    /// Error description for the error hook.
    ErrorMessage,
    /// Name of the hook (or pipeline stage) an error came from.
    HookName,
    /// Plugin that raised the error.
    PluginId,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HookContext
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The mutable state threaded through one hook chain run.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    values: HashMap<CtxKey, Value>,
    /// When set, the chain stops immediately and the orchestrator treats
    /// the event as consumed.
    pub abort: bool,
    /// Optional replacement response used by aborting hooks.
    pub abort_message: Option<String>,
}

impl HookContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert for constructing a context.
    pub fn with(mut self, key: CtxKey, value: impl Into<Value>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    /// Builder-style insert of any serializable value.
    pub fn with_json<T: Serialize>(mut self, key: CtxKey, value: &T) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.values.insert(key, v);
        }
        self
    }

    pub fn set(&mut self, key: CtxKey, value: impl Into<Value>) {
        self.values.insert(key, value.into());
    }

    pub fn set_json<T: Serialize>(&mut self, key: CtxKey, value: &T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.values.insert(key, v);
        }
    }

    pub fn get(&self, key: CtxKey) -> Option<&Value> {
        self.values.get(&key)
    }

    pub fn get_str(&self, key: CtxKey) -> Option<&str> {
        self.values.get(&key).and_then(|v| v.as_str())
    }

    pub fn get_u64(&self, key: CtxKey) -> Option<u64> {
        self.values.get(&key).and_then(|v| v.as_u64())
    }

    pub fn get_bool(&self, key: CtxKey) -> Option<bool> {
        self.values.get(&key).and_then(|v| v.as_bool())
    }

    /// Deserialize a structured value (e.g. the message list).
    pub fn get_as<T: DeserializeOwned>(&self, key: CtxKey) -> Option<T> {
        self.values
            .get(&key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Stop the chain, optionally with a replacement response.
    pub fn abort_with(&mut self, message: impl Into<String>) {
        self.abort = true;
        self.abort_message = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_names_are_stable() {
        assert_eq!(Hook::MessageReceived.as_str(), "on_message_received");
        assert_eq!(Hook::TransformResponse.as_str(), "transform_response");
        assert_eq!(Hook::Error.as_str(), "on_error");
        assert_eq!(Hook::ALL.len(), 11);
    }

    #[test]
    fn context_round_trips_values() {
        let mut ctx = HookContext::new()
            .with(CtxKey::Message, "hi")
            .with(CtxKey::TokensIn, 12u64);
        assert_eq!(ctx.get_str(CtxKey::Message), Some("hi"));
        assert_eq!(ctx.get_u64(CtxKey::TokensIn), Some(12));

        ctx.set(CtxKey::Text, "reply");
        assert_eq!(ctx.get_str(CtxKey::Text), Some("reply"));
    }

    #[test]
    fn abort_with_sets_both_fields() {
        let mut ctx = HookContext::new();
        ctx.abort_with("blocked");
        assert!(ctx.abort);
        assert_eq!(ctx.abort_message.as_deref(), Some("blocked"));
    }
}
