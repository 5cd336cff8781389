//! Typed capability interfaces.
//!
//! Each capability and extension point has a declared call signature; a
//! plugin exposes the matching facet through its `as_*` accessor and the
//! consumer dispatches through the trait. There is no method-name lookup.

use async_trait::async_trait;
use serde_json::Value;

use cb_domain::chat::{ChatRequest, ChatResponse, ToolDefinition};
use cb_domain::message::{IncomingMessage, Observation, OutgoingMessage};
use cb_domain::Result;

/// Interface for LLM plugins (capability `llm`).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Chat completion with optional tool support.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse>;
}

/// Interface for tool plugins (capability `tools`).
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Tool definitions to offer the LLM.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Execute a tool. Failures are reported in the result string with an
    /// `"Error:"` prefix; this never raises.
    async fn execute(&self, name: &str, args: &Value) -> String;

    /// True once a tool has asked the process to restart.
    fn restart_requested(&self) -> bool;
}

/// Provider side of the session layer: the `session.receive`,
/// `session.send`, `session.typing` and `session.presence` points.
///
/// Adapters own their update cursor across `receive` calls: a message is
/// never re-emitted. Long-polling adapters must keep their transport
/// timeout above the protocol timeout.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Drain new messages since the previous call.
    async fn receive(&self) -> Result<Vec<IncomingMessage>>;

    /// Deliver a message on this channel. `Ok(false)` means the channel
    /// declined (e.g. not configured).
    async fn send(&self, msg: &OutgoingMessage) -> Result<bool>;

    /// Show a typing indicator, where the protocol has one.
    async fn typing(&self, channel_id: &str) -> Result<()> {
        let _ = channel_id;
        Ok(())
    }

    /// Publish a presence status, where the protocol has one.
    async fn presence(&self, status: &str) -> Result<()> {
        let _ = status;
        Ok(())
    }
}

/// Aggregate side of the session layer: the `communication.*` points,
/// provided by the plugin carrying the `communication` capability.
#[async_trait]
pub trait Communicator: Send + Sync {
    /// Poll every channel, returning messages sorted by timestamp.
    async fn poll(&self) -> Vec<IncomingMessage>;

    /// Route a message to the channel named by `msg.channel_type`.
    async fn send(&self, msg: OutgoingMessage) -> bool;

    /// Route a typing indicator. Fire-and-forget.
    async fn typing(&self, channel_type: &str, channel_id: &str);

    /// The distinct set of registered channel ids.
    fn channels(&self) -> Vec<String>;
}

/// Observer side of the session layer: `session.on_receive` fires before
/// the orchestrator sees a message, `session.on_send` only after a
/// successful delivery. Observers are side-effect only.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    async fn on_receive(&self, msg: &IncomingMessage);
    async fn on_send(&self, msg: &OutgoingMessage);
}

/// Consumer of lurker observations (`lurker.on_observe`).
#[async_trait]
pub trait ObserveSink: Send + Sync {
    async fn on_observe(&self, obs: &Observation);
}

/// Interface for wallet plugins (capability `wallet`). No implementation
/// ships in-tree; tools and the CLI degrade gracefully without one.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Balance in sats.
    async fn balance(&self) -> Result<u64>;

    /// Pay a BOLT11 invoice.
    async fn pay(&self, invoice: &str) -> Result<()>;

    /// Address/invoice for receiving payments.
    async fn receive_address(&self) -> Result<String>;
}
