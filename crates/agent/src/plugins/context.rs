//! System-prompt assembly.
//!
//! Appends the agent identity and the conversation peer to the soul
//! prompt before the first LLM call.

use async_trait::async_trait;
use parking_lot::RwLock;

use cb_domain::config::Config;
use cb_domain::Result;
use cb_kernel::{CtxKey, Hook, HookContext, Plugin, PluginMeta};

static META: PluginMeta = PluginMeta::new("context", "1.0.0")
    .with_dependencies(&["config"])
    .with_priority(18);

pub struct ContextPlugin {
    identity: RwLock<String>,
}

impl ContextPlugin {
    pub fn new() -> Self {
        Self {
            identity: RwLock::new(String::new()),
        }
    }
}

impl Default for ContextPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ContextPlugin {
    fn meta(&self) -> &PluginMeta {
        &META
    }

    fn configure(&self, config: &Config) -> Result<()> {
        *self.identity.write() = config.identity.name.clone();
        Ok(())
    }

    fn hooks(&self) -> &'static [Hook] {
        &[Hook::TransformSystemPrompt]
    }

    async fn on_hook(&self, _hook: Hook, ctx: &mut HookContext) -> Result<()> {
        let identity = self.identity.read().clone();
        let mut prompt = ctx.get_str(CtxKey::Prompt).unwrap_or_default().to_owned();

        if prompt.is_empty() {
            prompt = format!("You are {identity}, a helpful AI assistant.");
        } else if !identity.is_empty() {
            prompt.push_str(&format!("\n\nYour name is {identity}."));
        }

        if let Some(peer) = ctx.get_str(CtxKey::Peer).filter(|p| !p.is_empty()) {
            prompt.push_str(&format!("\nYou are talking with {peer}."));
        }

        ctx.set(CtxKey::Prompt, prompt);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_identity_and_peer() {
        let plugin = ContextPlugin::new();
        let mut config = Config::default();
        config.identity.name = "Testbot".into();
        plugin.configure(&config).unwrap();

        let mut ctx = HookContext::new()
            .with(CtxKey::Prompt, "Soul text.")
            .with(CtxKey::Peer, "alice");
        plugin
            .on_hook(Hook::TransformSystemPrompt, &mut ctx)
            .await
            .unwrap();

        let prompt = ctx.get_str(CtxKey::Prompt).unwrap();
        assert!(prompt.starts_with("Soul text."));
        assert!(prompt.contains("Your name is Testbot."));
        assert!(prompt.contains("talking with alice"));
    }

    #[tokio::test]
    async fn empty_prompt_gets_a_default() {
        let plugin = ContextPlugin::new();
        let mut config = Config::default();
        config.identity.name = "Testbot".into();
        plugin.configure(&config).unwrap();

        let mut ctx = HookContext::new().with(CtxKey::Prompt, "");
        plugin
            .on_hook(Hook::TransformSystemPrompt, &mut ctx)
            .await
            .unwrap();
        assert!(ctx
            .get_str(CtxKey::Prompt)
            .unwrap()
            .starts_with("You are Testbot"));
    }
}
