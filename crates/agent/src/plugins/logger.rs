//! Lifecycle logging plugin.
//!
//! First in the hook chain: turns pipeline activity into `tracing`
//! events. Purely observational, never aborts.

use async_trait::async_trait;
use parking_lot::RwLock;

use cb_domain::config::Config;
use cb_domain::Result;
use cb_kernel::{Capability, CtxKey, Hook, HookContext, Plugin, PluginMeta};

static META: PluginMeta = PluginMeta::new("logger", "1.0.0")
    .with_capabilities(&[Capability::Logging])
    .with_priority(5);

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

fn parse_level(raw: &str) -> Level {
    match raw {
        "debug" => Level::Debug,
        "warn" => Level::Warn,
        "error" => Level::Error,
        _ => Level::Info,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &s[..cut])
}

pub struct LoggerPlugin {
    level: RwLock<Level>,
}

impl LoggerPlugin {
    pub fn new() -> Self {
        Self {
            level: RwLock::new(Level::Info),
        }
    }

    fn enabled(&self, level: Level) -> bool {
        level >= *self.level.read()
    }
}

impl Default for LoggerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for LoggerPlugin {
    fn meta(&self) -> &PluginMeta {
        &META
    }

    fn configure(&self, config: &Config) -> Result<()> {
        *self.level.write() = parse_level(&config.logger.level);
        Ok(())
    }

    fn hooks(&self) -> &'static [Hook] {
        &[
            Hook::MessageReceived,
            Hook::BeforeLlmCall,
            Hook::AfterLlmCall,
            Hook::BeforeToolExec,
            Hook::AfterSend,
            Hook::Error,
        ]
    }

    async fn on_hook(&self, hook: Hook, ctx: &mut HookContext) -> Result<()> {
        match hook {
            Hook::MessageReceived => {
                if self.enabled(Level::Info) {
                    tracing::info!(
                        sender = %truncate(ctx.get_str(CtxKey::Sender).unwrap_or(""), 16),
                        content = %truncate(ctx.get_str(CtxKey::Message).unwrap_or(""), 50),
                        "message received"
                    );
                }
            }
            Hook::BeforeLlmCall => {
                if self.enabled(Level::Debug) {
                    tracing::debug!(
                        model = ctx.get_str(CtxKey::Model).unwrap_or(""),
                        "calling llm"
                    );
                }
            }
            Hook::AfterLlmCall => {
                if self.enabled(Level::Info) {
                    tracing::info!(
                        tokens_in = ctx.get_u64(CtxKey::TokensIn).unwrap_or(0),
                        tokens_out = ctx.get_u64(CtxKey::TokensOut).unwrap_or(0),
                        "llm call done"
                    );
                }
            }
            Hook::BeforeToolExec => {
                if self.enabled(Level::Info) {
                    tracing::info!(
                        tool = ctx.get_str(CtxKey::Tool).unwrap_or(""),
                        "executing tool"
                    );
                }
            }
            Hook::AfterSend => {
                if self.enabled(Level::Info) {
                    tracing::info!(
                        recipient = %truncate(ctx.get_str(CtxKey::Recipient).unwrap_or(""), 16),
                        "reply sent"
                    );
                }
            }
            Hook::Error => {
                if self.enabled(Level::Error) {
                    tracing::error!(
                        hook = ctx.get_str(CtxKey::HookName).unwrap_or(""),
                        error = ctx.get_str(CtxKey::ErrorMessage).unwrap_or(""),
                        "pipeline error"
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing_defaults_to_info() {
        assert_eq!(parse_level("debug"), Level::Debug);
        assert_eq!(parse_level("bogus"), Level::Info);
        assert_eq!(parse_level("error"), Level::Error);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate("short", 16), "short");
        let cut = truncate("héllo wörld exceedingly long", 7);
        assert!(cut.ends_with('…'));
        assert!(cut.len() <= 11);
    }
}
