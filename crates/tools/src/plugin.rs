//! The tools plugin: definitions for the LLM plus the dispatcher.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use cb_domain::chat::ToolDefinition;
use cb_domain::config::Config;
use cb_domain::Result;
use cb_kernel::{Capability, Kernel, Plugin, PluginMeta, ToolProvider, WalletProvider};

use crate::exec::{self, ExecPolicy};
use crate::files;

/// Byte budget for tool output handed back to the model.
const CONTEXT_BUDGET: usize = 64_000;

static META: PluginMeta = PluginMeta::new("tools", "1.0.0")
    .with_capabilities(&[Capability::Tools])
    .with_dependencies(&["config"])
    .with_priority(30);

/// Tool execution plugin.
pub struct ToolsPlugin {
    policy: RwLock<Option<ExecPolicy>>,
    restart_requested: AtomicBool,
    kernel: RwLock<Weak<Kernel>>,
}

impl ToolsPlugin {
    pub fn new() -> Self {
        Self {
            policy: RwLock::new(None),
            restart_requested: AtomicBool::new(false),
            kernel: RwLock::new(Weak::new()),
        }
    }

    fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
        args.get(key).and_then(|v| v.as_str())
    }

    async fn run_exec(&self, args: &Value) -> String {
        let Some(command) = Self::str_arg(args, "command") else {
            return "Error: missing 'command' argument".into();
        };

        let (timeout, denial) = {
            let guard = self.policy.read();
            let Some(policy) = guard.as_ref() else {
                return "Error: exec policy not configured".into();
            };
            let timeout = args
                .get("timeout")
                .and_then(|v| v.as_u64())
                .map(std::time::Duration::from_secs)
                .unwrap_or(policy.timeout);
            (timeout, policy.check(command).err())
        };

        if let Some(reason) = denial {
            return format!("Error: {reason}");
        }

        exec::run_command(command, timeout, CONTEXT_BUDGET / 2).await
    }

    fn wallet(&self) -> Option<Arc<dyn Plugin>> {
        self.kernel
            .read()
            .upgrade()?
            .get_by_capability(Capability::Wallet)
    }

    async fn wallet_balance(&self) -> String {
        let Some(plugin) = self.wallet() else {
            return "Error: Wallet not available".into();
        };
        let Some(wallet) = plugin.as_wallet() else {
            return "Error: Wallet not available".into();
        };
        match wallet.balance().await {
            Ok(sats) => format!("Balance: {sats} sats"),
            Err(e) => format!("Error: {e}"),
        }
    }

    async fn wallet_pay(&self, args: &Value) -> String {
        let Some(invoice) = Self::str_arg(args, "invoice") else {
            return "Error: missing 'invoice' argument".into();
        };
        let Some(plugin) = self.wallet() else {
            return "Error: Wallet not available".into();
        };
        let Some(wallet) = plugin.as_wallet() else {
            return "Error: Wallet not available".into();
        };
        match wallet.pay(invoice).await {
            Ok(()) => "Payment successful".into(),
            Err(e) => format!("Failed: {e}"),
        }
    }

    async fn wallet_receive(&self) -> String {
        let Some(plugin) = self.wallet() else {
            return "Error: Wallet not available".into();
        };
        let Some(wallet) = plugin.as_wallet() else {
            return "Error: Wallet not available".into();
        };
        match wallet.receive_address().await {
            Ok(address) => format!("Address: {address}"),
            Err(e) => format!("Error: {e}"),
        }
    }
}

impl Default for ToolsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ToolsPlugin {
    fn meta(&self) -> &PluginMeta {
        &META
    }

    fn configure(&self, config: &Config) -> Result<()> {
        *self.policy.write() = Some(ExecPolicy::from_config(&config.exec)?);
        Ok(())
    }

    async fn start(&self, kernel: &Arc<Kernel>) -> Result<()> {
        *self.kernel.write() = Arc::downgrade(kernel);
        let enabled = self
            .policy
            .read()
            .as_ref()
            .map(ExecPolicy::is_enabled)
            .unwrap_or(false);
        tracing::info!(exec_enabled = enabled, "tools ready");
        Ok(())
    }

    fn as_tools(&self) -> Option<&dyn ToolProvider> {
        Some(self)
    }
}

#[async_trait]
impl ToolProvider for ToolsPlugin {
    fn definitions(&self) -> Vec<ToolDefinition> {
        tool_definitions()
    }

    async fn execute(&self, name: &str, args: &Value) -> String {
        match name {
            "read_file" => match Self::str_arg(args, "path") {
                Some(path) => files::read_file(path, CONTEXT_BUDGET),
                None => "Error: missing 'path' argument".into(),
            },
            "write_file" => {
                match (Self::str_arg(args, "path"), Self::str_arg(args, "content")) {
                    (Some(path), Some(content)) => files::write_file(path, content),
                    _ => "Error: missing 'path' or 'content' argument".into(),
                }
            }
            "edit_file" => match (
                Self::str_arg(args, "path"),
                Self::str_arg(args, "old_text"),
                Self::str_arg(args, "new_text"),
            ) {
                (Some(path), Some(old), Some(new)) => files::edit_file(path, old, new),
                _ => "Error: missing 'path', 'old_text' or 'new_text' argument".into(),
            },
            "exec" => self.run_exec(args).await,
            "restart_self" => {
                self.restart_requested.store(true, Ordering::SeqCst);
                "Restart requested.".into()
            }
            "wallet_balance" => self.wallet_balance().await,
            "wallet_pay" => self.wallet_pay(args).await,
            "wallet_receive" => self.wallet_receive().await,
            other => format!("Error: Unknown tool '{other}'"),
        }
    }

    fn restart_requested(&self) -> bool {
        self.restart_requested.load(Ordering::SeqCst)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "read_file".into(),
            description: "Read contents of a file".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path to read"}
                },
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "write_file".into(),
            description: "Write content to a file (creates or overwrites)".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path to write"},
                    "content": {"type": "string", "description": "Content to write"}
                },
                "required": ["path", "content"]
            }),
        },
        ToolDefinition {
            name: "edit_file".into(),
            description: "Replace exact text in a file".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path to edit"},
                    "old_text": {"type": "string", "description": "Exact text to find"},
                    "new_text": {"type": "string", "description": "Text to replace with"}
                },
                "required": ["path", "old_text", "new_text"]
            }),
        },
        ToolDefinition {
            name: "exec".into(),
            description: "Execute a shell command".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Shell command to run"},
                    "timeout": {"type": "integer", "description": "Timeout in seconds (default 30)"}
                },
                "required": ["command"]
            }),
        },
        ToolDefinition {
            name: "restart_self".into(),
            description: "Restart the cobot process".into(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        },
        ToolDefinition {
            name: "wallet_balance".into(),
            description: "Check wallet balance in sats".into(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        },
        ToolDefinition {
            name: "wallet_pay".into(),
            description: "Pay a Lightning invoice".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "invoice": {"type": "string", "description": "BOLT11 Lightning invoice"}
                },
                "required": ["invoice"]
            }),
        },
        ToolDefinition {
            name: "wallet_receive".into(),
            description: "Get Lightning address to receive payments".into(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        },
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use cb_domain::config::ExecConfig;

    fn plugin() -> ToolsPlugin {
        let plugin = ToolsPlugin::new();
        plugin
            .configure(&Config::default())
            .expect("default config is valid");
        plugin
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_string() {
        let out = plugin().execute("frobnicate", &json!({})).await;
        assert_eq!(out, "Error: Unknown tool 'frobnicate'");
    }

    #[tokio::test]
    async fn exec_honors_blocklist() {
        let plugin = ToolsPlugin::new();
        let mut config = Config::default();
        config.exec = ExecConfig {
            enabled: true,
            allowlist: vec![],
            blocklist: vec!["rm".into()],
            timeout: 5,
        };
        plugin.configure(&config).unwrap();

        let out = plugin
            .execute("exec", &json!({"command": "rm -rf /tmp/x"}))
            .await;
        assert!(out.starts_with("Error: blocked by pattern"));
    }

    #[tokio::test]
    async fn exec_runs_allowed_commands() {
        let out = plugin()
            .execute("exec", &json!({"command": "echo tool-ok"}))
            .await;
        assert_eq!(out.trim(), "tool-ok");
    }

    #[tokio::test]
    async fn restart_self_sets_the_flag() {
        let plugin = plugin();
        assert!(!plugin.restart_requested());
        let out = plugin.execute("restart_self", &json!({})).await;
        assert_eq!(out, "Restart requested.");
        assert!(plugin.restart_requested());
    }

    #[tokio::test]
    async fn wallet_tools_degrade_without_wallet() {
        let out = plugin().execute("wallet_balance", &json!({})).await;
        assert_eq!(out, "Error: Wallet not available");
    }

    #[test]
    fn definitions_cover_the_tool_set() {
        let defs = tool_definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"read_file"));
        assert!(names.contains(&"exec"));
        assert!(names.contains(&"restart_self"));
        assert!(names.contains(&"wallet_pay"));
        assert_eq!(defs.len(), 8);
    }
}
