//! Configuration model.
//!
//! The config file is YAML (`cobot.yml`). Every string value is subject to
//! environment-variable expansion (`${VAR}`, `${VAR:-default}`) at load.
//! Lookup order: `~/.cobot/cobot.yml`, then `./cobot.yml` overriding it.

mod dotpath;
mod expand;

pub use dotpath::{get_path, mask_secrets, parse_scalar, set_path};
pub use expand::expand_env;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Selected LLM provider plugin id ("ppq", "ollama", …).
    #[serde(default = "d_provider")]
    pub provider: String,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub plugins: PluginFilterConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
    #[serde(default)]
    pub lurker: LurkerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub filedrop: FiledropConfig,
    #[serde(default)]
    pub ppq: PpqConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

fn d_provider() -> String {
    "ppq".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: d_provider(),
            identity: IdentityConfig::default(),
            polling: PollingConfig::default(),
            plugins: PluginFilterConfig::default(),
            paths: PathsConfig::default(),
            exec: ExecConfig::default(),
            pairing: PairingConfig::default(),
            lurker: LurkerConfig::default(),
            telegram: TelegramConfig::default(),
            filedrop: FiledropConfig::default(),
            ppq: PpqConfig::default(),
            ollama: OllamaConfig::default(),
            logger: LoggerConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "d_identity_name")]
    pub name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: d_identity_name(),
        }
    }
}

fn d_identity_name() -> String {
    "Cobot".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Seconds between poll cycles. Long-poll channels return earlier.
    #[serde(default = "d_poll_interval")]
    pub interval_seconds: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: d_poll_interval(),
        }
    }
}

fn d_poll_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PluginFilterConfig {
    /// When non-empty, only these plugins (plus core) are registered.
    #[serde(default)]
    pub enabled: Vec<String>,
    /// Never registered.
    #[serde(default)]
    pub disabled: Vec<String>,
    /// Reported, not loaded — plugins compile in statically.
    #[serde(default)]
    pub external: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "d_skills_path")]
    pub skills: PathBuf,
    #[serde(default = "d_memory_path")]
    pub memory: PathBuf,
    #[serde(default = "d_plugins_path")]
    pub plugins: PathBuf,
    #[serde(default = "d_soul_path")]
    pub soul: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            skills: d_skills_path(),
            memory: d_memory_path(),
            plugins: d_plugins_path(),
            soul: d_soul_path(),
        }
    }
}

fn d_skills_path() -> PathBuf {
    "./skills".into()
}
fn d_memory_path() -> PathBuf {
    "./memory".into()
}
fn d_plugins_path() -> PathBuf {
    "./plugins".into()
}
fn d_soul_path() -> PathBuf {
    "./SOUL.md".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Exec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// When non-empty, a command must match one of these regexes.
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// A command matching any of these regexes is rejected.
    #[serde(default)]
    pub blocklist: Vec<String>,
    /// Hard timeout in seconds.
    #[serde(default = "d_exec_timeout")]
    pub timeout: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowlist: Vec::new(),
            blocklist: Vec::new(),
            timeout: d_exec_timeout(),
        }
    }
}

fn d_exec_timeout() -> u64 {
    30
}

fn d_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pairing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// channel -> user ids that are authorized from the start.
    #[serde(default)]
    pub owner_ids: HashMap<String, Vec<String>>,
    /// Channels that require no authorization.
    #[serde(default)]
    pub skip_channels: Vec<String>,
    /// Store location. Defaults to `~/.cobot/pairing.yml`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<PathBuf>,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            owner_ids: HashMap::new(),
            skip_channels: Vec::new(),
            storage_path: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lurker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LurkerConfig {
    #[serde(default)]
    pub channels: Vec<LurkerChannel>,
    #[serde(default)]
    pub sink: SinkKind,
    #[serde(default = "d_lurker_dir")]
    pub base_dir: PathBuf,
}

impl Default for LurkerConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            sink: SinkKind::default(),
            base_dir: d_lurker_dir(),
        }
    }
}

fn d_lurker_dir() -> PathBuf {
    "./lurker".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LurkerChannel {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Jsonl,
    Markdown,
    None,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "d_tg_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub groups: Vec<TelegramGroup>,
    /// Long-poll protocol timeout (seconds). Transport timeout is this + 5.
    #[serde(default = "d_tg_poll_timeout")]
    pub poll_timeout: u64,
    #[serde(default = "d_media_dir")]
    pub media_dir: PathBuf,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: d_tg_api_base(),
            groups: Vec::new(),
            poll_timeout: d_tg_poll_timeout(),
            media_dir: d_media_dir(),
        }
    }
}

fn d_tg_api_base() -> String {
    "https://api.telegram.org".into()
}
fn d_tg_poll_timeout() -> u64 {
    30
}
fn d_media_dir() -> PathBuf {
    "./media".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramGroup {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default = "d_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiledropConfig {
    #[serde(default = "d_filedrop_dir")]
    pub base_dir: PathBuf,
    /// Inbox owner name. Falls back to `identity.name` when empty.
    #[serde(default)]
    pub identity: String,
}

impl Default for FiledropConfig {
    fn default() -> Self {
        Self {
            base_dir: d_filedrop_dir(),
            identity: String::new(),
        }
    }
}

fn d_filedrop_dir() -> PathBuf {
    "/tmp/filedrop".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PpqConfig {
    #[serde(default = "d_ppq_base")]
    pub api_base: String,
    /// Falls back to the `PPQ_API_KEY` env var when empty.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "d_ppq_model")]
    pub model: String,
}

impl Default for PpqConfig {
    fn default() -> Self {
        Self {
            api_base: d_ppq_base(),
            api_key: String::new(),
            model: d_ppq_model(),
        }
    }
}

fn d_ppq_base() -> String {
    "https://api.ppq.ai/v1".into()
}
fn d_ppq_model() -> String {
    "gpt-5-nano".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "d_ollama_url")]
    pub base_url: String,
    #[serde(default = "d_ollama_model")]
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: d_ollama_url(),
            model: d_ollama_model(),
        }
    }
}

fn d_ollama_url() -> String {
    "http://localhost:11434".into()
}
fn d_ollama_model() -> String {
    "llama3.2:latest".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Logger / security
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    #[serde(default = "d_log_level")]
    pub level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: d_log_level(),
        }
    }
}

fn d_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Classifier command. Receives the message text as its last argument
    /// and prints `{"flagged": bool}` JSON on stdout.
    #[serde(default)]
    pub command: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.provider.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "provider".into(),
                message: "provider must not be empty".into(),
            });
        }

        if self.polling.interval_seconds < 5 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "polling.interval_seconds".into(),
                message: format!(
                    "interval too short (min 5s, got {})",
                    self.polling.interval_seconds
                ),
            });
        }

        if self.provider == "ppq"
            && self.ppq.api_key.is_empty()
            && std::env::var("PPQ_API_KEY").is_err()
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "ppq.api_key".into(),
                message: "PPQ_API_KEY not set (required when provider=ppq)".into(),
            });
        }

        for (i, pattern) in self
            .exec
            .allowlist
            .iter()
            .chain(self.exec.blocklist.iter())
            .enumerate()
        {
            if let Err(e) = regex::Regex::new(pattern) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("exec patterns[{i}]"),
                    message: format!("invalid regex \"{pattern}\": {e}"),
                });
            }
        }

        if self.telegram.bot_token.is_empty() && !self.telegram.groups.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "telegram.bot_token".into(),
                message: "groups configured but no bot token".into(),
            });
        }

        if self.security.enabled && self.security.command.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "security.command".into(),
                message: "security filter enabled without a classifier command".into(),
            });
        }

        issues
    }

    /// True when any issue is an error.
    pub fn has_errors(issues: &[ConfigIssue]) -> bool {
        issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error)
    }

    // ── Loading ────────────────────────────────────────────────────

    /// Parse a YAML string, expanding `${VAR}` references first.
    /// An empty document yields the defaults.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(raw)?;
        if value.is_null() {
            return Ok(Self::default());
        }
        let expanded = expand_env(value);
        let config: Config = serde_yaml::from_value(expanded)?;
        Ok(config)
    }

    /// Load from an explicit path.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_yaml(&raw)
    }

    /// Locate and load the config file.
    ///
    /// `~/.cobot/cobot.yml` is tried first; a `./cobot.yml` in the working
    /// directory overrides it entirely. Missing files yield the defaults.
    /// Returns the config and the path it came from (if any).
    pub fn find_and_load() -> Result<(Self, Option<PathBuf>)> {
        let mut found: Option<PathBuf> = None;

        if let Some(home) = dirs_home() {
            let home_config = home.join(".cobot").join("cobot.yml");
            if home_config.exists() {
                found = Some(home_config);
            }
        }

        let local = PathBuf::from("cobot.yml");
        if local.exists() {
            found = Some(local);
        }

        match found {
            Some(path) => {
                let config = Self::load(&path)?;
                Ok((config, Some(path)))
            }
            None => Ok((Self::default(), None)),
        }
    }
}

/// Home directory, honoring a `HOME` override (tests set it).
fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
