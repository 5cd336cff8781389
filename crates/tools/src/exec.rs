//! Shell execution with an allow/blocklist policy and a hard timeout.

use regex::Regex;
use std::time::Duration;
use tokio::process::Command;

use cb_domain::config::ExecConfig;
use cb_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compiled exec policy. Blocklist wins over allowlist; a non-empty
/// allowlist requires a match.
pub struct ExecPolicy {
    enabled: bool,
    allowlist: Vec<Regex>,
    blocklist: Vec<Regex>,
    pub timeout: Duration,
}

impl ExecPolicy {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn from_config(config: &ExecConfig) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p)
                        .map_err(|e| Error::Config(format!("invalid exec pattern \"{p}\": {e}")))
                })
                .collect()
        };

        Ok(Self {
            enabled: config.enabled,
            allowlist: compile(&config.allowlist)?,
            blocklist: compile(&config.blocklist)?,
            timeout: Duration::from_secs(config.timeout),
        })
    }

    /// Check whether a command may run. Returns the denial reason.
    pub fn check(&self, command: &str) -> std::result::Result<(), String> {
        if !self.enabled {
            return Err("exec is disabled".into());
        }

        for pattern in &self.blocklist {
            if pattern.is_match(command) {
                return Err(format!("blocked by pattern: {pattern}"));
            }
        }

        if !self.allowlist.is_empty()
            && !self.allowlist.iter().any(|p| p.is_match(command))
        {
            return Err("not in allowlist".into());
        }

        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run a command via `sh -c`, capturing stdout and stderr.
///
/// Stderr is appended as a `[stderr]:` block, a non-zero exit code as
/// `[exit code: N]`. On timeout the child is killed (`kill_on_drop`) and
/// an error string is returned. Output longer than `output_cap` bytes is
/// truncated.
pub async fn run_command(command: &str, timeout: Duration, output_cap: usize) -> String {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return format!("Error: failed to spawn: {e}"),
    };

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return format!("Error: {e}"),
        // Dropping the future kills the child.
        Err(_) => return format!("Error: Timed out after {}s", timeout.as_secs()),
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    let mut result = stdout.into_owned();
    if !stderr.is_empty() {
        result.push_str(&format!("\n[stderr]: {stderr}"));
    }
    if let Some(code) = output.status.code() {
        if code != 0 {
            result.push_str(&format!("\n[exit code: {code}]"));
        }
    }

    if result.len() > output_cap {
        let mut cut = output_cap;
        while cut > 0 && !result.is_char_boundary(cut) {
            cut -= 1;
        }
        result.truncate(cut);
        result.push_str("\n[truncated]");
    }

    if result.is_empty() {
        "(no output)".into()
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(enabled: bool, allow: &[&str], block: &[&str]) -> ExecPolicy {
        ExecPolicy::from_config(&ExecConfig {
            enabled,
            allowlist: allow.iter().map(|s| s.to_string()).collect(),
            blocklist: block.iter().map(|s| s.to_string()).collect(),
            timeout: 5,
        })
        .unwrap()
    }

    #[test]
    fn disabled_policy_rejects_everything() {
        let p = policy(false, &[], &[]);
        assert!(p.check("echo hi").is_err());
    }

    #[test]
    fn blocklist_wins() {
        let p = policy(true, &[], &["rm\\s+-rf"]);
        assert!(p.check("rm -rf /").is_err());
        assert!(p.check("echo hi").is_ok());
    }

    #[test]
    fn allowlist_restricts_when_non_empty() {
        let p = policy(true, &["^echo"], &[]);
        assert!(p.check("echo hi").is_ok());
        assert!(p.check("ls").is_err());
    }

    #[test]
    fn empty_allowlist_allows_all() {
        let p = policy(true, &[], &[]);
        assert!(p.check("anything goes").is_ok());
    }

    #[tokio::test]
    async fn captures_stdout() {
        let out = run_command("echo hello", Duration::from_secs(5), 64_000).await;
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn reports_stderr_and_exit_code() {
        let out = run_command("echo oops >&2; exit 3", Duration::from_secs(5), 64_000).await;
        assert!(out.contains("[stderr]: oops"));
        assert!(out.contains("[exit code: 3]"));
    }

    #[tokio::test]
    async fn times_out_long_commands() {
        let out = run_command("sleep 5", Duration::from_millis(100), 64_000).await;
        assert!(out.starts_with("Error: Timed out"));
    }

    #[tokio::test]
    async fn truncates_long_output() {
        let out = run_command("yes x | head -c 2000", Duration::from_secs(5), 100).await;
        assert!(out.ends_with("[truncated]"));
        assert!(out.len() < 200);
    }

    #[tokio::test]
    async fn empty_output_is_marked() {
        let out = run_command("true", Duration::from_secs(5), 64_000).await;
        assert_eq!(out, "(no output)");
    }
}
