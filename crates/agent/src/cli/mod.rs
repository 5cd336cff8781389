pub mod config_cmd;
pub mod pairing_cmd;
pub mod pid;
pub mod status;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cobot — a self-sovereign conversational agent.
#[derive(Debug, Parser)]
#[command(name = "cobot", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the agent.
    Run {
        /// Read messages from stdin instead of polling channels.
        #[arg(long)]
        stdin: bool,
        /// Accepted for compatibility; conversation state is not
        /// persisted by the core.
        #[arg(long = "continue")]
        continue_session: bool,
        /// Verbose (debug-level) logging.
        #[arg(long)]
        debug: bool,
        /// Config file path (default: ~/.cobot/cobot.yml, then ./cobot.yml).
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Restart the running agent via its PID file.
    Restart,
    /// Show agent status.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage user pairing and authorization.
    #[command(subcommand)]
    Pairing(PairingCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the configuration (secrets masked).
    Show {
        /// Do not mask secret-like values.
        #[arg(long)]
        reveal: bool,
    },
    /// Read one value by dot-path (e.g. `telegram.poll_timeout`).
    Get { key: String },
    /// Set one value by dot-path.
    Set { key: String, value: String },
    /// Validate the configuration file.
    Validate,
    /// Open the config file in $EDITOR.
    Edit,
}

#[derive(Debug, Subcommand)]
pub enum PairingCommand {
    /// List pending requests and authorized users.
    List,
    /// Approve a pending request by code.
    Approve { code: String },
    /// Reject a pending request by code.
    Reject { code: String },
    /// Revoke a user's authorization.
    Revoke { channel: String, user_id: String },
}
