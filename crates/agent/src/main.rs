use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use cb_agent::cli::{self, Cli, Command, ConfigCommand, PairingCommand};
use cb_agent::{bootstrap, Agent, RunOutcome};
use cb_domain::config::{Config, ConfigSeverity};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            stdin,
            continue_session,
            debug,
            config,
        } => run(stdin, continue_session, debug, config).await,
        Command::Restart => restart(),
        Command::Status { json } => cli::status::status(json),
        Command::Config(cmd) => match cmd {
            ConfigCommand::Show { reveal } => cli::config_cmd::show(reveal),
            ConfigCommand::Get { key } => cli::config_cmd::get(&key),
            ConfigCommand::Set { key, value } => cli::config_cmd::set(&key, &value),
            ConfigCommand::Validate => cli::config_cmd::validate(),
            ConfigCommand::Edit => cli::config_cmd::edit(),
        },
        Command::Pairing(cmd) => match cmd {
            PairingCommand::List => cli::pairing_cmd::list(),
            PairingCommand::Approve { code } => cli::pairing_cmd::approve(&code),
            PairingCommand::Reject { code } => cli::pairing_cmd::reject(&code),
            PairingCommand::Revoke { channel, user_id } => {
                cli::pairing_cmd::revoke(&channel, &user_id)
            }
        },
    }
}

fn init_tracing(debug: bool) {
    let default = if debug {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// `cobot run` — the agent process.
async fn run(
    stdin_mode: bool,
    continue_session: bool,
    debug: bool,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    init_tracing(debug);
    if continue_session {
        tracing::warn!("--continue has no effect: the core keeps no persistent session state");
    }

    // ── Config ───────────────────────────────────────────────────────
    let config = match &config_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            let (config, found) = Config::find_and_load()?;
            match found {
                Some(path) => tracing::info!(path = %path.display(), "config loaded"),
                None => tracing::warn!("no config file found, using defaults"),
            }
            config
        }
    };

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if Config::has_errors(&issues) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── PID file ─────────────────────────────────────────────────────
    let pid_path = cli::pid::pid_file_path();
    let pid_handle = cli::pid::write_pid_file(&pid_path)?;

    // ── Plugins ──────────────────────────────────────────────────────
    let kernel = bootstrap::build_kernel(&config).context("building plugin registry")?;
    let registered: Vec<String> = kernel
        .list_plugins()
        .into_iter()
        .map(|p| p.id)
        .collect();
    tracing::info!(count = registered.len(), plugins = ?registered, "plugins registered");
    if let Err(e) = kernel.start_all().await {
        // Unwind whatever did start before bailing out.
        kernel.stop_all().await;
        cli::pid::remove_pid_file(&pid_path, pid_handle);
        return Err(e).context("starting plugins");
    }

    // ── Signals ──────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let restart_signal = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(shutdown_tx, restart_signal.clone());

    // ── Main loop ────────────────────────────────────────────────────
    let agent = Agent::new(kernel.clone(), &config, shutdown_rx);
    let outcome = if stdin_mode {
        agent.run_stdin().await
    } else {
        agent.run_loop().await
    };

    // ── Shutdown ─────────────────────────────────────────────────────
    let restart = outcome == RunOutcome::Restart || restart_signal.load(Ordering::SeqCst);
    tracing::info!(
        reason = if restart { "restart_requested" } else { "shutdown" },
        "agent stopping"
    );
    kernel.stop_all().await;
    cli::pid::remove_pid_file(&pid_path, pid_handle);

    if restart {
        reexec();
    }
    Ok(())
}

/// Listen for SIGINT/SIGTERM (graceful stop) and SIGUSR1 (re-exec).
fn spawn_signal_listener(shutdown_tx: watch::Sender<bool>, restart: Arc<AtomicBool>) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "cannot install SIGTERM handler");
                return;
            }
        };
        let mut usr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "cannot install SIGUSR1 handler");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received");
            }
            _ = term.recv() => {
                tracing::info!("SIGTERM received");
            }
            _ = usr1.recv() => {
                tracing::info!("SIGUSR1 received, will re-exec");
                restart.store(true, Ordering::SeqCst);
            }
        }
        let _ = shutdown_tx.send(true);
    });
}

/// Replace the process image with a fresh copy of ourselves.
fn reexec() -> ! {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("cobot"));
    let args: Vec<String> = std::env::args().skip(1).collect();
    let err = std::process::Command::new(exe).args(args).exec();
    eprintln!("re-exec failed: {err}");
    std::process::exit(1);
}

/// `cobot restart` — signal the running instance.
fn restart() -> anyhow::Result<()> {
    let pid_path = cli::pid::pid_file_path();
    let Some(pid) = cli::pid::read_pid(&pid_path) else {
        anyhow::bail!("cobot is not running");
    };

    let status = std::process::Command::new("kill")
        .arg("-USR1")
        .arg(pid.to_string())
        .status()
        .context("sending SIGUSR1")?;
    if !status.success() {
        anyhow::bail!("failed to signal PID {pid}");
    }
    println!("Restart signal sent to PID {pid}");
    Ok(())
}
