//! `cobot config` — dot-path access to the YAML config file.

use anyhow::{bail, Context};
use std::path::PathBuf;

use cb_domain::config::{get_path, mask_secrets, parse_scalar, set_path, Config};

/// The file `get`/`set`/`edit` operate on: a local `cobot.yml` wins,
/// otherwise `~/.cobot/cobot.yml` (created on first `set`).
pub fn config_file_path() -> PathBuf {
    let local = PathBuf::from("cobot.yml");
    if local.exists() {
        return local;
    }
    let home = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cobot")
        .join("cobot.yml");
    if home.exists() {
        home
    } else {
        local
    }
}

fn load_raw(path: &PathBuf) -> anyhow::Result<serde_yaml::Value> {
    if !path.exists() {
        return Ok(serde_yaml::Value::Mapping(Default::default()));
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(if value.is_null() {
        serde_yaml::Value::Mapping(Default::default())
    } else {
        value
    })
}

/// `config show [--reveal]`
pub fn show(reveal: bool) -> anyhow::Result<()> {
    let path = config_file_path();
    let mut value = load_raw(&path)?;
    if !reveal {
        mask_secrets(&mut value);
    }
    print!("{}", serde_yaml::to_string(&value)?);
    Ok(())
}

/// `config get KEY`
pub fn get(key: &str) -> anyhow::Result<()> {
    let path = config_file_path();
    let value = load_raw(&path)?;
    match get_path(&value, key) {
        Some(found) => {
            print!("{}", serde_yaml::to_string(found)?);
            Ok(())
        }
        None => bail!("key not found: {key}"),
    }
}

/// `config set KEY VALUE`
pub fn set(key: &str, raw_value: &str) -> anyhow::Result<()> {
    let path = config_file_path();
    let mut value = load_raw(&path)?;
    set_path(&mut value, key, parse_scalar(raw_value))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_yaml::to_string(&value)?)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("{key} = {raw_value}");
    Ok(())
}

/// `config validate`
pub fn validate() -> anyhow::Result<()> {
    let (config, path) = Config::find_and_load()?;
    match &path {
        Some(path) => eprintln!("Validating {}", path.display()),
        None => eprintln!("No config file found, validating defaults"),
    }

    let issues = config.validate();
    if issues.is_empty() {
        println!("Configuration is valid");
        return Ok(());
    }

    for issue in &issues {
        eprintln!("  {issue}");
    }
    if Config::has_errors(&issues) {
        bail!("configuration has errors");
    }
    println!("Configuration is valid (with warnings)");
    Ok(())
}

/// `config edit`
pub fn edit() -> anyhow::Result<()> {
    let path = config_file_path();
    if !path.exists() {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(
            &path,
            "# Cobot configuration\n\nprovider: ppq\n\nidentity:\n  name: Cobot\n\npolling:\n  interval_seconds: 30\n",
        )?;
    }

    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "nano".into());
    let status = std::process::Command::new(&editor)
        .arg(&path)
        .status()
        .with_context(|| format!("launching {editor}"))?;
    if !status.success() {
        bail!("editor exited with {status}");
    }
    Ok(())
}
