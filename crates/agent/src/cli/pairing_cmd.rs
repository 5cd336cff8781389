//! `cobot pairing` — operator side of the authorization gate.

use anyhow::bail;

use cb_domain::config::Config;
use cb_pairing::{PairingPlugin, PairingStore};

fn open_store() -> anyhow::Result<PairingStore> {
    let (config, _) = Config::find_and_load()?;
    let path = config
        .pairing
        .storage_path
        .unwrap_or_else(PairingPlugin::default_storage_path);
    Ok(PairingStore::new(path))
}

pub fn list() -> anyhow::Result<()> {
    let store = open_store()?;

    let pending = store.pending();
    if pending.is_empty() {
        println!("No pending requests.");
    } else {
        println!("Pending requests:");
        for req in pending {
            println!(
                "  [{}] {}:{} ({}) - {}",
                req.code, req.channel, req.user_id, req.name, req.requested_at
            );
        }
    }

    println!();
    let authorized = store.authorized();
    if authorized.is_empty() {
        println!("No authorized users.");
    } else {
        println!("Authorized users:");
        for user in authorized {
            println!(
                "  {}:{} ({}) - {}",
                user.channel, user.user_id, user.name, user.approved_at
            );
        }
    }
    Ok(())
}

pub fn approve(code: &str) -> anyhow::Result<()> {
    let store = open_store()?;
    match store.approve(code)? {
        Some(user) => {
            println!("Approved {} ({}:{})", user.name, user.channel, user.user_id);
            Ok(())
        }
        None => bail!("code not found: {code}"),
    }
}

pub fn reject(code: &str) -> anyhow::Result<()> {
    let store = open_store()?;
    if store.reject(code)? {
        println!("Rejected request with code: {code}");
        Ok(())
    } else {
        bail!("code not found: {code}")
    }
}

pub fn revoke(channel: &str, user_id: &str) -> anyhow::Result<()> {
    let store = open_store()?;
    if store.revoke(channel, user_id)? {
        println!("Revoked {channel}:{user_id}");
        Ok(())
    } else {
        bail!("user not found: {channel}:{user_id}")
    }
}
