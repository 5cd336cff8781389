//! YAML-backed pairing store.
//!
//! Two top-level lists: `pending` and `authorized`. Every mutation
//! rewrites the file atomically (temp file + rename) and refreshes the
//! cached modification timestamp; reads check the timestamp first so
//! changes written by the CLI are picked up by a running agent.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use cb_domain::{Error, Result};

/// Code alphabet: uppercase letters and digits minus the visually
/// ambiguous O/0/I/1. 32 characters.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 8;

/// Generate a random pairing code (uppercase, 8 chars).
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An authorized user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizedUser {
    pub channel: String,
    pub user_id: String,
    pub name: String,
    pub approved_at: DateTime<Utc>,
}

/// A pending pairing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPairing {
    pub channel: String,
    pub user_id: String,
    pub name: String,
    pub code: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    pending: Vec<PendingPairing>,
    #[serde(default)]
    authorized: Vec<AuthorizedUser>,
}

#[derive(Default)]
struct StoreState {
    pending: Vec<PendingPairing>,
    authorized: Vec<AuthorizedUser>,
    last_mtime: Option<SystemTime>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PairingStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl PairingStore {
    /// Open (or lazily create) the store at `path`. A corrupt file starts
    /// fresh rather than blocking startup.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let store = Self {
            path: path.into(),
            state: RwLock::new(StoreState::default()),
        };
        store.load();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) {
        if !self.path.exists() {
            return;
        }

        let mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();

        let parsed: StoreFile = match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_yaml::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "pairing store corrupt, starting fresh");
                StoreFile::default()
            }),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "pairing store unreadable, starting fresh");
                StoreFile::default()
            }
        };

        let mut state = self.state.write();
        state.pending = parsed.pending;
        state.authorized = parsed.authorized;
        state.last_mtime = mtime;
    }

    /// Reload when the file on disk is newer than our cached snapshot
    /// (an operator approved via CLI while we run).
    fn reload_if_changed(&self) {
        let Ok(metadata) = std::fs::metadata(&self.path) else {
            return;
        };
        let Ok(mtime) = metadata.modified() else {
            return;
        };

        let stale = {
            let state = self.state.read();
            match state.last_mtime {
                Some(cached) => mtime > cached,
                None => true,
            }
        };
        if stale {
            self.load();
        }
    }

    /// Rewrite the whole file atomically and refresh the cached mtime.
    fn save(&self, state: &mut StoreState) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent)?;

        let file = StoreFile {
            pending: state.pending.clone(),
            authorized: state.authorized.clone(),
        };
        let raw = serde_yaml::to_string(&file)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(raw.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| Error::Other(format!("persisting pairing store: {e}")))?;

        state.last_mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Check authorization, picking up CLI changes first.
    pub fn is_authorized(&self, channel: &str, user_id: &str) -> bool {
        self.reload_if_changed();
        self.state
            .read()
            .authorized
            .iter()
            .any(|u| u.channel == channel && u.user_id == user_id)
    }

    pub fn authorized(&self) -> Vec<AuthorizedUser> {
        self.state.read().authorized.clone()
    }

    pub fn pending(&self) -> Vec<PendingPairing> {
        self.state.read().pending.clone()
    }

    /// Case-insensitive code lookup.
    pub fn pending_by_code(&self, code: &str) -> Option<PendingPairing> {
        let code = code.to_ascii_uppercase();
        self.state
            .read()
            .pending
            .iter()
            .find(|r| r.code == code)
            .cloned()
    }

    pub fn pending_for_user(&self, channel: &str, user_id: &str) -> Option<PendingPairing> {
        self.state
            .read()
            .pending
            .iter()
            .find(|r| r.channel == channel && r.user_id == user_id)
            .cloned()
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Create a pending request for `(channel, user_id)`, or return the
    /// existing one — at most one pending request per user.
    pub fn add_pending(&self, channel: &str, user_id: &str, name: &str) -> Result<PendingPairing> {
        if let Some(existing) = self.pending_for_user(channel, user_id) {
            return Ok(existing);
        }

        let request = PendingPairing {
            channel: channel.to_owned(),
            user_id: user_id.to_owned(),
            name: name.to_owned(),
            code: generate_code(),
            requested_at: Utc::now(),
        };

        let mut state = self.state.write();
        state.pending.push(request.clone());
        self.save(&mut state)?;
        Ok(request)
    }

    /// Approve a pending request by code: remove it from `pending`, add
    /// the user to `authorized`. `None` when the code is unknown.
    pub fn approve(&self, code: &str) -> Result<Option<AuthorizedUser>> {
        self.reload_if_changed();
        let Some(request) = self.pending_by_code(code) else {
            return Ok(None);
        };

        let user = AuthorizedUser {
            channel: request.channel.clone(),
            user_id: request.user_id.clone(),
            name: request.name.clone(),
            approved_at: Utc::now(),
        };

        let mut state = self.state.write();
        state.pending.retain(|r| r.code != request.code);
        if !state
            .authorized
            .iter()
            .any(|u| u.channel == user.channel && u.user_id == user.user_id)
        {
            state.authorized.push(user.clone());
        }
        self.save(&mut state)?;
        Ok(Some(user))
    }

    /// Drop a pending request by code. True when found.
    pub fn reject(&self, code: &str) -> Result<bool> {
        self.reload_if_changed();
        let Some(request) = self.pending_by_code(code) else {
            return Ok(false);
        };

        let mut state = self.state.write();
        state.pending.retain(|r| r.code != request.code);
        self.save(&mut state)?;
        Ok(true)
    }

    /// Revoke a user's authorization. True when found.
    pub fn revoke(&self, channel: &str, user_id: &str) -> Result<bool> {
        self.reload_if_changed();
        let mut state = self.state.write();
        let before = state.authorized.len();
        state
            .authorized
            .retain(|u| !(u.channel == channel && u.user_id == user_id));
        if state.authorized.len() == before {
            return Ok(false);
        }
        self.save(&mut state)?;
        Ok(true)
    }

    /// Directly authorize a user (owner bootstrap). Idempotent on the
    /// `(channel, user_id)` key.
    pub fn add_authorized(
        &self,
        channel: &str,
        user_id: &str,
        name: &str,
    ) -> Result<AuthorizedUser> {
        self.reload_if_changed();
        {
            let state = self.state.read();
            if let Some(existing) = state
                .authorized
                .iter()
                .find(|u| u.channel == channel && u.user_id == user_id)
            {
                return Ok(existing.clone());
            }
        }

        let user = AuthorizedUser {
            channel: channel.to_owned(),
            user_id: user_id.to_owned(),
            name: if name.is_empty() {
                format!("owner:{user_id}")
            } else {
                name.to_owned()
            },
            approved_at: Utc::now(),
        };

        let mut state = self.state.write();
        state.authorized.push(user.clone());
        self.save(&mut state)?;
        Ok(user)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, PairingStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PairingStore::new(dir.path().join("pairing.yml"));
        (dir, store)
    }

    #[test]
    fn codes_avoid_ambiguous_characters() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), 8);
            for c in code.chars() {
                assert!(c.is_ascii_uppercase() || c.is_ascii_digit());
                assert!(!"O0I1".contains(c), "ambiguous char {c} in {code}");
            }
        }
    }

    #[test]
    fn add_pending_is_idempotent_per_user() {
        let (_dir, store) = store();
        let first = store.add_pending("telegram", "999", "mallory").unwrap();
        let second = store.add_pending("telegram", "999", "mallory").unwrap();
        assert_eq!(first.code, second.code);
        assert_eq!(store.pending().len(), 1);
    }

    #[test]
    fn approve_moves_pending_to_authorized() {
        let (_dir, store) = store();
        let req = store.add_pending("telegram", "999", "mallory").unwrap();

        let user = store.approve(&req.code).unwrap().expect("code known");
        assert_eq!(user.channel, "telegram");
        assert_eq!(user.user_id, "999");

        assert!(store.is_authorized("telegram", "999"));
        assert!(store.pending().is_empty());

        // The pending entry is gone, so a second approve of the same code
        // fails.
        assert!(store.approve(&req.code).unwrap().is_none());
    }

    #[test]
    fn approve_is_case_insensitive() {
        let (_dir, store) = store();
        let req = store.add_pending("telegram", "7", "alice").unwrap();
        let user = store.approve(&req.code.to_ascii_lowercase()).unwrap();
        assert!(user.is_some());
    }

    #[test]
    fn reject_drops_the_request() {
        let (_dir, store) = store();
        let req = store.add_pending("telegram", "8", "bob").unwrap();
        assert!(store.reject(&req.code).unwrap());
        assert!(store.pending().is_empty());
        assert!(!store.reject(&req.code).unwrap());
        assert!(!store.is_authorized("telegram", "8"));
    }

    #[test]
    fn revoke_removes_authorization() {
        let (_dir, store) = store();
        store.add_authorized("telegram", "7", "alice").unwrap();
        assert!(store.is_authorized("telegram", "7"));
        assert!(store.revoke("telegram", "7").unwrap());
        assert!(!store.is_authorized("telegram", "7"));
        assert!(!store.revoke("telegram", "7").unwrap());
    }

    #[test]
    fn add_authorized_is_idempotent() {
        let (_dir, store) = store();
        store.add_authorized("telegram", "7", "owner:7").unwrap();
        store.add_authorized("telegram", "7", "owner:7").unwrap();
        assert_eq!(store.authorized().len(), 1);
    }

    #[test]
    fn cli_writes_are_picked_up_via_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairing.yml");

        let agent_store = PairingStore::new(&path);
        let req = agent_store.add_pending("telegram", "999", "mallory").unwrap();
        assert!(!agent_store.is_authorized("telegram", "999"));

        // A second store (the CLI process) approves out-of-band.
        std::thread::sleep(std::time::Duration::from_millis(20));
        let cli_store = PairingStore::new(&path);
        cli_store.approve(&req.code).unwrap().expect("code known");

        // The agent store notices the newer file without being told.
        assert!(agent_store.is_authorized("telegram", "999"));
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairing.yml");
        std::fs::write(&path, ":: not yaml ::[").unwrap();
        let store = PairingStore::new(&path);
        assert!(store.pending().is_empty());
        assert!(store.authorized().is_empty());
    }
}
