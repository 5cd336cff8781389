//! User authorization via pairing codes.
//!
//! Unknown users get an out-of-band message with an 8-character code; the
//! operator approves with `cobot pairing approve <CODE>`. The store is a
//! YAML file and the single source of truth — the running agent picks up
//! CLI approvals through an mtime check, without restart.

pub mod plugin;
pub mod storage;

pub use plugin::PairingPlugin;
pub use storage::{generate_code, AuthorizedUser, PairingStore, PendingPairing};
