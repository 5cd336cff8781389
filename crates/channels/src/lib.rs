//! Channel adapters and the session layer.
//!
//! The session plugin is the `communication` capability: it aggregates
//! every registered channel adapter behind one poll/send/typing surface.
//! Adapters implement the `session.*` extension points and own their
//! update cursors.

pub mod filedrop;
pub mod session;
pub mod telegram;

pub use filedrop::FiledropPlugin;
pub use session::SessionPlugin;
pub use telegram::TelegramPlugin;
