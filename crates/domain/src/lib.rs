//! Shared domain types for the cobot runtime.
//!
//! Everything here is plain data: the error type used across all crates,
//! the provider-agnostic chat types, the channel message envelope, and the
//! configuration model.

pub mod chat;
pub mod config;
pub mod error;
pub mod message;

pub use error::{Error, Result};
