//! SwiftChat relay - real-time event routing for a messaging backend
//!
//! Authenticated clients connect over WebSocket, join rooms, exchange
//! messages and friend requests. The relay persists each change through a
//! pluggable storage interface and fans it out to room members and to the
//! counterpart's notification channel.

pub mod auth;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod mail;
pub mod storage;

// Re-export main components
pub use config::*;
pub use constants::*;
pub use error::{RelayError, Result};
