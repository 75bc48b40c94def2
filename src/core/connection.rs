//! Cheap, cloneable handles that queue outbound frames for the task owning a socket

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::events::ServerEvent;
use crate::error::{RelayError, Result};

/// Transport-level identifier of one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Sending side of a connection's outbound frame queue
pub type FrameSender = mpsc::UnboundedSender<String>;

/// Outbound half of one websocket
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub sender: FrameSender,
    pub connected_at: Instant,
}

impl Connection {
    pub fn new(sender: FrameSender) -> Self {
        Self {
            id: ConnectionId::new(),
            sender,
            connected_at: Instant::now(),
        }
    }

    /// Queue a raw text frame
    pub fn send_text(&self, text: String) -> Result<()> {
        self.sender
            .send(text)
            .map_err(|_| RelayError::ConnectionClosed)
    }

    /// Serialize and queue an event. Returns false if the connection is gone.
    pub fn send_event(&self, event: &ServerEvent) -> bool {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to serialize {} event: {}", event.name(), e);
                return false;
            }
        };

        match self.send_text(frame) {
            Ok(()) => true,
            Err(_) => {
                warn!("Failed to queue {} event for connection {}", event.name(), self.id);
                false
            }
        }
    }

    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
