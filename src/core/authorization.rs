//! Permission checks consulted before delivery and mutation

use log::{error, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::storage::{FriendshipStorage, StoredMessage};

/// Block and authorship checks.
///
/// Block lookups fail closed: when the friendship backend cannot answer,
/// delivery is denied.
#[derive(Clone)]
pub struct AuthorizationGate {
    friendships: Arc<dyn FriendshipStorage>,
}

impl AuthorizationGate {
    pub fn new(friendships: Arc<dyn FriendshipStorage>) -> Self {
        Self { friendships }
    }

    /// True when either party has blocked the other
    pub async fn is_blocked(&self, a_email: &str, b_email: &str) -> Result<bool> {
        self.friendships.is_blocked(a_email, b_email).await
    }

    /// Whether a message from `sender_email` may reach `receiver_email`
    pub async fn may_deliver(&self, sender_email: &str, receiver_email: &str) -> bool {
        match self.is_blocked(sender_email, receiver_email).await {
            Ok(blocked) => !blocked,
            Err(e) => {
                error!(
                    "Block lookup between {} and {} failed, denying delivery: {}",
                    sender_email, receiver_email, e
                );
                false
            }
        }
    }

    /// Only the original sender may edit or delete a message, and only
    /// through the room the message belongs to
    pub fn ensure_author(
        &self,
        message: &StoredMessage,
        requester_id: &str,
        room_id: Uuid,
    ) -> Result<()> {
        if message.room_id != room_id {
            warn!(
                "Message {} addressed through room {} but belongs to {}",
                message.id, room_id, message.room_id
            );
            return Err(RelayError::RoomMismatch(format!(
                "message {} is not part of room {}",
                message.id, room_id
            )));
        }

        if message.sender_id != requester_id {
            return Err(RelayError::NotAuthor);
        }

        Ok(())
    }
}
