//! In-memory storage implementation for development and testing
//!
//! This provides a complete storage implementation that keeps all data
//! in memory. Write transactions are serialized through one lock and carry an
//! undo log, so a transaction dropped before `commit` leaves nothing behind.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

use super::traits::*;
use crate::auth::normalize_email;
use crate::error::{RelayError, Result};

/// Unordered key for a pair of emails
fn pair_key(a: &str, b: &str) -> (String, String) {
    let (a, b) = (normalize_email(a), normalize_email(b));
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, StoredUser>, // email -> user
    rooms: HashMap<Uuid, StoredRoom>,
    messages: HashMap<Uuid, StoredMessage>,
    room_messages: HashMap<Uuid, Vec<Uuid>>, // room_id -> message ids in commit order
    friend_requests: HashMap<(String, String), FriendRequest>,
    blocks: HashMap<(String, String), bool>, // (user, friend) -> blocked
}

impl MemoryState {
    /// Newest message of a room that is not deleted
    fn newest_visible(&self, room_id: Uuid) -> Option<LastMessage> {
        self.room_messages.get(&room_id).and_then(|ids| {
            ids.iter()
                .rev()
                .filter_map(|id| self.messages.get(id))
                .find(|message| !message.is_deleted())
                .map(LastMessage::from)
        })
    }
}

/// In-memory storage backend; clones share the same data
#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStorage for MemoryStorage {
    async fn create_user(&self, user: StoredUser) -> Result<()> {
        let mut state = self.state.write().await;
        let email = normalize_email(&user.email);
        if state.users.contains_key(&email) {
            return Err(RelayError::Storage(format!(
                "User with email {} already exists",
                email
            )));
        }
        state.users.insert(email, user);
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<StoredUser>> {
        let state = self.state.read().await;
        Ok(state.users.get(&normalize_email(email)).cloned())
    }
}

#[async_trait]
impl RoomStorage for MemoryStorage {
    async fn create_room(&self, room_type: RoomType, created_by: &str) -> Result<StoredRoom> {
        let now = Utc::now();
        let room = StoredRoom {
            id: Uuid::new_v4(),
            room_type,
            created_by: created_by.to_string(),
            message_count: 0,
            last_message: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.write().await;
        state.rooms.insert(room.id, room.clone());
        state.room_messages.insert(room.id, Vec::new());
        Ok(room)
    }

    async fn get_room(&self, room_id: Uuid) -> Result<Option<StoredRoom>> {
        Ok(self.state.read().await.rooms.get(&room_id).cloned())
    }
}

#[async_trait]
impl MessageStorage for MemoryStorage {
    async fn get_message(&self, message_id: Uuid) -> Result<Option<StoredMessage>> {
        Ok(self.state.read().await.messages.get(&message_id).cloned())
    }

    async fn get_room_messages(
        &self,
        room_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>> {
        let state = self.state.read().await;
        if !state.rooms.contains_key(&room_id) {
            return Err(RelayError::RoomNotFound);
        }

        Ok(state
            .room_messages
            .get(&room_id)
            .into_iter()
            .flatten()
            .skip(offset)
            .take(limit)
            .filter_map(|id| state.messages.get(id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FriendshipStorage for MemoryStorage {
    async fn is_blocked(&self, a_email: &str, b_email: &str) -> Result<bool> {
        let (a, b) = (normalize_email(a_email), normalize_email(b_email));
        let state = self.state.read().await;

        let a_blocks_b = state.blocks.get(&(a.clone(), b.clone())).copied().unwrap_or(false);
        let b_blocks_a = state.blocks.get(&(b, a)).copied().unwrap_or(false);
        Ok(a_blocks_b || b_blocks_a)
    }

    async fn set_blocked(&self, user_email: &str, friend_email: &str, blocked: bool) -> Result<()> {
        let key = (normalize_email(user_email), normalize_email(friend_email));
        self.state.write().await.blocks.insert(key, blocked);
        Ok(())
    }

    async fn get_friend_requests(&self, email: &str) -> Result<Vec<FriendRequest>> {
        let email = normalize_email(email);
        let state = self.state.read().await;

        let mut requests: Vec<FriendRequest> = state
            .friend_requests
            .values()
            .filter(|r| r.sender_email == email || r.receiver_email == email)
            .cloned()
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(requests)
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    fn user_storage(&self) -> &dyn UserStorage {
        self
    }

    fn room_storage(&self) -> &dyn RoomStorage {
        self
    }

    fn message_storage(&self) -> &dyn MessageStorage {
        self
    }

    fn friendship_storage(&self) -> &dyn FriendshipStorage {
        self
    }

    async fn begin(&self) -> Result<Box<dyn StorageTransaction>> {
        let guard = self.state.clone().write_owned().await;
        Ok(Box::new(MemoryTransaction {
            state: guard,
            undo: Vec::new(),
            committed: false,
        }))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Inverse of one applied write
enum Undo {
    MessageInserted { id: Uuid, room_id: Uuid },
    MessageRestored(StoredMessage),
    RoomRestored(StoredRoom),
    RequestInserted((String, String)),
}

/// Exclusive write transaction over the in-memory state
pub struct MemoryTransaction {
    state: OwnedRwLockWriteGuard<MemoryState>,
    undo: Vec<Undo>,
    committed: bool,
}

impl MemoryTransaction {
    fn rollback(&mut self) {
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::MessageInserted { id, room_id } => {
                    self.state.messages.remove(&id);
                    if let Some(ids) = self.state.room_messages.get_mut(&room_id) {
                        ids.retain(|existing| *existing != id);
                    }
                }
                Undo::MessageRestored(message) => {
                    self.state.messages.insert(message.id, message);
                }
                Undo::RoomRestored(room) => {
                    self.state.rooms.insert(room.id, room);
                }
                Undo::RequestInserted(key) => {
                    self.state.friend_requests.remove(&key);
                }
            }
        }
    }

    fn live_message(&self, message_id: Uuid) -> Result<StoredMessage> {
        let message = self
            .state
            .messages
            .get(&message_id)
            .ok_or_else(|| RelayError::NotFound(format!("Message {} not found", message_id)))?;
        if message.is_deleted() {
            return Err(RelayError::Invalid(format!(
                "Message {} is deleted",
                message_id
            )));
        }
        Ok(message.clone())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.committed && !self.undo.is_empty() {
            log::debug!("Rolling back {} uncommitted storage writes", self.undo.len());
            self.rollback();
        }
    }
}

#[async_trait]
impl StorageTransaction for MemoryTransaction {
    async fn insert_message(&mut self, message: NewMessage) -> Result<StoredMessage> {
        if !self.state.rooms.contains_key(&message.room_id) {
            return Err(RelayError::RoomNotFound);
        }

        let now = Utc::now();
        let stored = StoredMessage {
            id: Uuid::new_v4(),
            room_id: message.room_id,
            sender_id: message.sender_id,
            body: message.body,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        self.state.messages.insert(stored.id, stored.clone());
        self.state
            .room_messages
            .entry(stored.room_id)
            .or_default()
            .push(stored.id);
        self.undo.push(Undo::MessageInserted {
            id: stored.id,
            room_id: stored.room_id,
        });

        Ok(stored)
    }

    async fn update_room_aggregate(
        &mut self,
        room_id: Uuid,
        delta: AggregateDelta,
    ) -> Result<StoredRoom> {
        // Computed before borrowing the room mutably
        let replacement = match &delta {
            AggregateDelta::MessageDeleted { .. } => self.state.newest_visible(room_id),
            _ => None,
        };

        let room = self
            .state
            .rooms
            .get_mut(&room_id)
            .ok_or(RelayError::RoomNotFound)?;
        let before = room.clone();

        match delta {
            AggregateDelta::MessageAdded(last) => {
                room.message_count += 1;
                room.last_message = Some(last);
            }
            AggregateDelta::MessageEdited { message_id, body } => {
                if let Some(last) = room.last_message.as_mut() {
                    if last.message_id == message_id {
                        last.body = body;
                    }
                }
            }
            AggregateDelta::MessageDeleted { message_id } => {
                let is_last = room
                    .last_message
                    .as_ref()
                    .map_or(false, |last| last.message_id == message_id);
                if is_last {
                    room.last_message = replacement;
                }
            }
        }
        room.version += 1;
        room.updated_at = Utc::now();

        let updated = room.clone();
        self.undo.push(Undo::RoomRestored(before));
        Ok(updated)
    }

    async fn update_message_body(&mut self, message_id: Uuid, body: String) -> Result<StoredMessage> {
        let before = self.live_message(message_id)?;

        let mut updated = before.clone();
        updated.body = body;
        updated.updated_at = Utc::now();

        self.state.messages.insert(message_id, updated.clone());
        self.undo.push(Undo::MessageRestored(before));
        Ok(updated)
    }

    async fn soft_delete_message(&mut self, message_id: Uuid) -> Result<StoredMessage> {
        let before = self.live_message(message_id)?;

        let now = Utc::now();
        let mut deleted = before.clone();
        deleted.deleted_at = Some(now);
        deleted.updated_at = now;

        self.state.messages.insert(message_id, deleted.clone());
        self.undo.push(Undo::MessageRestored(before));
        Ok(deleted)
    }

    async fn insert_friend_request(
        &mut self,
        request: NewFriendRequest,
    ) -> std::result::Result<FriendRequest, InsertError> {
        let key = pair_key(&request.sender_email, &request.receiver_email);
        if self.state.friend_requests.contains_key(&key) {
            return Err(InsertError::Duplicate);
        }

        let stored = FriendRequest {
            id: Uuid::new_v4(),
            sender_id: request.sender_id,
            sender_email: normalize_email(&request.sender_email),
            receiver_email: normalize_email(&request.receiver_email),
            status: FriendRequestStatus::Pending,
            created_at: Utc::now(),
        };

        self.state.friend_requests.insert(key.clone(), stored.clone());
        self.undo.push(Undo::RequestInserted(key));
        Ok(stored)
    }

    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<StoredUser>> {
        Ok(self.state.users.get(&normalize_email(email)).cloned())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut tx = self;
        tx.committed = true;
        tx.undo.clear();
        Ok(())
    }
}
