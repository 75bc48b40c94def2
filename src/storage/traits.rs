//! Abstract storage interfaces for pluggable backends
//!
//! The relay consumes persistence through these narrow traits: user lookup,
//! rooms and their aggregates, message history, friendship/block state, and
//! a transaction type for writes that must land together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{RelayError, Result};

/// Registered user profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredUser {
    pub id: String,
    pub email: String,
    pub username: String,
    pub photo: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredUser {
    pub fn new(id: impl Into<String>, email: &str, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: crate::auth::normalize_email(email),
            username: username.into(),
            photo: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    Private,
    Group,
}

/// Snapshot of the newest visible message in a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub message_id: Uuid,
    pub body: String,
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<&StoredMessage> for LastMessage {
    fn from(message: &StoredMessage) -> Self {
        Self {
            message_id: message.id,
            body: message.body.clone(),
            sender_id: message.sender_id.clone(),
            created_at: message.created_at,
        }
    }
}

/// Room data for persistence.
///
/// `message_count` and `last_message` are projections of the message
/// history and only change inside the transaction that changes the history.
/// `version` goes up by one with every aggregate change (post, edit or
/// delete), so it numbers the room's committed mutations without gaps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRoom {
    pub id: Uuid,
    pub room_type: RoomType,
    pub created_by: String,
    pub message_count: u64,
    pub last_message: Option<LastMessage>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message as submitted, before persistence assigns id and timestamps
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: Uuid,
    pub sender_id: String,
    pub body: String,
}

/// Persisted chat message; deletion is soft and keeps the body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StoredMessage {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendRequestStatus {
    Pending,
}

#[derive(Debug, Clone)]
pub struct NewFriendRequest {
    pub sender_id: String,
    pub sender_email: String,
    pub receiver_email: String,
}

/// Persisted friend request. The unordered (sender, receiver) email pair is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: Uuid,
    pub sender_id: String,
    pub sender_email: String,
    pub receiver_email: String,
    pub status: FriendRequestStatus,
    pub created_at: DateTime<Utc>,
}

/// Change applied to a room's aggregate fields
#[derive(Debug, Clone)]
pub enum AggregateDelta {
    /// A message was committed: count + 1, snapshot replaced
    MessageAdded(LastMessage),
    /// A message body changed: snapshot refreshed if it is the last message
    MessageEdited { message_id: Uuid, body: String },
    /// A message was soft-deleted: snapshot moves to the newest visible message
    MessageDeleted { message_id: Uuid },
}

/// Outcome of an insert guarded by a uniqueness constraint
#[derive(Debug)]
pub enum InsertError {
    /// The unique key already exists
    Duplicate,
    /// Any other persistence failure
    Storage(RelayError),
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate => write!(f, "Unique constraint violated"),
            Self::Storage(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for InsertError {}

impl From<RelayError> for InsertError {
    fn from(err: RelayError) -> Self {
        InsertError::Storage(err)
    }
}

/// User lookup interface
#[async_trait]
pub trait UserStorage: Send + Sync {
    /// Create a new user
    async fn create_user(&self, user: StoredUser) -> Result<()>;

    /// Get user by email
    async fn find_user_by_email(&self, email: &str) -> Result<Option<StoredUser>>;
}

/// Room data storage interface
#[async_trait]
pub trait RoomStorage: Send + Sync {
    /// Create a new room
    async fn create_room(&self, room_type: RoomType, created_by: &str) -> Result<StoredRoom>;

    /// Get room by ID
    async fn get_room(&self, room_id: Uuid) -> Result<Option<StoredRoom>>;
}

/// Message history interface
#[async_trait]
pub trait MessageStorage: Send + Sync {
    /// Get a message by ID, deleted or not
    async fn get_message(&self, message_id: Uuid) -> Result<Option<StoredMessage>>;

    /// Get messages from a room, oldest first, with pagination
    async fn get_room_messages(
        &self,
        room_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>>;
}

/// Friendship and block state interface
#[async_trait]
pub trait FriendshipStorage: Send + Sync {
    /// True when either party has blocked the other
    async fn is_blocked(&self, a_email: &str, b_email: &str) -> Result<bool>;

    /// Set the block flag `user_email` holds against `friend_email`
    async fn set_blocked(&self, user_email: &str, friend_email: &str, blocked: bool) -> Result<()>;

    /// Friend requests sent or received by an email
    async fn get_friend_requests(&self, email: &str) -> Result<Vec<FriendRequest>>;
}

/// A unit of writes that commits together.
///
/// Dropping a transaction without calling `commit` rolls it back.
#[async_trait]
pub trait StorageTransaction: Send {
    /// Insert a message into an existing room
    async fn insert_message(&mut self, message: NewMessage) -> Result<StoredMessage>;

    /// Apply a change to a room's aggregate fields, bump its version and
    /// return the updated room
    async fn update_room_aggregate(&mut self, room_id: Uuid, delta: AggregateDelta)
        -> Result<StoredRoom>;

    /// Replace the body of a live message
    async fn update_message_body(&mut self, message_id: Uuid, body: String)
        -> Result<StoredMessage>;

    /// Mark a live message as deleted, keeping its body
    async fn soft_delete_message(&mut self, message_id: Uuid) -> Result<StoredMessage>;

    /// Insert a friend request, reporting a duplicate pair explicitly
    async fn insert_friend_request(
        &mut self,
        request: NewFriendRequest,
    ) -> std::result::Result<FriendRequest, InsertError>;

    /// Get user by email inside the transaction
    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<StoredUser>>;

    /// Make every write of this transaction visible
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Combined storage provider interface
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get user storage backend
    fn user_storage(&self) -> &dyn UserStorage;

    /// Get room storage backend
    fn room_storage(&self) -> &dyn RoomStorage;

    /// Get message storage backend
    fn message_storage(&self) -> &dyn MessageStorage;

    /// Get friendship storage backend
    fn friendship_storage(&self) -> &dyn FriendshipStorage;

    /// Open a write transaction
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>>;

    /// Health check for the storage backend
    async fn health_check(&self) -> Result<bool>;
}
