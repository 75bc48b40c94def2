//! Event types for the websocket protocol
//!
//! Inbound frames look like `{"event": "send-message", "data": {...}, "ack": 7}`
//! and are decoded at the router boundary into [`ClientEvent`]. Anything that
//! does not fit one of the known shapes becomes [`ClientEvent::Malformed`].
//! Outbound frames look like `{"event": "new_message", "data": {...}}`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::connection::ConnectionId;
use crate::storage::{FriendRequest, FriendRequestStatus, StoredMessage, StoredUser};

/// Client-chosen id echoed back in the matching `ack` frame
pub type AckId = u64;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JoinRoom {
    pub room_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SendMessage {
    pub room_id: Uuid,
    pub message: String,
    pub other_user_email: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SendFriend {
    pub receiver_email: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeleteMessage {
    pub other_user_email: String,
    pub room_id: Uuid,
    pub message_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EditMessage {
    pub other_user_email: String,
    pub room_id: Uuid,
    pub message_id: Uuid,
    pub edited_message: String,
}

/// Client-to-server events
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinRoom { payload: JoinRoom, ack: Option<AckId> },
    SendMessage { payload: SendMessage, ack: AckId },
    SendFriend { payload: SendFriend, ack: AckId },
    DeleteMessage(DeleteMessage),
    EditMessage(EditMessage),
    /// Unknown event name, wrong payload shape, or a missing ack id
    Malformed { reason: String },
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    ack: Option<AckId>,
}

fn payload<T: DeserializeOwned>(event: &str, data: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(data).map_err(|e| format!("invalid {} payload: {}", event, e))
}

fn required_ack(event: &str, ack: Option<AckId>) -> Result<AckId, String> {
    ack.ok_or_else(|| format!("{} requires an ack id", event))
}

impl ClientEvent {
    /// Decode one inbound text frame
    pub fn decode(text: &str) -> Self {
        let frame: RawFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                return ClientEvent::Malformed {
                    reason: format!("invalid frame: {}", e),
                }
            }
        };

        let event = frame.event.as_str();
        let decoded = match event {
            "join-room" => payload(event, frame.data).map(|payload| ClientEvent::JoinRoom {
                payload,
                ack: frame.ack,
            }),
            "send-message" => required_ack(event, frame.ack).and_then(|ack| {
                payload(event, frame.data).map(|payload| ClientEvent::SendMessage { payload, ack })
            }),
            "send-friend" => required_ack(event, frame.ack).and_then(|ack| {
                payload(event, frame.data).map(|payload| ClientEvent::SendFriend { payload, ack })
            }),
            "delete-message" => payload(event, frame.data).map(ClientEvent::DeleteMessage),
            "edit-message" => payload(event, frame.data).map(ClientEvent::EditMessage),
            other => Err(format!("unknown event '{}'", other)),
        };

        decoded.unwrap_or_else(|reason| ClientEvent::Malformed { reason })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => "join-room",
            ClientEvent::SendMessage { .. } => "send-message",
            ClientEvent::SendFriend { .. } => "send-friend",
            ClientEvent::DeleteMessage(_) => "delete-message",
            ClientEvent::EditMessage(_) => "edit-message",
            ClientEvent::Malformed { .. } => "malformed",
        }
    }
}

/// Status carried by an `ack` frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Success,
    Error,
    Duplicate,
    EmailSent,
    FriendSent,
}

/// Compact alert for a new message, sent on the receiver's notification channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNotice {
    pub room_id: Uuid,
    pub message: String,
    pub sender_id: String,
    pub updated_at: DateTime<Utc>,
}

impl From<&StoredMessage> for MessageNotice {
    fn from(message: &StoredMessage) -> Self {
        Self {
            room_id: message.room_id,
            message: message.body.clone(),
            sender_id: message.sender_id.clone(),
            updated_at: message.updated_at,
        }
    }
}

/// A friend request joined with its sender's profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendRequestNotice {
    pub request_id: Uuid,
    pub sender_id: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub sender_photo: Option<String>,
    pub receiver_email: String,
    pub status: FriendRequestStatus,
    pub created_at: DateTime<Utc>,
}

impl FriendRequestNotice {
    pub fn new(request: &FriendRequest, sender: Option<&StoredUser>) -> Self {
        Self {
            request_id: request.id,
            sender_id: request.sender_id.clone(),
            sender_email: request.sender_email.clone(),
            sender_name: sender.map(|user| user.username.clone()),
            sender_photo: sender.and_then(|user| user.photo.clone()),
            receiver_email: request.receiver_email.clone(),
            status: request.status,
            created_at: request.created_at,
        }
    }
}

/// Payload of the identity-addressed `notification` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum Notification {
    NewMessage(MessageNotice),
    FriendRequest(FriendRequestNotice),
    DeleteMessage { room_id: Uuid, message_id: Uuid },
    EditMessage { message_id: Uuid, edited_message: String },
}

/// Server-to-client events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection established and authenticated
    Connected {
        connection_id: ConnectionId,
        user_id: String,
    },

    /// New message in a joined room
    NewMessage(StoredMessage),

    /// Message removed from a joined room
    DeleteMessage { message_id: Uuid },

    /// Message body changed in a joined room
    EditMessage {
        message_id: Uuid,
        edited_message: String,
    },

    /// Alert on the identity's own channel
    Notification(Notification),

    /// Completion of an event that carried an ack id
    Ack { ack: AckId, status: AckStatus },
}

impl ServerEvent {
    /// Encode as one outbound text frame
    pub fn to_frame(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::NewMessage(_) => "new_message",
            ServerEvent::DeleteMessage { .. } => "delete_message",
            ServerEvent::EditMessage { .. } => "edit_message",
            ServerEvent::Notification(_) => "notification",
            ServerEvent::Ack { .. } => "ack",
        }
    }
}
