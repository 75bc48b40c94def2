//! Chat message workflow: validate, authorize, persist, fan out
//!
//! Every write lands in one storage transaction together with the room
//! aggregate change, and nothing is emitted before that transaction commits.

use log::{debug, error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{normalize_email, Identity};
use crate::core::authorization::AuthorizationGate;
use crate::core::events::{AckStatus, MessageNotice, Notification, ServerEvent};
use crate::core::gateway::Gateway;
use crate::core::sequencer::RoomSequencer;
use crate::error::{RelayError, Result};
use crate::storage::{AggregateDelta, LastMessage, NewMessage, StorageProvider, StoredMessage};

/// A message as the client submitted it
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub room_id: Uuid,
    pub body: String,
}

/// Result of a send-message request
#[derive(Debug)]
pub enum SendOutcome {
    /// Committed and handed to the gateway
    Delivered(StoredMessage),
    /// The two parties have a block between them, or the block state is unknown
    Rejected,
    /// Validation or persistence failed; nothing was written
    Failed(RelayError),
}

impl SendOutcome {
    /// Status reported to the sender; a rejection is indistinguishable from
    /// any other failure
    pub fn status(&self) -> AckStatus {
        match self {
            SendOutcome::Delivered(_) => AckStatus::Success,
            SendOutcome::Rejected | SendOutcome::Failed(_) => AckStatus::Error,
        }
    }
}

/// A committed room mutation waiting for its turn on the room channel
enum RoomDelivery {
    /// New message, followed by the receiver's notification
    Posted {
        message: StoredMessage,
        receiver_channel: String,
    },
    /// Edit or delete event for the room's members
    Changed(ServerEvent),
}

pub struct MessageCoordinator {
    storage: Arc<dyn StorageProvider>,
    gateway: Arc<dyn Gateway>,
    gate: AuthorizationGate,
    sequencer: RoomSequencer<RoomDelivery>,
    max_message_length: usize,
}

impl MessageCoordinator {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        gateway: Arc<dyn Gateway>,
        gate: AuthorizationGate,
        max_message_length: usize,
        reorder_window: usize,
    ) -> Self {
        Self {
            storage,
            gateway,
            gate,
            sequencer: RoomSequencer::new(reorder_window),
            max_message_length,
        }
    }

    fn validate_body(&self, body: &str) -> Result<()> {
        if body.trim().is_empty() {
            return Err(RelayError::Invalid(
                "Message body cannot be empty".to_string(),
            ));
        }

        let length = body.chars().count();
        if length > self.max_message_length {
            return Err(RelayError::Invalid(format!(
                "Message body is {} characters, limit is {}",
                length, self.max_message_length
            )));
        }

        Ok(())
    }

    pub async fn send_message(
        &self,
        draft: MessageDraft,
        sender: &Identity,
        receiver_email: &str,
    ) -> SendOutcome {
        if let Err(e) = self.validate_body(&draft.body) {
            warn!("Rejected message from {} to room {}: {}", sender.user_id, draft.room_id, e);
            return SendOutcome::Failed(e);
        }

        let receiver_channel = normalize_email(receiver_email);
        if !self.gate.may_deliver(&sender.email, &receiver_channel).await {
            info!(
                "Message from {} to {} in room {} not delivered: blocked",
                sender.email, receiver_channel, draft.room_id
            );
            return SendOutcome::Rejected;
        }

        let (message, version) = match self.persist_new(draft, sender).await {
            Ok(committed) => committed,
            Err(e) => {
                error!("Failed to store message from {}: {}", sender.user_id, e);
                return SendOutcome::Failed(e);
            }
        };

        self.release(
            message.room_id,
            version,
            RoomDelivery::Posted {
                message: message.clone(),
                receiver_channel,
            },
        );

        SendOutcome::Delivered(message)
    }

    /// Hand a committed mutation to the room channel in version order
    fn release(&self, room_id: Uuid, version: u64, delivery: RoomDelivery) {
        let gateway = &self.gateway;
        let room_key = room_id.to_string();
        self.sequencer.deliver(room_id, version, delivery, |delivery| match delivery {
            RoomDelivery::Posted {
                message,
                receiver_channel,
            } => {
                let notice = MessageNotice::from(&message);
                gateway.emit(&room_key, &ServerEvent::NewMessage(message));
                gateway.emit_to_identity(
                    &receiver_channel,
                    &ServerEvent::Notification(Notification::NewMessage(notice)),
                );
            }
            RoomDelivery::Changed(event) => {
                gateway.emit(&room_key, &event);
            }
        });
    }

    /// Insert the message and bump the room aggregate in one transaction.
    /// Returns the message with the room version it committed as.
    async fn persist_new(&self, draft: MessageDraft, sender: &Identity) -> Result<(StoredMessage, u64)> {
        let mut tx = self.storage.begin().await?;

        let message = tx
            .insert_message(NewMessage {
                room_id: draft.room_id,
                sender_id: sender.user_id.clone(),
                body: draft.body,
            })
            .await?;
        let room = tx
            .update_room_aggregate(
                message.room_id,
                AggregateDelta::MessageAdded(LastMessage::from(&message)),
            )
            .await?;
        // A rolled back write frees its number for the next commit
        self.sequencer.anchor(room.id, room.version);
        tx.commit().await?;

        debug!(
            "Stored message {} as #{} in room {} (version {})",
            message.id, room.message_count, room.id, room.version
        );
        Ok((message, room.version))
    }

    /// Look up a message the requester is allowed to change.
    ///
    /// Author and room never change after insert, so checking them before
    /// the write transaction cannot race with another writer.
    async fn authored_message(
        &self,
        message_id: Uuid,
        room_id: Uuid,
        requester: &Identity,
    ) -> Result<StoredMessage> {
        let message = self
            .storage
            .message_storage()
            .get_message(message_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("Message {} not found", message_id)))?;
        self.gate.ensure_author(&message, &requester.user_id, room_id)?;
        Ok(message)
    }

    /// Soft-delete a message. The body is kept; the room's last message
    /// snapshot moves back to the newest message still visible.
    pub async fn delete_message(
        &self,
        message_id: Uuid,
        room_id: Uuid,
        requester: &Identity,
        counterpart_email: &str,
    ) -> Result<StoredMessage> {
        self.authored_message(message_id, room_id, requester).await?;

        let mut tx = self.storage.begin().await?;
        let deleted = tx.soft_delete_message(message_id).await?;
        let room = tx
            .update_room_aggregate(room_id, AggregateDelta::MessageDeleted { message_id })
            .await?;
        self.sequencer.anchor(room.id, room.version);
        tx.commit().await?;

        self.release(
            room.id,
            room.version,
            RoomDelivery::Changed(ServerEvent::DeleteMessage { message_id }),
        );
        self.notify_counterpart(
            requester,
            counterpart_email,
            Notification::DeleteMessage { room_id, message_id },
        )
        .await;

        Ok(deleted)
    }

    pub async fn edit_message(
        &self,
        message_id: Uuid,
        room_id: Uuid,
        requester: &Identity,
        counterpart_email: &str,
        new_body: String,
    ) -> Result<StoredMessage> {
        self.validate_body(&new_body)?;
        let current = self.authored_message(message_id, room_id, requester).await?;
        if current.is_deleted() {
            return Err(RelayError::Invalid(format!(
                "Message {} is deleted",
                message_id
            )));
        }

        let mut tx = self.storage.begin().await?;
        let edited = tx.update_message_body(message_id, new_body).await?;
        let room = tx
            .update_room_aggregate(
                room_id,
                AggregateDelta::MessageEdited {
                    message_id,
                    body: edited.body.clone(),
                },
            )
            .await?;
        self.sequencer.anchor(room.id, room.version);
        tx.commit().await?;

        self.release(
            room.id,
            room.version,
            RoomDelivery::Changed(ServerEvent::EditMessage {
                message_id,
                edited_message: edited.body.clone(),
            }),
        );
        self.notify_counterpart(
            requester,
            counterpart_email,
            Notification::EditMessage {
                message_id,
                edited_message: edited.body.clone(),
            },
        )
        .await;

        Ok(edited)
    }

    async fn notify_counterpart(&self, requester: &Identity, counterpart_email: &str, notification: Notification) {
        let channel = normalize_email(counterpart_email);
        if !self.gate.may_deliver(&requester.email, &channel).await {
            debug!("Skipping notification from {} to {}", requester.email, channel);
            return;
        }
        self.gateway
            .emit_to_identity(&channel, &ServerEvent::Notification(notification));
    }
}
