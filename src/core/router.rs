//! Inbound event routing and connection lifecycle

use log::{debug, info, warn};
use std::sync::Arc;

use crate::auth::Identity;
use crate::core::connection::{Connection, ConnectionId, FrameSender};
use crate::core::events::{AckId, AckStatus, ClientEvent, ServerEvent};
use crate::core::friend_coordinator::FriendRequestCoordinator;
use crate::core::gateway::Gateway;
use crate::core::message_coordinator::{MessageCoordinator, MessageDraft};
use crate::core::registry::ConnectionRegistry;
use crate::error::RelayError;

/// Single-shot completion for an event that carried an ack id.
///
/// `complete` consumes the responder. A responder dropped without being
/// completed answers `error` on its way out, so the client always hears
/// back exactly once.
pub struct AckResponder {
    ack: AckId,
    connection: Option<Connection>,
}

impl AckResponder {
    pub fn new(ack: AckId, connection: Connection) -> Self {
        Self {
            ack,
            connection: Some(connection),
        }
    }

    /// Send the status; returns false if the connection is already gone
    pub fn complete(mut self, status: AckStatus) -> bool {
        self.respond(status)
    }

    fn respond(&mut self, status: AckStatus) -> bool {
        match self.connection.take() {
            Some(connection) => connection.send_event(&ServerEvent::Ack {
                ack: self.ack,
                status,
            }),
            None => false,
        }
    }
}

impl Drop for AckResponder {
    fn drop(&mut self) {
        if self.connection.is_some() {
            warn!("Ack {} abandoned before completion, answering error", self.ack);
            self.respond(AckStatus::Error);
        }
    }
}

/// An admitted connection and the identity behind it
#[derive(Debug, Clone)]
pub struct ConnectionSession {
    pub identity: Identity,
    pub connection: Connection,
}

impl ConnectionSession {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id
    }
}

pub struct EventRouter {
    registry: Arc<ConnectionRegistry>,
    gateway: Arc<dyn Gateway>,
    messages: Arc<MessageCoordinator>,
    friends: Arc<FriendRequestCoordinator>,
    max_frame_size: usize,
}

impl EventRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        gateway: Arc<dyn Gateway>,
        messages: Arc<MessageCoordinator>,
        friends: Arc<FriendRequestCoordinator>,
        max_frame_size: usize,
    ) -> Self {
        Self {
            registry,
            gateway,
            messages,
            friends,
            max_frame_size,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Admit an authenticated connection
    pub fn connect(&self, identity: Identity, sender: FrameSender) -> ConnectionSession {
        let connection = Connection::new(sender);
        self.gateway.accept(connection.clone());
        self.registry.register(&identity.user_id, connection.id);
        self.gateway
            .subscribe_identity(&connection.id, identity.channel_key());

        self.gateway.send_to(
            &connection.id,
            &ServerEvent::Connected {
                connection_id: connection.id,
                user_id: identity.user_id.clone(),
            },
        );

        info!(
            "User {} connected on {} ({} users online)",
            identity.user_id,
            connection.id,
            self.registry.len()
        );
        ConnectionSession {
            identity,
            connection,
        }
    }

    /// Process one inbound text frame to completion
    pub async fn handle_frame(&self, session: &ConnectionSession, text: &str) {
        if text.len() > self.max_frame_size {
            warn!(
                "Dropping frame from {}: {}",
                session.identity.user_id,
                RelayError::FrameTooLarge(text.len())
            );
            return;
        }

        self.dispatch(session, ClientEvent::decode(text)).await;
    }

    pub async fn dispatch(&self, session: &ConnectionSession, event: ClientEvent) {
        let identity = &session.identity;
        debug!("Dispatching {} from {}", event.name(), identity.user_id);

        match event {
            ClientEvent::JoinRoom { payload, ack } => {
                let joined = self
                    .gateway
                    .join_room(&session.connection.id, &payload.room_id.to_string());
                if joined {
                    debug!("{} joined room {}", identity.user_id, payload.room_id);
                }
                if let Some(ack) = ack {
                    let status = if joined {
                        AckStatus::Success
                    } else {
                        AckStatus::Error
                    };
                    AckResponder::new(ack, session.connection.clone()).complete(status);
                }
            }
            ClientEvent::SendMessage { payload, ack } => {
                let responder = AckResponder::new(ack, session.connection.clone());
                let draft = MessageDraft {
                    room_id: payload.room_id,
                    body: payload.message,
                };
                let outcome = self
                    .messages
                    .send_message(draft, identity, &payload.other_user_email)
                    .await;
                responder.complete(outcome.status());
            }
            ClientEvent::SendFriend { payload, ack } => {
                let responder = AckResponder::new(ack, session.connection.clone());
                let outcome = self
                    .friends
                    .send_friend_request(identity, &payload.receiver_email)
                    .await;
                responder.complete(outcome.status());
            }
            ClientEvent::DeleteMessage(payload) => {
                if let Err(e) = self
                    .messages
                    .delete_message(
                        payload.message_id,
                        payload.room_id,
                        identity,
                        &payload.other_user_email,
                    )
                    .await
                {
                    warn!(
                        "Delete of message {} by {} failed: {}",
                        payload.message_id, identity.user_id, e
                    );
                }
            }
            ClientEvent::EditMessage(payload) => {
                if let Err(e) = self
                    .messages
                    .edit_message(
                        payload.message_id,
                        payload.room_id,
                        identity,
                        &payload.other_user_email,
                        payload.edited_message,
                    )
                    .await
                {
                    warn!(
                        "Edit of message {} by {} failed: {}",
                        payload.message_id, identity.user_id, e
                    );
                }
            }
            ClientEvent::Malformed { reason } => {
                warn!("Dropping malformed event from {}: {}", identity.user_id, reason);
            }
        }
    }

    /// Forget a closed connection. Work already dispatched from it keeps running.
    pub fn disconnect(&self, session: &ConnectionSession) {
        let id = session.connection.id;
        if !self
            .registry
            .unregister_connection(&session.identity.user_id, &id)
        {
            debug!(
                "User {} already moved to a newer connection than {}",
                session.identity.user_id, id
            );
        }
        self.gateway.drop_connection(&id);
        info!(
            "User {} disconnected from {} after {:?}",
            session.identity.user_id,
            id,
            session.connection.connection_duration()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn ack_of(frame: &str) -> ServerEvent {
        serde_json::from_str(frame).unwrap()
    }

    #[test]
    fn test_responder_answers_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let responder = AckResponder::new(4, Connection::new(tx));

        assert!(responder.complete(AckStatus::FriendSent));
        assert_eq!(
            ack_of(&rx.try_recv().unwrap()),
            ServerEvent::Ack {
                ack: 4,
                status: AckStatus::FriendSent
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_abandoned_responder_answers_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(AckResponder::new(9, Connection::new(tx)));

        assert_eq!(
            ack_of(&rx.try_recv().unwrap()),
            ServerEvent::Ack {
                ack: 9,
                status: AckStatus::Error
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
