//! Event routing and delivery core

pub mod authorization;
pub mod connection;
pub mod events;
pub mod friend_coordinator;
pub mod gateway;
pub mod message_coordinator;
pub mod registry;
pub mod router;
pub mod sequencer;
pub mod server;

// Re-export main components for convenience
pub use authorization::AuthorizationGate;
pub use connection::{Connection, ConnectionId, FrameSender};
pub use events::{AckStatus, ClientEvent, Notification, ServerEvent};
pub use friend_coordinator::{FriendRequestCoordinator, FriendRequestOutcome};
pub use gateway::{Gateway, SocketGateway};
pub use message_coordinator::{MessageCoordinator, MessageDraft, SendOutcome};
pub use registry::ConnectionRegistry;
pub use router::{AckResponder, ConnectionSession, EventRouter};
pub use server::RelayServer;
