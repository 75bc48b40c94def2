//! Delivery gateway over live connections
//!
//! Two independent addressing schemes live here: room channels (keyed by room
//! id, joined explicitly) and notification channels (keyed by an identity's
//! email, joined on connect). Every emit is fire-and-forget: frames are queued
//! on each member connection and the call returns how many were queued.

use log::{debug, trace, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::connection::{Connection, ConnectionId};
use crate::core::events::ServerEvent;

/// Transport capability set used by the coordinators and the router
pub trait Gateway: Send + Sync {
    /// Take ownership of a freshly accepted connection
    fn accept(&self, connection: Connection);

    /// Subscribe a connection to a room channel
    fn join_room(&self, connection_id: &ConnectionId, room_id: &str) -> bool;

    /// Subscribe a connection to an identity's notification channel
    fn subscribe_identity(&self, connection_id: &ConnectionId, channel_key: &str) -> bool;

    /// Deliver to every connection that joined the room
    fn emit(&self, room_id: &str, event: &ServerEvent) -> usize;

    /// Deliver to every connection subscribed to the identity channel
    fn emit_to_identity(&self, channel_key: &str, event: &ServerEvent) -> usize;

    /// Deliver to one connection
    fn send_to(&self, connection_id: &ConnectionId, event: &ServerEvent) -> bool;

    /// Forget a connection and all of its subscriptions
    fn drop_connection(&self, connection_id: &ConnectionId);
}

#[derive(Clone, Copy)]
enum ChannelKind {
    Room,
    Identity,
}

#[derive(Default)]
struct Subscriptions {
    rooms: HashSet<String>,
    channels: HashSet<String>,
}

#[derive(Default)]
struct GatewayState {
    connections: HashMap<ConnectionId, Connection>,
    subscriptions: HashMap<ConnectionId, Subscriptions>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
    channels: HashMap<String, HashSet<ConnectionId>>,
}

impl GatewayState {
    fn fan_out(&self, members: Option<&HashSet<ConnectionId>>, frame: &str) -> usize {
        let Some(members) = members else {
            return 0;
        };

        members
            .iter()
            .filter_map(|id| self.connections.get(id))
            .filter(|connection| connection.send_text(frame.to_string()).is_ok())
            .count()
    }
}

fn unsubscribe(index: &mut HashMap<String, HashSet<ConnectionId>>, key: &str, id: &ConnectionId) {
    if let Some(members) = index.get_mut(key) {
        members.remove(id);
        if members.is_empty() {
            index.remove(key);
        }
    }
}

/// Gateway over websocket connection handles
#[derive(Default)]
pub struct SocketGateway {
    state: RwLock<GatewayState>,
}

impl SocketGateway {
    pub fn new() -> Self {
        Self::default()
    }

    // The maps hold no invariant a panicking writer could break halfway
    // through a single insert or remove, so a poisoned lock is recovered.
    fn read(&self) -> RwLockReadGuard<'_, GatewayState> {
        self.state.read().unwrap_or_else(|poisoned| {
            warn!("Gateway lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, GatewayState> {
        self.state.write().unwrap_or_else(|poisoned| {
            warn!("Gateway lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn subscribe(&self, connection_id: &ConnectionId, kind: ChannelKind, key: &str) -> bool {
        let mut guard = self.write();
        let state = &mut *guard;
        if !state.connections.contains_key(connection_id) {
            debug!("Subscription of unknown connection {} to {} ignored", connection_id, key);
            return false;
        }

        let subscriptions = state.subscriptions.entry(*connection_id).or_default();
        let (index, record) = match kind {
            ChannelKind::Room => (&mut state.rooms, &mut subscriptions.rooms),
            ChannelKind::Identity => (&mut state.channels, &mut subscriptions.channels),
        };
        index.entry(key.to_string()).or_default().insert(*connection_id);
        record.insert(key.to_string());
        true
    }

    fn serialize(event: &ServerEvent) -> Option<String> {
        match event.to_frame() {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("Failed to serialize {} event: {}", event.name(), e);
                None
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }

    pub fn room_size(&self, room_id: &str) -> usize {
        self.read().rooms.get(room_id).map_or(0, HashSet::len)
    }
}

impl Gateway for SocketGateway {
    fn accept(&self, connection: Connection) {
        let mut state = self.write();
        state.subscriptions.entry(connection.id).or_default();
        state.connections.insert(connection.id, connection);
    }

    fn join_room(&self, connection_id: &ConnectionId, room_id: &str) -> bool {
        self.subscribe(connection_id, ChannelKind::Room, room_id)
    }

    fn subscribe_identity(&self, connection_id: &ConnectionId, channel_key: &str) -> bool {
        self.subscribe(connection_id, ChannelKind::Identity, channel_key)
    }

    fn emit(&self, room_id: &str, event: &ServerEvent) -> usize {
        let Some(frame) = Self::serialize(event) else {
            return 0;
        };
        let state = self.read();
        let sent = state.fan_out(state.rooms.get(room_id), &frame);
        trace!("Emitted {} to {} connections in room {}", event.name(), sent, room_id);
        sent
    }

    fn emit_to_identity(&self, channel_key: &str, event: &ServerEvent) -> usize {
        let Some(frame) = Self::serialize(event) else {
            return 0;
        };
        let state = self.read();
        let sent = state.fan_out(state.channels.get(channel_key), &frame);
        if sent == 0 {
            debug!("No live connection for {} notification to {}", event.name(), channel_key);
        }
        sent
    }

    fn send_to(&self, connection_id: &ConnectionId, event: &ServerEvent) -> bool {
        self.read()
            .connections
            .get(connection_id)
            .map_or(false, |connection| connection.send_event(event))
    }

    fn drop_connection(&self, connection_id: &ConnectionId) {
        let mut guard = self.write();
        let state = &mut *guard;
        state.connections.remove(connection_id);

        if let Some(subscriptions) = state.subscriptions.remove(connection_id) {
            for room in &subscriptions.rooms {
                unsubscribe(&mut state.rooms, room, connection_id);
            }
            for channel in &subscriptions.channels {
                unsubscribe(&mut state.channels, channel, connection_id);
            }
        }
    }
}
