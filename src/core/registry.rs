//! Identity to live connection map.
//!
//! Holds a non-owning association: the gateway owns connections, the
//! registry only remembers which one is current for each user. A reconnect
//! simply overwrites the entry.

use dashmap::DashMap;

use crate::core::connection::ConnectionId;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a user with a connection, replacing any previous one
    pub fn register(&self, user_id: &str, connection_id: ConnectionId) {
        if let Some(previous) = self.connections.insert(user_id.to_string(), connection_id) {
            log::debug!(
                "User {} moved from connection {} to {}",
                user_id,
                previous,
                connection_id
            );
        }
    }

    /// Forget a user's connection, whichever it is
    pub fn unregister(&self, user_id: &str) {
        self.connections.remove(user_id);
    }

    /// Forget a user's connection only if it is still `connection_id`.
    /// Returns whether an entry was removed.
    pub fn unregister_connection(&self, user_id: &str, connection_id: &ConnectionId) -> bool {
        self.connections
            .remove_if(user_id, |_, current| current == connection_id)
            .is_some()
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionId> {
        self.connections.get(user_id).map(|entry| *entry.value())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_absent_identity() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.lookup("nobody"), None);
        assert!(!registry.is_online("nobody"));
    }

    #[test]
    fn test_last_writer_wins() {
        let registry = ConnectionRegistry::new();
        let first = ConnectionId::new();
        let second = ConnectionId::new();

        registry.register("u1", first);
        registry.register("u1", second);

        assert_eq!(registry.lookup("u1"), Some(second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_connection_does_not_evict_newer_one() {
        let registry = ConnectionRegistry::new();
        let old = ConnectionId::new();
        let new = ConnectionId::new();

        registry.register("u1", old);
        registry.register("u1", new);

        assert!(!registry.unregister_connection("u1", &old));
        assert_eq!(registry.lookup("u1"), Some(new));

        assert!(registry.unregister_connection("u1", &new));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_is_unconditional() {
        let registry = ConnectionRegistry::new();
        registry.register("u1", ConnectionId::new());
        registry.unregister("u1");
        registry.unregister("u1");
        assert_eq!(registry.lookup("u1"), None);
    }
}
