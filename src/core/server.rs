//! Relay service that wires the registry, gateway and coordinators together

use log::{info, warn};
use std::sync::Arc;

use crate::auth::TokenManager;
use crate::config::ServerConfig;
use crate::core::authorization::AuthorizationGate;
use crate::core::friend_coordinator::FriendRequestCoordinator;
use crate::core::gateway::{Gateway, SocketGateway};
use crate::core::message_coordinator::MessageCoordinator;
use crate::core::registry::ConnectionRegistry;
use crate::core::router::EventRouter;
use crate::mail::MailSender;
use crate::storage::{FriendshipStorage, StorageProvider};

/// Everything a websocket route needs to admit and serve connections
pub struct RelayServer {
    config: ServerConfig,
    token_manager: Arc<TokenManager>,
    gateway: Arc<SocketGateway>,
    router: Arc<EventRouter>,
    storage: Arc<dyn StorageProvider>,
}

impl RelayServer {
    pub fn new<S>(config: ServerConfig, storage: Arc<S>, mailer: Arc<dyn MailSender>) -> Self
    where
        S: StorageProvider + FriendshipStorage + 'static,
    {
        let provider: Arc<dyn StorageProvider> = storage.clone();
        let gate = AuthorizationGate::new(storage);
        let gateway = Arc::new(SocketGateway::new());
        let shared_gateway: Arc<dyn Gateway> = gateway.clone();

        let messages = Arc::new(MessageCoordinator::new(
            provider.clone(),
            shared_gateway.clone(),
            gate,
            config.max_message_length,
            config.reorder_window,
        ));
        let friends = Arc::new(FriendRequestCoordinator::new(
            provider.clone(),
            shared_gateway.clone(),
            mailer,
        ));
        let router = Arc::new(EventRouter::new(
            Arc::new(ConnectionRegistry::new()),
            shared_gateway,
            messages,
            friends,
            config.max_frame_size,
        ));

        info!(
            "Relay ready: frames up to {} bytes, messages up to {} chars, reorder window {}",
            config.max_frame_size, config.max_message_length, config.reorder_window
        );

        Self {
            token_manager: Arc::new(TokenManager::new(&config.jwt_secret)),
            config,
            gateway,
            router,
            storage: provider,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn token_manager(&self) -> Arc<TokenManager> {
        self.token_manager.clone()
    }

    pub fn router(&self) -> Arc<EventRouter> {
        self.router.clone()
    }

    /// Whether the storage backend answers
    pub async fn storage_healthy(storage: &dyn StorageProvider) -> bool {
        match storage.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!("Storage health check failed: {}", e);
                false
            }
        }
    }

    pub fn storage(&self) -> Arc<dyn StorageProvider> {
        self.storage.clone()
    }

    /// Connections currently held by the gateway
    pub fn connection_count(&self) -> usize {
        self.gateway.connection_count()
    }
}
