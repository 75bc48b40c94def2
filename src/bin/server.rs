use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use warp::Filter;

use swiftchat_relay::config::ServerConfig;
use swiftchat_relay::core::RelayServer;
use swiftchat_relay::handlers::{handle_rejection, routes};
use swiftchat_relay::mail::mail_sender_from_config;
use swiftchat_relay::storage::MemoryStorage;

#[tokio::main]
async fn main() {
    // Initialize env
    match dotenvy::dotenv() {
        Ok(_) => info!("Environment variables loaded from .env file"),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    // Initialize logging
    env_logger::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Configuration: host={}, port={}", config.host, config.port);
    if config.mail.is_none() {
        warn!("SWIFTCHAT_MAIL_API_KEY not set, outgoing mail will only be logged");
    }

    let mailer = mail_sender_from_config(config.mail.as_ref());
    let storage = Arc::new(MemoryStorage::new());
    let server = RelayServer::new(config.clone(), storage, mailer);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting SwiftChat relay on {}", addr);
    warp::serve(routes(&server).recover(handle_rejection))
        .run(addr)
        .await;
}
