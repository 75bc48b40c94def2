//! Relay settings, read once at startup from `SWIFTCHAT_*` environment variables

use crate::constants::{
    DEFAULT_HOST, DEFAULT_MAIL_API_URL, DEFAULT_MAIL_FROM, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_MAX_MESSAGE_LENGTH, DEFAULT_PORT, DEFAULT_REORDER_WINDOW,
};
use crate::error::{RelayError, Result};
use std::env;

/// Outbound mail provider settings
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_key: String,
    pub api_url: String,
    pub from_address: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// JWT secret used to verify the identity carried by each connection
    pub jwt_secret: String,
    /// Largest inbound websocket frame accepted, in bytes
    pub max_frame_size: usize,
    /// Largest chat message body accepted, in characters
    pub max_message_length: usize,
    /// Out-of-order deliveries buffered per room before a gap is skipped
    pub reorder_window: usize,
    /// Mail provider; `None` logs outgoing mail instead of sending it
    pub mail: Option<MailConfig>,
}

/// Placeholder fragments that show up in copied sample configs
const PLACEHOLDER_SECRETS: &[&str] = &[
    "your-secret-key",
    "change-this",
    "test-secret",
    "default",
    "password",
    "12345",
];

const MIN_SECRET_LEN: usize = 32;

impl Default for ServerConfig {
    fn default() -> Self {
        panic!("ServerConfig has no default; load it with ServerConfig::from_env()");
    }
}

impl ServerConfig {
    /// Fixed configuration for tests. Never use outside of them.
    pub fn for_testing() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            jwt_secret: "relay-unit-suite-signing-key-6f1c9e2a7b4d".to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            reorder_window: DEFAULT_REORDER_WINDOW,
            mail: None,
        }
    }

    fn validate_jwt_secret(secret: &str) -> Result<()> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(RelayError::Config(format!(
                "JWT secret is {} characters, at least {} are required",
                secret.len(),
                MIN_SECRET_LEN
            )));
        }

        if let Some(fragment) = PLACEHOLDER_SECRETS.iter().find(|p| secret.contains(*p)) {
            return Err(RelayError::Config(format!(
                "JWT secret looks like a placeholder ('{}'); generate one with `openssl rand -base64 32`",
                fragment
            )));
        }

        if secret.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(RelayError::Config(
                "JWT secret needs digits or symbols, not only letters".to_string(),
            ));
        }

        Ok(())
    }

    fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
        env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Read and check every setting. Missing optional values fall back to defaults.
    pub fn from_env() -> Result<Self> {
        let host = env::var("SWIFTCHAT_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = Self::parse_var("SWIFTCHAT_PORT", DEFAULT_PORT);
        let max_frame_size = Self::parse_var("SWIFTCHAT_MAX_FRAME_SIZE", DEFAULT_MAX_FRAME_SIZE);
        let max_message_length =
            Self::parse_var("SWIFTCHAT_MAX_MESSAGE_LENGTH", DEFAULT_MAX_MESSAGE_LENGTH);
        let reorder_window = Self::parse_var("SWIFTCHAT_REORDER_WINDOW", DEFAULT_REORDER_WINDOW);

        let jwt_secret = env::var("SWIFTCHAT_JWT_SECRET")
            .or_else(|_| env::var("JWT_SECRET"))
            .map_err(|_| {
                RelayError::Config("SWIFTCHAT_JWT_SECRET (or JWT_SECRET) must be set".to_string())
            })?;
        Self::validate_jwt_secret(&jwt_secret)?;

        if max_frame_size == 0 || max_message_length == 0 {
            return Err(RelayError::Config(
                "Frame and message size limits must be greater than zero".to_string(),
            ));
        }

        let mail = env::var("SWIFTCHAT_MAIL_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(|api_key| MailConfig {
                api_key,
                api_url: env::var("SWIFTCHAT_MAIL_API_URL")
                    .unwrap_or(DEFAULT_MAIL_API_URL.to_string()),
                from_address: env::var("SWIFTCHAT_MAIL_FROM")
                    .unwrap_or(DEFAULT_MAIL_FROM.to_string()),
            });

        Ok(Self {
            host,
            port,
            jwt_secret,
            max_frame_size,
            max_message_length,
            reorder_window: reorder_window.max(1),
            mail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "ServerConfig has no default")]
    fn test_default_is_refused() {
        let _ = ServerConfig::default();
    }

    #[test]
    fn test_for_testing_has_no_mail_provider() {
        let config = ServerConfig::for_testing();
        assert!(config.mail.is_none());
        assert_eq!(config.max_message_length, DEFAULT_MAX_MESSAGE_LENGTH);
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(ServerConfig::validate_jwt_secret("short").is_err());
    }

    #[test]
    fn test_placeholder_fragment_named_in_error() {
        let err = ServerConfig::validate_jwt_secret("change-this-0123456789-0123456789-abc")
            .unwrap_err();
        assert!(err.to_string().contains("change-this"));
    }

    #[test]
    fn test_random_secret_accepted() {
        assert!(ServerConfig::validate_jwt_secret("q8Zr2+Lx0vT9mB4nW7yK1cE5hJ3sP6aF").is_ok());
    }

    #[test]
    fn test_from_env_requires_secret() {
        env::remove_var("SWIFTCHAT_JWT_SECRET");
        env::remove_var("JWT_SECRET");

        let result = ServerConfig::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("JWT_SECRET"));
    }
}
