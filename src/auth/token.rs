use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::identity::{looks_like_email, Identity};
use crate::error::{RelayError, Result};

/// Claims the session layer signs into each connection token
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Address whose notification channel the connection subscribes to
    pub email: String,
    pub exp: usize,
    pub iat: usize,
    pub nbf: usize,
}

const TOKEN_TTL_SECS: usize = 24 * 60 * 60;

fn now_secs() -> usize {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .unwrap_or(0)
}

impl Claims {
    pub fn new(user_id: String, email: String) -> Self {
        let issued = now_secs();
        Self {
            sub: user_id,
            email,
            exp: issued + TOKEN_TTL_SECS,
            iat: issued,
            nbf: issued,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.exp < now_secs()
    }
}

/// HMAC signing and verification of connection tokens
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenManager {
    pub fn new(secret: &str) -> Self {
        let key = secret.as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(key),
            decoding_key: DecodingKey::from_secret(key),
            validation: Validation::default(),
        }
    }

    /// Sign claims; used by tests and tooling that mint tokens locally
    pub fn generate_token(&self, claims: &Claims) -> Result<String> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| RelayError::Unauthenticated(format!("cannot sign token: {}", e)))
    }

    /// Check signature and time bounds
    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| RelayError::Unauthenticated(format!("token rejected: {}", e)))
    }

    /// Identity a verified token speaks for
    pub fn identity_from_token(&self, token: &str) -> Result<Identity> {
        if token.len() > 2048 || token.chars().any(|c| c.is_control()) {
            return Err(RelayError::Unauthenticated("malformed token".to_string()));
        }

        let claims = self.validate_token(token)?.claims;
        if claims.is_expired() {
            return Err(RelayError::Unauthenticated("token expired".to_string()));
        }
        if claims.sub.trim().is_empty() || !looks_like_email(claims.email.trim()) {
            return Err(RelayError::Unauthenticated(
                "token lacks a user id or email".to_string(),
            ));
        }

        Ok(Identity::new(claims.sub, &claims.email))
    }
}

/// Token part of an `Authorization: Bearer <jwt>` value
pub fn extract_bearer_token(auth_header: &str) -> Option<String> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
