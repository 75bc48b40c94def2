//! Authentication of websocket upgrades
//!
//! Tokens are only read from headers: `Authorization: Bearer <jwt>`, the
//! `Sec-WebSocket-Protocol` entry `bearer.<jwt>`, or `X-Auth-Token`. Query
//! strings end up in access logs, so they are never consulted. A token sent
//! as a subprotocol is echoed back as the selected protocol on the 101 reply.

use log::{debug, warn};
use std::sync::Arc;
use warp::http::HeaderMap;
use warp::{Filter, Rejection};

use crate::auth::{extract_bearer_token, Identity, TokenManager};
use crate::error::{RelayError, Result};

/// Rejection for a missing or invalid token
#[derive(Debug)]
pub struct Unauthorized;

impl warp::reject::Reject for Unauthorized {}

/// Token carried in a `Sec-WebSocket-Protocol` entry (`bearer.<jwt>`)
pub fn extract_token_from_subprotocol(headers: &HeaderMap) -> Option<String> {
    let protocols = headers.get("sec-websocket-protocol")?.to_str().ok()?;
    protocols
        .split(',')
        .filter_map(|protocol| protocol.trim().strip_prefix("bearer."))
        .find(|token| !token.is_empty())
        .map(str::to_string)
}

/// Where an upgrade request carried its token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    AuthorizationHeader,
    /// Offered as `bearer.<jwt>`; the upgrade reply must select that entry
    Subprotocol,
    AuthTokenHeader,
}

/// Token from the supported headers, in priority order
pub fn extract_token(headers: &HeaderMap) -> Option<(String, TokenSource)> {
    if let Some(token) = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
    {
        debug!("Token extracted from Authorization header");
        return Some((token, TokenSource::AuthorizationHeader));
    }

    if let Some(token) = extract_token_from_subprotocol(headers) {
        debug!("Token extracted from WebSocket subprotocol");
        return Some((token, TokenSource::Subprotocol));
    }

    headers
        .get("x-auth-token")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            debug!("Token extracted from X-Auth-Token header");
            (token.to_string(), TokenSource::AuthTokenHeader)
        })
}

/// An authenticated upgrade request
#[derive(Debug, Clone)]
pub struct Handshake {
    pub identity: Identity,
    /// Subprotocol the 101 reply has to select, if the client offered its token as one
    pub subprotocol: Option<String>,
}

/// Resolve the identity behind an upgrade request
pub fn authenticate(headers: &HeaderMap, tokens: &TokenManager) -> Result<Handshake> {
    let (token, source) = extract_token(headers)
        .ok_or_else(|| RelayError::Unauthenticated("No token provided".to_string()))?;
    let identity = tokens.identity_from_token(&token)?;
    let subprotocol = match source {
        TokenSource::Subprotocol => Some(format!("bearer.{}", token)),
        _ => None,
    };
    Ok(Handshake {
        identity,
        subprotocol,
    })
}

/// Filter that yields the authenticated handshake or rejects with [`Unauthorized`]
pub fn with_handshake(
    tokens: Arc<TokenManager>,
) -> impl Filter<Extract = (Handshake,), Error = Rejection> + Clone {
    warp::header::headers_cloned().and_then(move |headers: HeaderMap| {
        let tokens = tokens.clone();
        async move {
            authenticate(&headers, &tokens).map_err(|e| {
                warn!("Rejected websocket upgrade: {}", e);
                warp::reject::custom(Unauthorized)
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use warp::http::HeaderValue;

    const SECRET: &str = "handler-signing-key-0123456789-abcdefgh";

    fn token(tokens: &TokenManager) -> String {
        tokens
            .generate_token(&Claims::new("u1".to_string(), "a@x.com".to_string()))
            .unwrap()
    }

    #[test]
    fn test_authorization_header_takes_priority() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer first"));
        headers.insert("x-auth-token", HeaderValue::from_static("second"));
        assert_eq!(
            extract_token(&headers),
            Some(("first".to_string(), TokenSource::AuthorizationHeader))
        );
    }

    #[test]
    fn test_subprotocol_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "sec-websocket-protocol",
            HeaderValue::from_static("chat, bearer.abc.def"),
        );
        assert_eq!(
            extract_token(&headers),
            Some(("abc.def".to_string(), TokenSource::Subprotocol))
        );
    }

    #[test]
    fn test_no_token_is_an_auth_error() {
        let tokens = TokenManager::new(SECRET);
        let result = authenticate(&HeaderMap::new(), &tokens);
        assert!(matches!(result, Err(RelayError::Unauthenticated(_))));
    }

    #[test]
    fn test_x_auth_token_resolves_identity() {
        let tokens = TokenManager::new(SECRET);
        let mut headers = HeaderMap::new();
        headers.insert("x-auth-token", HeaderValue::from_str(&token(&tokens)).unwrap());

        let handshake = authenticate(&headers, &tokens).unwrap();
        assert_eq!(handshake.identity.user_id, "u1");
        assert_eq!(handshake.identity.email, "a@x.com");
        assert_eq!(handshake.subprotocol, None);
    }

    #[test]
    fn test_subprotocol_token_is_selected_back() {
        let tokens = TokenManager::new(SECRET);
        let jwt = token(&tokens);
        let mut headers = HeaderMap::new();
        headers.insert(
            "sec-websocket-protocol",
            HeaderValue::from_str(&format!("chat, bearer.{}", jwt)).unwrap(),
        );

        let handshake = authenticate(&headers, &tokens).unwrap();
        assert_eq!(handshake.identity.user_id, "u1");
        assert_eq!(handshake.subprotocol, Some(format!("bearer.{}", jwt)));
    }
}
