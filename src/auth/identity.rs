use serde::{Deserialize, Serialize};

/// The verified caller behind a connection.
///
/// `user_id` addresses persistence rows and the connection registry;
/// `email` is the key of the identity's notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
}

impl Identity {
    /// Creates an identity, normalizing the email
    pub fn new(user_id: impl Into<String>, email: &str) -> Self {
        Self {
            user_id: user_id.into(),
            email: normalize_email(email),
        }
    }

    /// Key of this identity's notification channel
    pub fn channel_key(&self) -> &str {
        &self.email
    }
}

/// Canonical form of an email used for every lookup and channel key
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Loose shape check: one `@` with something on both sides and a dot in the domain
pub fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_normalizes_email() {
        let identity = Identity::new("u1", "  Alice@Example.COM ");
        assert_eq!(identity.email, "alice@example.com");
        assert_eq!(identity.channel_key(), "alice@example.com");
    }

    #[test]
    fn test_email_shape() {
        assert!(looks_like_email("b@x.com"));
        assert!(!looks_like_email("bx.com"));
        assert!(!looks_like_email("@x.com"));
        assert!(!looks_like_email("b@x"));
        assert!(!looks_like_email("b@@x.com"));
        assert!(!looks_like_email("b c@x.com"));
    }
}
