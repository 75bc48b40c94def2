//! Authentication context: the verified identity behind every connection

pub mod identity;
pub mod token;

// Re-export main components
pub use identity::{looks_like_email, normalize_email, Identity};
pub use token::{extract_bearer_token, Claims, TokenManager};
