use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum RelayError {
    // Transport
    ConnectionClosed,
    FrameTooLarge(usize),
    Encoding(String),

    // Persistence
    Storage(String),
    NotFound(String),
    RoomNotFound,

    // Identity and permissions
    Unauthenticated(String),
    NotAuthor,
    RoomMismatch(String),

    // Input
    Invalid(String),

    // Collaborators
    Mail(String),

    // Startup
    Config(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionClosed => write!(f, "Connection already closed"),
            Self::FrameTooLarge(size) => write!(f, "Frame of {} bytes exceeds the limit", size),
            Self::Encoding(msg) => write!(f, "Encoding failed: {}", msg),
            Self::Storage(msg) => write!(f, "Storage failure: {}", msg),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::RoomNotFound => write!(f, "Room does not exist"),
            Self::Unauthenticated(msg) => write!(f, "Not authenticated: {}", msg),
            Self::NotAuthor => write!(f, "Only the author may change this message"),
            Self::RoomMismatch(msg) => write!(f, "Wrong room: {}", msg),
            Self::Invalid(msg) => write!(f, "Invalid input: {}", msg),
            Self::Mail(msg) => write!(f, "Mail delivery failed: {}", msg),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for RelayError {}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Encoding(err.to_string())
    }
}

// Result alias used across the relay
pub type Result<T> = std::result::Result<T, RelayError>;
