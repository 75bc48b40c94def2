// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9000;
pub const WS_PATH: &str = "ws";

// Inbound limits
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024;
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 2000;

// Room delivery ordering
pub const DEFAULT_REORDER_WINDOW: usize = 32;

// Outbound mail
pub const DEFAULT_MAIL_API_URL: &str = "https://api.resend.com/emails";
pub const DEFAULT_MAIL_FROM: &str = "SwiftChat <no-reply@swiftchat.app>";
pub const FRIEND_REQUEST_SUBJECT: &str =
    "You have received a new friend request from the SwiftChat app!";
