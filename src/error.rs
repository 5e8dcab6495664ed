use thiserror::Error;

/// Crate-wide error type. Connection and scheduler boundaries are the only places
/// a `ChatError` is turned into an outbound `error` frame, a log line, or a teardown.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("malformed frame: {0}")]
    Protocol(String),

    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    #[error("frame exceeds maximum size ({size} > {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Not in a room")]
    NotInRoom,

    #[error("Room not found")]
    RoomNotFound,

    #[error("username already exists")]
    UsernameExists,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("session already active for this user")]
    SessionAlreadyActive,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("persistence error: {0}")]
    Persistence(#[from] serde_json::Error),

    #[error("tls error: {0}")]
    Tls(String),
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;
