use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Priority carried on the wire as the integer `1..4`; see §3/§6. `Message.priority` stores
/// the raw `u8` directly — this enum is the typed form used once decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl TryFrom<u8> for Priority {
    type Error = ChatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::Low),
            2 => Ok(Priority::Normal),
            3 => Ok(Priority::High),
            4 => Ok(Priority::Critical),
            other => Err(ChatError::Protocol(format!("invalid priority: {other}"))),
        }
    }
}

/// The closed set of message kinds this protocol understands. The wire discriminant is the
/// lowercase string in §6; everything else about a kind (its payload shape, its pre-state
/// requirement) lives in `router.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    AuthRequest,
    AuthResponse,
    RegisterRequest,
    RegisterResponse,
    CreateRoom,
    JoinRoom,
    LeaveRoom,
    ListRooms,
    RoomInfo,
    TextMessage,
    FileTransfer,
    FileChunk,
    UserList,
    ServerInfo,
    Heartbeat,
    Error,
    Success,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::AuthRequest => "auth_request",
            MessageKind::AuthResponse => "auth_response",
            MessageKind::RegisterRequest => "register_request",
            MessageKind::RegisterResponse => "register_response",
            MessageKind::CreateRoom => "create_room",
            MessageKind::JoinRoom => "join_room",
            MessageKind::LeaveRoom => "leave_room",
            MessageKind::ListRooms => "list_rooms",
            MessageKind::RoomInfo => "room_info",
            MessageKind::TextMessage => "text_message",
            MessageKind::FileTransfer => "file_transfer",
            MessageKind::FileChunk => "file_chunk",
            MessageKind::UserList => "user_list",
            MessageKind::ServerInfo => "server_info",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Error => "error",
            MessageKind::Success => "success",
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "auth_request" => MessageKind::AuthRequest,
            "auth_response" => MessageKind::AuthResponse,
            "register_request" => MessageKind::RegisterRequest,
            "register_response" => MessageKind::RegisterResponse,
            "create_room" => MessageKind::CreateRoom,
            "join_room" => MessageKind::JoinRoom,
            "leave_room" => MessageKind::LeaveRoom,
            "list_rooms" => MessageKind::ListRooms,
            "room_info" => MessageKind::RoomInfo,
            "text_message" => MessageKind::TextMessage,
            "file_transfer" => MessageKind::FileTransfer,
            "file_chunk" => MessageKind::FileChunk,
            "user_list" => MessageKind::UserList,
            "server_info" => MessageKind::ServerInfo,
            "heartbeat" => MessageKind::Heartbeat,
            "error" => MessageKind::Error,
            "success" => MessageKind::Success,
            other => return Err(ChatError::UnknownKind(other.to_string())),
        })
    }
}

/// The wire envelope. `data`'s shape depends on `kind`; `router.rs` deserializes it into the
/// matching per-kind payload record rather than operating on the raw JSON value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind_str: String,
    pub data: serde_json::Value,
    pub priority: u8,
    pub room_id: Option<String>,
    pub timestamp: String,
}

impl Message {
    pub fn kind(&self) -> Result<MessageKind, ChatError> {
        self.kind_str.parse()
    }

    pub fn priority(&self) -> Result<Priority, ChatError> {
        Priority::try_from(self.priority)
    }

    /// Build a server-originated message. `id` is 0 for server-initiated frames; a reply can
    /// reuse the id of the frame it answers when that matters to the caller.
    pub fn new(kind: MessageKind, data: serde_json::Value, priority: Priority) -> Self {
        Message {
            id: 0,
            kind_str: kind.as_str().to_string(),
            data,
            priority: priority as u8,
            room_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }
}

pub fn error_message(error: impl Into<String>) -> Message {
    Message::new(
        MessageKind::Error,
        serde_json::json!({ "error": error.into() }),
        Priority::Normal,
    )
}

// --- Per-kind payload records (§6, §9 "dynamic payloads") ---

#[derive(Debug, Deserialize)]
pub struct AuthRequestPayload {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequestPayload {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoomPayload {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct JoinRoomPayload {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TextMessageInPayload {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct FileTransferPayload {
    pub transfer_id: String,
    pub filename: String,
    pub chunk_num: u32,
    pub total_chunks: u32,
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_round_trips_through_its_wire_value() {
        for raw in 1u8..=4 {
            let p = Priority::try_from(raw).unwrap();
            assert_eq!(p as u8, raw);
        }
        assert!(Priority::try_from(0).is_err());
        assert!(Priority::try_from(5).is_err());
    }

    #[test]
    fn kind_round_trips_through_its_wire_string() {
        for kind in [
            MessageKind::AuthRequest,
            MessageKind::TextMessage,
            MessageKind::FileChunk,
            MessageKind::ServerInfo,
        ] {
            let s = kind.as_str();
            let parsed: MessageKind = s.parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn unknown_kind_is_an_error() {
        assert!("not_a_real_kind".parse::<MessageKind>().is_err());
    }
}
