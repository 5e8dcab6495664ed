use std::sync::Arc;

use base64::Engine;
use serde_json::json;

use crate::connection::ConnectionHandle;
use crate::error::ChatError;
use crate::protocol::{
    AuthRequestPayload, CreateRoomPayload, FileTransferPayload, JoinRoomPayload, Message,
    MessageKind, Priority, RegisterRequestPayload, TextMessageInPayload, error_message,
};
use crate::server::Server;

/// Literal error text the wire protocol expects for a failed authentication attempt,
/// regardless of whether the cause was a bad password or the single-session rule (§8 S1/S2).
const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// One handler per `MessageKind`, gated by the pre-state table in §4.6. A handler that can't
/// parse its payload replies `error` and leaves state untouched, rather than tearing down the
/// connection — see DESIGN.md for why this rewrite treats payload schema violations as a
/// resource-level error rather than the harder "close the socket" response §7 allows for them.
pub fn dispatch(server: &Arc<Server>, handle: &Arc<ConnectionHandle>, message: Message) {
    let kind = match message.kind() {
        Ok(k) => k,
        Err(e) => {
            let _ = handle.send(error_message(e.to_string()));
            return;
        }
    };

    match kind {
        MessageKind::AuthRequest => handle_auth_request(server, handle, &message),
        MessageKind::RegisterRequest => handle_register_request(server, handle, &message),
        MessageKind::CreateRoom => handle_create_room(server, handle, &message),
        MessageKind::JoinRoom => handle_join_room(server, handle, &message),
        MessageKind::LeaveRoom => handle_leave_room(server, handle),
        MessageKind::ListRooms => handle_list_rooms(server, handle),
        MessageKind::UserList => handle_user_list_request(server, handle),
        MessageKind::TextMessage => handle_text_message(server, handle, &message),
        MessageKind::FileTransfer => handle_file_transfer(server, handle, &message),
        MessageKind::Heartbeat => handle_heartbeat(handle),
        MessageKind::ServerInfo => handle_server_info(server, handle),
        // Server-originated kinds received from a client are simply ignored; a client has no
        // business sending them and no reply is owed.
        MessageKind::AuthResponse
        | MessageKind::RegisterResponse
        | MessageKind::RoomInfo
        | MessageKind::FileChunk
        | MessageKind::Error
        | MessageKind::Success => {}
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(message: &Message, handle: &ConnectionHandle) -> Option<T> {
    match serde_json::from_value(message.data.clone()) {
        Ok(payload) => Some(payload),
        Err(e) => {
            let _ = handle.send(error_message(format!("invalid payload: {e}")));
            None
        }
    }
}

fn require_auth(handle: &ConnectionHandle) -> Option<String> {
    match handle.authenticated_user() {
        Some(user) => Some(user),
        None => {
            let _ = handle.send(error_message(ChatError::Unauthorized.to_string()));
            None
        }
    }
}

/// Fetches the connection's current room, replying with the typed `NotInRoom` domain error
/// (§7 "state error") and returning `None` if there isn't one.
fn require_room(handle: &ConnectionHandle) -> Option<String> {
    match handle.current_room() {
        Some(room_id) => Some(room_id),
        None => {
            let _ = handle.send(error_message(ChatError::NotInRoom.to_string()));
            None
        }
    }
}

fn handle_auth_request(server: &Arc<Server>, handle: &Arc<ConnectionHandle>, message: &Message) {
    if handle.authenticated_user().is_some() {
        let _ = handle.send(error_message("already authenticated"));
        return;
    }
    let Some(payload) = parse_payload::<AuthRequestPayload>(message, handle) else {
        return;
    };

    match server.users.authenticate(&payload.username, &payload.password) {
        Ok(record) => {
            *handle.authenticated_user.lock().unwrap() = Some(record.username.clone());
            server.connections.lock().unwrap().insert(handle.id, handle.clone());
            tracing::info!(username = %record.username, "user authenticated");
            let _ = handle.send(Message::new(
                MessageKind::AuthResponse,
                json!({ "success": true, "user_id": record.id, "username": record.username }),
                Priority::Normal,
            ));
        }
        Err(_) => {
            let _ = handle.send(Message::new(
                MessageKind::AuthResponse,
                json!({ "success": false, "error": INVALID_CREDENTIALS }),
                Priority::Normal,
            ));
        }
    }
}

fn handle_register_request(server: &Arc<Server>, handle: &Arc<ConnectionHandle>, message: &Message) {
    let Some(payload) = parse_payload::<RegisterRequestPayload>(message, handle) else {
        return;
    };

    match server.users.register(&payload.username, &payload.password) {
        Ok(record) => {
            tracing::info!(username = %record.username, "user registered");
            let _ = handle.send(Message::new(
                MessageKind::RegisterResponse,
                json!({ "success": true, "user_id": record.id }),
                Priority::Normal,
            ));
        }
        Err(e) => {
            let _ = handle.send(Message::new(
                MessageKind::RegisterResponse,
                json!({ "success": false, "error": e.to_string() }),
                Priority::Normal,
            ));
        }
    }
}

fn handle_create_room(server: &Arc<Server>, handle: &Arc<ConnectionHandle>, message: &Message) {
    if require_auth(handle).is_none() {
        return;
    }
    let Some(payload) = parse_payload::<CreateRoomPayload>(message, handle) else {
        return;
    };

    let room_id = server.rooms.create(&payload.name);
    tracing::info!(room_id = %room_id, name = %payload.name, "room created");
    let _ = handle.send(Message::new(
        MessageKind::Success,
        json!({ "room_id": room_id, "name": payload.name }),
        Priority::Normal,
    ));
}

fn handle_join_room(server: &Arc<Server>, handle: &Arc<ConnectionHandle>, message: &Message) {
    let Some(username) = require_auth(handle) else {
        return;
    };
    let Some(payload) = parse_payload::<JoinRoomPayload>(message, handle) else {
        return;
    };

    if server.rooms.join(&payload.room_id, &username) {
        *handle.current_room.lock().unwrap() = Some(payload.room_id.clone());
        let event = Message::new(
            MessageKind::UserList,
            json!({ "action": "join", "username": username }),
            Priority::Normal,
        )
        .with_room(payload.room_id.clone());
        server.fanout(&payload.room_id, Some(handle.id), &event);

        let _ = handle.send(Message::new(
            MessageKind::Success,
            json!({ "room_id": payload.room_id }),
            Priority::Normal,
        ));
    } else {
        let _ = handle.send(error_message(ChatError::RoomNotFound.to_string()));
    }
}

fn handle_leave_room(server: &Arc<Server>, handle: &Arc<ConnectionHandle>) {
    let Some(username) = require_auth(handle) else {
        return;
    };
    let Some(room_id) = require_room(handle) else {
        return;
    };

    server.rooms.leave(&room_id, &username);
    *handle.current_room.lock().unwrap() = None;

    let event = Message::new(
        MessageKind::UserList,
        json!({ "action": "leave", "username": username }),
        Priority::Normal,
    )
    .with_room(room_id.clone());
    server.fanout(&room_id, Some(handle.id), &event);

    let _ = handle.send(Message::new(
        MessageKind::Success,
        json!({ "room_id": room_id }),
        Priority::Normal,
    ));
}

fn handle_list_rooms(server: &Arc<Server>, handle: &Arc<ConnectionHandle>) {
    let rooms: Vec<_> = server
        .rooms
        .list()
        .into_iter()
        .map(|room| {
            json!({
                "id": room.id,
                "name": room.name,
                "user_count": room.member_count,
                "created": room.created_at,
            })
        })
        .collect();

    let _ = handle.send(Message::new(
        MessageKind::RoomInfo,
        json!({ "rooms": rooms }),
        Priority::Normal,
    ));
}

fn handle_user_list_request(server: &Arc<Server>, handle: &Arc<ConnectionHandle>) {
    if require_auth(handle).is_none() {
        return;
    }
    let Some(room_id) = require_room(handle) else {
        return;
    };

    let users = server.rooms.members(&room_id).unwrap_or_default();
    let _ = handle.send(Message::new(
        MessageKind::UserList,
        json!({ "users": users }),
        Priority::Normal,
    ));
}

fn handle_text_message(server: &Arc<Server>, handle: &Arc<ConnectionHandle>, message: &Message) {
    let Some(username) = require_auth(handle) else {
        return;
    };
    let Some(room_id) = require_room(handle) else {
        return;
    };
    let Some(payload) = parse_payload::<TextMessageInPayload>(message, handle) else {
        return;
    };

    let outbound = Message::new(
        MessageKind::TextMessage,
        json!({
            "username": username,
            "text": payload.text,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }),
        Priority::Normal,
    )
    .with_room(room_id.clone());
    server.fanout(&room_id, Some(handle.id), &outbound);
}

fn handle_file_transfer(server: &Arc<Server>, handle: &Arc<ConnectionHandle>, message: &Message) {
    if require_auth(handle).is_none() {
        return;
    }
    let Some(room_id) = require_room(handle) else {
        return;
    };
    let Some(payload) = parse_payload::<FileTransferPayload>(message, handle) else {
        return;
    };

    if base64::engine::general_purpose::STANDARD
        .decode(&payload.data)
        .is_err()
    {
        let _ = handle.send(error_message("invalid file chunk encoding"));
        return;
    }

    let chunk = Message::new(
        MessageKind::FileChunk,
        json!({
            "transfer_id": payload.transfer_id,
            "filename": payload.filename,
            "chunk_num": payload.chunk_num,
            "total_chunks": payload.total_chunks,
            "data": payload.data,
        }),
        Priority::Low,
    )
    .with_room(room_id.clone());
    server.fanout(&room_id, Some(handle.id), &chunk);
}

fn handle_heartbeat(handle: &Arc<ConnectionHandle>) {
    handle.touch_heartbeat();
    let _ = handle.send(Message::new(MessageKind::Heartbeat, json!({}), Priority::Critical));
}

fn handle_server_info(server: &Arc<Server>, handle: &Arc<ConnectionHandle>) {
    let snapshot = server.metrics.snapshot();
    let _ = handle.send(Message::new(
        MessageKind::ServerInfo,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": server.uptime_seconds(),
            "connections": snapshot.current_connections,
        }),
        Priority::Normal,
    ));
}
