//! REST handlers: registration and room listing/creation.

use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    name: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    api_key: String,
}

/// Register an identity and issue its bearer credential.
pub async fn register(State(state): State<AppState>, Json(req): Json<RegisterRequest>) -> Response {
    if req.name.is_empty() {
        return (StatusCode::BAD_REQUEST, "name is required").into_response();
    }

    let api_key = generate_api_key();
    match state.store.create_user(&req.name, &api_key).await {
        Ok(_) => Json(RegisterResponse { api_key }).into_response(),
        Err(err) => {
            error!(error = %err, "failed to create user");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to create user").into_response()
        }
    }
}

fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    id: String,
    name: String,
}

impl From<&parley_store::RoomRow> for RoomResponse {
    fn from(room: &parley_store::RoomRow) -> Self {
        let uuid = room.uuid.to_string();
        let name = if room.name.is_empty() {
            uuid[..8].to_string()
        } else {
            room.name.clone()
        };
        Self { id: uuid, name }
    }
}

/// List known rooms.
pub async fn list_rooms(State(state): State<AppState>) -> Response {
    match state
        .store
        .list_rooms(state.config.limits.room_list_limit, 0)
        .await
    {
        Ok(rooms) => {
            let resp: Vec<RoomResponse> = rooms.iter().map(RoomResponse::from).collect();
            Json(resp).into_response()
        }
        Err(err) => {
            error!(error = %err, "failed to list rooms");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to list rooms").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    name: String,
}

/// Create a named room.
pub async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Response {
    if req.name.is_empty() {
        return (StatusCode::BAD_REQUEST, "name is required").into_response();
    }

    match state.store.create_room(&req.name).await {
        Ok(room) => (StatusCode::CREATED, Json(RoomResponse::from(&room))).into_response(),
        Err(err) => {
            error!(error = %err, "failed to create room");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to create room").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_keys_are_unique_hex() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn unnamed_rooms_fall_back_to_uuid_prefix() {
        let room = parley_store::RoomRow {
            id: 1,
            uuid: uuid::Uuid::new_v4(),
            name: String::new(),
        };
        let resp = RoomResponse::from(&room);
        assert_eq!(resp.name, room.uuid.to_string()[..8]);

        let named = parley_store::RoomRow {
            name: "general".to_string(),
            ..room
        };
        assert_eq!(RoomResponse::from(&named).name, "general");
    }
}
