use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use banter_types::api::{CreateRoomRequest, RoomListResponse};

use crate::AppState;

/// Insert-if-absent room creation. Responds with the current room list
/// either way; 201 only when the name was new.
pub async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let created = state.rooms.ensure(name).await;
    if created {
        info!("room {} created via api", name);
    }

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(RoomListResponse {
            rooms: state.rooms.list().await,
        }),
    ))
}

pub async fn list_rooms(State(state): State<AppState>) -> impl IntoResponse {
    Json(RoomListResponse {
        rooms: state.rooms.list().await,
    })
}

/// Presence snapshot for a room, derived from live sessions.
pub async fn room_users(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    if !state.rooms.contains(&room).await {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(state.presence.list_in_room(&room).await))
}
