//! HTTP polling endpoints.
//!
//! Read-only views for clients that cannot hold a WebSocket open, and for the
//! periodic re-fetch half of a reliable view.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::SessionError;
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::{AvatarRef, Game, ScoreEntry, AVATARS};

#[derive(Debug, Clone, Serialize)]
pub struct GameOverview {
    pub game: Game,
    pub scoreboard: Vec<ScoreEntry>,
    pub contestants: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvatarOverview {
    pub all: Vec<AvatarRef>,
    pub taken: Vec<AvatarRef>,
}

fn error_response(e: &SessionError) -> Response {
    let status = match e {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::Conflict(_) => StatusCode::CONFLICT,
        SessionError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
        SessionError::Unauthorized(_) | SessionError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        SessionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        SessionError::TransportDegraded(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(ServerMessage::from(e))).into_response()
}

/// Game row plus the live scoreboard.
///
/// GET /api/games/{code}
pub async fn game_overview(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Response {
    let Some(game) = state.store.find_game_by_code(&code).await else {
        return error_response(&SessionError::not_found(format!("Game with code {}", code)));
    };

    let scoreboard = state.scoreboard(&game.id).await;
    Json(GameOverview {
        contestants: scoreboard.len(),
        game,
        scoreboard,
    })
    .into_response()
}

/// Which avatars are still free in a lobby.
///
/// GET /api/games/{code}/avatars
pub async fn avatar_overview(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Response {
    let Some(game) = state.store.find_game_by_code(&code).await else {
        return error_response(&SessionError::not_found(format!("Game with code {}", code)));
    };

    Json(AvatarOverview {
        all: AVATARS.iter().map(|a| a.to_string()).collect(),
        taken: state.taken_avatars(&game.id).await,
    })
    .into_response()
}
