// Public API for integration tests and embedding clients

pub mod api;
pub mod broadcast;
pub mod bus;
pub mod completion;
pub mod config;
pub mod error;
pub mod intro;
pub mod mesh;
pub mod protocol;
pub mod session;
pub mod state;
pub mod store;
pub mod timer;
pub mod types;
pub mod view;
pub mod ws;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Full HTTP surface: the WebSocket endpoint plus the polling API
pub fn app(state: Arc<state::AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/games/{code}", get(api::game_overview))
        .route("/api/games/{code}/avatars", get(api::avatar_overview))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
