//! Host-only command handlers
//!
//! All handlers in this module require the host session.
//! Authorization is checked in the main dispatch layer before calling these.

use crate::protocol::ServerMessage;
use crate::session::SessionContext;
use crate::state::{AppState, NewQuestion};
use crate::types::*;
use std::sync::Arc;

use super::handlers::reply;
use super::player::handle_request_state;

pub async fn handle_start_game(state: &Arc<AppState>, ctx: &SessionContext) -> Option<ServerMessage> {
    tracing::info!("Host starting game {}", ctx.game_code);
    match state.start_game(ctx).await {
        Ok(_) => handle_request_state(state, ctx).await,
        Err(e) => Some(ServerMessage::from(&e)),
    }
}

pub async fn handle_advance_round(
    state: &Arc<AppState>,
    ctx: &SessionContext,
    from_round: RoundKind,
) -> Option<ServerMessage> {
    tracing::info!("Host advancing game {} from {}", ctx.game_code, from_round);
    match state.advance_round(ctx, from_round).await {
        Ok(_) => handle_request_state(state, ctx).await,
        Err(e) => Some(ServerMessage::from(&e)),
    }
}

pub async fn handle_finish_game(
    state: &Arc<AppState>,
    ctx: &SessionContext,
) -> Option<ServerMessage> {
    tracing::info!("Host finishing game {}", ctx.game_code);
    reply(state.finish_game(ctx).await, |entries| {
        ServerMessage::Scoreboard { entries }
    })
}

/// The round-finished event itself reaches every subscriber over the bus
pub async fn handle_end_round(state: &Arc<AppState>, ctx: &SessionContext) -> Option<ServerMessage> {
    match state.end_round(ctx).await {
        Ok(fired) => {
            if !fired {
                tracing::debug!("Round in {} was already finished", ctx.game_code);
            }
            None
        }
        Err(e) => Some(ServerMessage::from(&e)),
    }
}

pub async fn handle_start_timer(
    state: &Arc<AppState>,
    ctx: &SessionContext,
    duration_seconds: u32,
) -> Option<ServerMessage> {
    match state.start_timer(ctx, duration_seconds).await {
        Ok(_) => None,
        Err(e) => Some(ServerMessage::from(&e)),
    }
}

pub async fn handle_stop_timer(state: &Arc<AppState>, ctx: &SessionContext) -> Option<ServerMessage> {
    match state.stop_timer(ctx).await {
        Ok(_) => None,
        Err(e) => Some(ServerMessage::from(&e)),
    }
}

/// Reply with the round's full question list so the host sees the new order
pub async fn handle_add_question(
    state: &Arc<AppState>,
    ctx: &SessionContext,
    input: NewQuestion,
) -> Option<ServerMessage> {
    match state.add_question(ctx, input).await {
        Ok(question) => {
            let list = state.list_questions(&ctx.game_id, Some(question.round)).await;
            Some(ServerMessage::HostQuestions {
                round: question.round,
                list,
            })
        }
        Err(e) => Some(ServerMessage::from(&e)),
    }
}

pub async fn handle_set_intro_video(
    state: &Arc<AppState>,
    ctx: &SessionContext,
    round: RoundKind,
    url: String,
) -> Option<ServerMessage> {
    match state.set_intro_video(ctx, round, url).await {
        Ok(_) => handle_request_state(state, ctx).await,
        Err(e) => Some(ServerMessage::from(&e)),
    }
}

pub async fn handle_award_points(
    state: &Arc<AppState>,
    ctx: &SessionContext,
    player_id: PlayerId,
    delta: i64,
) -> Option<ServerMessage> {
    match state.award_points(ctx, &player_id, delta).await {
        Ok(_) => {
            let entries = state.scoreboard(&ctx.game_id).await;
            Some(ServerMessage::Scoreboard { entries })
        }
        Err(e) => Some(ServerMessage::from(&e)),
    }
}
