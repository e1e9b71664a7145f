//! Participant message handlers
//!
//! Joining, avatar reservation, answers, state reads and the voice relay.
//! Anything that mutates shared state goes through [`AppState`]; these
//! handlers only shape the replies.

use crate::error::SessionError;
use crate::protocol::{
    MicStatusEvent, QuestionInfo, ServerMessage, SessionEvent, SignalEnvelope, SignalKind,
};
use crate::session::SessionContext;
use crate::state::{AppState, JoinRequest};
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;

use super::handlers::reply;

pub async fn handle_create_game(
    state: &Arc<AppState>,
    session: &mut Option<SessionContext>,
    host_name: String,
    intro_videos: HashMap<RoundKind, String>,
) -> Option<ServerMessage> {
    let game = match state.create_game(intro_videos).await {
        Ok(game) => game,
        Err(e) => return Some(ServerMessage::from(&e)),
    };
    handle_join(state, session, game.code, host_name, true, None).await
}

pub async fn handle_join(
    state: &Arc<AppState>,
    session: &mut Option<SessionContext>,
    code: String,
    name: String,
    is_host: bool,
    avatar: Option<AvatarRef>,
) -> Option<ServerMessage> {
    tracing::info!("Join request for {} as {}", code, name);
    let joined = state
        .join_player(JoinRequest {
            code,
            name,
            is_host,
            avatar,
        })
        .await;

    match joined {
        Ok((ctx, _player)) => enter_session(state, session, ctx).await,
        Err(e) => Some(ServerMessage::from(&e)),
    }
}

/// Take an identity back after a reload or a dropped connection
pub async fn handle_resume(
    state: &Arc<AppState>,
    session: &mut Option<SessionContext>,
    token: String,
) -> Option<ServerMessage> {
    match state.resume(&token).await {
        Ok((ctx, _player)) => enter_session(state, session, ctx).await,
        Err(e) => Some(ServerMessage::from(&e)),
    }
}

async fn enter_session(
    state: &Arc<AppState>,
    session: &mut Option<SessionContext>,
    ctx: SessionContext,
) -> Option<ServerMessage> {
    let game = match state.get_game(&ctx.game_id).await {
        Ok(game) => game,
        Err(e) => return Some(ServerMessage::from(&e)),
    };
    let token = state.resume_token(&ctx.player_id).await;
    *session = Some(ctx.clone());
    Some(ServerMessage::Joined {
        context: ctx,
        game,
        token,
    })
}

pub async fn handle_request_state(
    state: &Arc<AppState>,
    ctx: &SessionContext,
) -> Option<ServerMessage> {
    reply(state.game_snapshot(&ctx.game_id).await, |s| {
        ServerMessage::GameState {
            game: s.game,
            players: s.players,
            taken_avatars: s.taken_avatars,
            connected: s.connected,
        }
    })
}

/// Contestants get the questions without answers; the host gets them in full
pub async fn handle_get_questions(
    state: &Arc<AppState>,
    ctx: &SessionContext,
    round: RoundKind,
) -> Option<ServerMessage> {
    let list = state.list_questions(&ctx.game_id, Some(round)).await;
    if ctx.is_host {
        Some(ServerMessage::HostQuestions { round, list })
    } else {
        Some(ServerMessage::Questions {
            round,
            list: list.iter().map(QuestionInfo::from).collect(),
        })
    }
}

pub async fn handle_get_scoreboard(
    state: &Arc<AppState>,
    ctx: &SessionContext,
) -> Option<ServerMessage> {
    let entries = state.scoreboard(&ctx.game_id).await;
    Some(ServerMessage::Scoreboard { entries })
}

pub async fn handle_reserve_avatar(
    state: &Arc<AppState>,
    ctx: &SessionContext,
    avatar: AvatarRef,
) -> Option<ServerMessage> {
    reply(state.reserve_avatar(ctx, &avatar).await, |player| {
        ServerMessage::AvatarReserved { player }
    })
}

pub async fn handle_submit_answer(
    state: &Arc<AppState>,
    ctx: &SessionContext,
    question_id: QuestionId,
    text: String,
    response_time: Option<f64>,
) -> Option<ServerMessage> {
    reply(
        state
            .submit_answer(ctx, &question_id, text, response_time)
            .await,
        |outcome| ServerMessage::AnswerResult {
            answer: outcome.answer,
            overwritten: outcome.overwritten,
            score: outcome.score,
        },
    )
}

/// Relay a voice handshake message. The sender is always the caller.
pub async fn handle_signal(
    state: &Arc<AppState>,
    ctx: &SessionContext,
    to: PlayerId,
    kind: SignalKind,
    payload: serde_json::Value,
) -> Option<ServerMessage> {
    let target = state
        .store
        .get_player(&to)
        .await
        .filter(|p| p.game_id == ctx.game_id && p.id != ctx.player_id);
    if target.is_none() {
        return Some(ServerMessage::from(&SessionError::not_found(format!(
            "Peer {}",
            to
        ))));
    }

    let envelope = SignalEnvelope {
        from: ctx.player_id.clone(),
        to,
        kind,
        payload,
    };
    tracing::debug!(
        "Relaying {:?} from {} to {}",
        envelope.kind,
        envelope.from,
        envelope.to
    );
    state
        .publish(&ctx.game_id, SessionEvent::Signal(envelope))
        .await;
    None
}

pub async fn handle_mic_status(
    state: &Arc<AppState>,
    ctx: &SessionContext,
    is_on: bool,
) -> Option<ServerMessage> {
    let event = MicStatusEvent {
        player_id: ctx.player_id.clone(),
        is_on,
    };
    state
        .publish(&ctx.game_id, SessionEvent::MicStatus(event))
        .await;
    None
}
