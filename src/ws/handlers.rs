//! WebSocket message dispatch
//!
//! This module provides the main entry point for handling client messages.
//! Session and host checks happen here, then dispatch goes to the player or
//! host handler modules.

use crate::error::SessionError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::SessionContext;
use crate::state::AppState;
use std::sync::Arc;

use super::{host, player};

/// Macro to fetch the caller's session and return early if it has not joined yet
macro_rules! require_session {
    ($session:expr) => {
        match $session.as_ref() {
            Some(ctx) => ctx.clone(),
            None => {
                return Some(ServerMessage::Error {
                    code: "NO_SESSION".to_string(),
                    msg: "Join a game first".to_string(),
                });
            }
        }
    };
}

/// Macro to check host authorization and return early if unauthorized
macro_rules! check_host {
    ($ctx:expr, $action:expr) => {
        if let Err(e) = $ctx.require_host($action) {
            return Some(ServerMessage::from(&e));
        }
    };
}

/// Turn an operation result into a reply
pub(crate) fn reply<T>(
    result: Result<T, SessionError>,
    ok: impl FnOnce(T) -> ServerMessage,
) -> Option<ServerMessage> {
    match result {
        Ok(value) => Some(ok(value)),
        Err(e) => {
            tracing::debug!("Request failed: {}", e);
            Some(ServerMessage::from(&e))
        }
    }
}

/// Handle client messages and return optional response.
///
/// `session` is empty until a create or join succeeds on this connection.
pub async fn handle_message(
    msg: ClientMessage,
    session: &mut Option<SessionContext>,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    match msg {
        // Connection messages
        ClientMessage::CreateGame {
            host_name,
            intro_videos,
        } => {
            if session.is_some() {
                return Some(already_joined());
            }
            player::handle_create_game(state, session, host_name, intro_videos).await
        }

        ClientMessage::Join {
            code,
            name,
            is_host,
            avatar,
        } => {
            if session.is_some() {
                return Some(already_joined());
            }
            player::handle_join(state, session, code, name, is_host, avatar).await
        }

        ClientMessage::Resume { token } => {
            if session.is_some() {
                return Some(already_joined());
            }
            player::handle_resume(state, session, token).await
        }

        ClientMessage::RequestState => {
            let ctx = require_session!(session);
            player::handle_request_state(state, &ctx).await
        }

        ClientMessage::GetQuestions { round } => {
            let ctx = require_session!(session);
            player::handle_get_questions(state, &ctx, round).await
        }

        ClientMessage::GetScoreboard => {
            let ctx = require_session!(session);
            player::handle_get_scoreboard(state, &ctx).await
        }

        // Player messages
        ClientMessage::ReserveAvatar { avatar } => {
            let ctx = require_session!(session);
            player::handle_reserve_avatar(state, &ctx, avatar).await
        }

        ClientMessage::SubmitAnswer {
            question_id,
            text,
            response_time,
        } => {
            let ctx = require_session!(session);
            player::handle_submit_answer(state, &ctx, question_id, text, response_time).await
        }

        ClientMessage::Signal { to, kind, payload } => {
            let ctx = require_session!(session);
            player::handle_signal(state, &ctx, to, kind, payload).await
        }

        ClientMessage::MicStatus { is_on } => {
            let ctx = require_session!(session);
            player::handle_mic_status(state, &ctx, is_on).await
        }

        // Host-only commands (authorization checked before dispatch)
        ClientMessage::HostStartGame => {
            let ctx = require_session!(session);
            check_host!(ctx, "start the game");
            host::handle_start_game(state, &ctx).await
        }

        ClientMessage::HostAdvanceRound { from_round } => {
            let ctx = require_session!(session);
            check_host!(ctx, "advance rounds");
            host::handle_advance_round(state, &ctx, from_round).await
        }

        ClientMessage::HostFinishGame => {
            let ctx = require_session!(session);
            check_host!(ctx, "finish the game");
            host::handle_finish_game(state, &ctx).await
        }

        ClientMessage::HostEndRound => {
            let ctx = require_session!(session);
            check_host!(ctx, "end the round");
            host::handle_end_round(state, &ctx).await
        }

        ClientMessage::HostStartTimer { duration_seconds } => {
            let ctx = require_session!(session);
            check_host!(ctx, "start the timer");
            host::handle_start_timer(state, &ctx, duration_seconds).await
        }

        ClientMessage::HostStopTimer => {
            let ctx = require_session!(session);
            check_host!(ctx, "stop the timer");
            host::handle_stop_timer(state, &ctx).await
        }

        ClientMessage::HostAddQuestion {
            round,
            text,
            correct_answer,
            points,
            order_index,
            kind,
            options,
            hint,
            media_url,
        } => {
            let ctx = require_session!(session);
            check_host!(ctx, "add questions");
            let input = crate::state::NewQuestion {
                round,
                text,
                correct_answer,
                points,
                order_index,
                kind,
                options,
                hint,
                media_url,
            };
            host::handle_add_question(state, &ctx, input).await
        }

        ClientMessage::HostSetIntroVideo { round, url } => {
            let ctx = require_session!(session);
            check_host!(ctx, "set intro videos");
            host::handle_set_intro_video(state, &ctx, round, url).await
        }

        ClientMessage::HostAwardPoints { player_id, delta } => {
            let ctx = require_session!(session);
            check_host!(ctx, "award points");
            host::handle_award_points(state, &ctx, player_id, delta).await
        }
    }
}

fn already_joined() -> ServerMessage {
    ServerMessage::Error {
        code: "ALREADY_JOINED".to_string(),
        msg: "This connection already belongs to a game".to_string(),
    }
}
