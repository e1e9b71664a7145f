use super::AppState;
use crate::error::{SessionError, SessionResult};
use crate::protocol::{RoundFinishedEvent, SessionEvent};
use crate::session::SessionContext;
use crate::types::*;

impl AppState {
    /// True when every contestant has an answer row for every question of the round.
    ///
    /// A round without questions (or a game without contestants) is never
    /// complete by answers; the host ends it by hand.
    pub async fn is_round_complete(&self, game_id: &str, round: RoundKind) -> bool {
        let questions = self.store.list_questions(game_id, Some(round)).await;
        let contestants = self.contestants(game_id).await;
        if questions.is_empty() || contestants.is_empty() {
            return false;
        }

        let question_ids: Vec<QuestionId> = questions.into_iter().map(|q| q.id).collect();
        let answers = self.store.answers_for_questions(&question_ids).await;

        contestants.iter().all(|player| {
            question_ids.iter().all(|qid| {
                answers
                    .iter()
                    .any(|a| a.player_id == player.id && &a.question_id == qid)
            })
        })
    }

    /// Finish the round if it is complete. Returns whether this call sent the signal.
    pub async fn check_round_completion(
        &self,
        game_id: &str,
        round: RoundKind,
    ) -> SessionResult<bool> {
        if !self.is_round_complete(game_id, round).await {
            return Ok(false);
        }
        self.finish_round_once(game_id, round).await
    }

    /// Publish round-finished for the game's current round, at most once per round
    pub async fn finish_round_once(&self, game_id: &str, round: RoundKind) -> SessionResult<bool> {
        let gate = self.game_gate(game_id).await;
        let _status = gate.read().await;
        let game = self.get_game(game_id).await?;
        if game.status != GameStatus::Playing || game.current_round != Some(round) {
            tracing::debug!(
                "Not finishing {} in game {}: status {:?}, current {:?}",
                round,
                game.code,
                game.status,
                game.current_round
            );
            return Ok(false);
        }

        if !self.finished_rounds.lock().await.try_fire(game_id, round) {
            return Ok(false);
        }

        let receivers = self
            .publish(game_id, SessionEvent::RoundFinished(RoundFinishedEvent { round }))
            .await;
        tracing::info!(
            "Round {} finished in game {} ({} receivers)",
            round,
            game.code,
            receivers
        );
        Ok(true)
    }

    /// Host ends the current round by hand
    pub async fn end_round(&self, ctx: &SessionContext) -> SessionResult<bool> {
        ctx.require_host("end the round")?;
        let game = self.get_game(&ctx.game_id).await?;
        let round = game
            .current_round
            .filter(|_| game.status == GameStatus::Playing)
            .ok_or_else(|| SessionError::precondition("No round is in progress"))?;
        self.finish_round_once(&ctx.game_id, round).await
    }
}
