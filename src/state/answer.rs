use super::AppState;
use crate::error::{SessionError, SessionResult};
use crate::session::SessionContext;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of a submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitOutcome {
    pub answer: Answer,
    /// True when an earlier answer to the same question was replaced
    pub overwritten: bool,
    /// Score change applied by this submission
    pub delta: i64,
    /// Player's score after the change
    pub score: i64,
}

impl AppState {
    /// Submit (or resubmit) an answer.
    ///
    /// One row per (player, question): a resubmission overwrites the row and
    /// moves the score by the difference in points, never by the full amount.
    pub async fn submit_answer(
        &self,
        ctx: &SessionContext,
        question_id: &str,
        text: String,
        response_time: Option<f64>,
    ) -> SessionResult<SubmitOutcome> {
        let question = self
            .store
            .get_question(question_id)
            .await
            .filter(|q| q.game_id == ctx.game_id)
            .ok_or_else(|| SessionError::not_found(format!("Question {}", question_id)))?;

        let player = self
            .store
            .get_player(&ctx.player_id)
            .await
            .ok_or_else(|| SessionError::not_found(format!("Player {}", ctx.player_id)))?;
        if player.is_host {
            return Err(SessionError::precondition("The host does not answer questions"));
        }

        let is_correct = question.is_correct(&text);
        let points_earned = if is_correct { question.points } else { 0 };

        // Shared hold on the game's status gate, so finish cannot rank players
        // between the status check and the score write
        let gate = self.game_gate(&ctx.game_id).await;
        let status = gate.read().await;
        let game = self.get_game(&ctx.game_id).await?;
        if game.status != GameStatus::Playing {
            return Err(SessionError::precondition(format!(
                "Answers are not accepted while the game is {:?}",
                game.status
            )));
        }

        let written = {
            let pair_lock = self.answer_lock(&player.id, &question.id).await;
            let _guard = pair_lock.lock().await;
            self.write_answer(&question, &player.id, text, is_correct, points_earned, response_time)
                .await
        };
        self.release_answer_lock(&player.id, &question.id).await;
        drop(status);
        let outcome = written?;

        tracing::info!(
            "Player {} answered {} question #{}: correct={} delta={} score={}{}",
            player.name,
            question.round,
            question.order_index,
            is_correct,
            outcome.delta,
            outcome.score,
            if outcome.overwritten { " (overwrite)" } else { "" }
        );

        if question.round.auto_completes() {
            // Answer is stored already, completion errors are only logged
            if let Err(e) = self
                .check_round_completion(&ctx.game_id, question.round)
                .await
            {
                tracing::warn!("Completion check for game {} failed: {}", ctx.game_id, e);
            }
        }

        Ok(outcome)
    }

    /// Upsert the answer row and apply the score delta. Caller holds the pair lock.
    async fn write_answer(
        &self,
        question: &Question,
        player_id: &str,
        text: String,
        is_correct: bool,
        points_earned: u32,
        response_time: Option<f64>,
    ) -> SessionResult<SubmitOutcome> {
        let now = chrono::Utc::now().to_rfc3339();

        let (answer, overwritten, delta) =
            match self.store.find_answer(player_id, &question.id).await {
                Some(existing) => {
                    let delta = i64::from(points_earned) - i64::from(existing.points_earned);
                    let updated = Answer {
                        answer_text: text,
                        is_correct,
                        points_earned,
                        response_time,
                        answered_at: now,
                        ..existing
                    };
                    let answer = self.store.update_answer(&question.game_id, updated).await?;
                    (answer, true, delta)
                }
                None => {
                    let answer = Answer {
                        id: ulid::Ulid::new().to_string(),
                        player_id: player_id.to_string(),
                        question_id: question.id.clone(),
                        answer_text: text,
                        is_correct,
                        points_earned,
                        response_time,
                        answered_at: now,
                    };
                    let answer = self.store.insert_answer(&question.game_id, answer).await?;
                    (answer, false, i64::from(points_earned))
                }
            };

        let player = self.store.adjust_score(player_id, delta).await?;

        Ok(SubmitOutcome {
            answer,
            overwritten,
            delta,
            score: player.score,
        })
    }

    async fn answer_lock(&self, player_id: &str, question_id: &str) -> Arc<Mutex<()>> {
        self.answer_locks
            .lock()
            .await
            .entry((player_id.to_string(), question_id.to_string()))
            .or_default()
            .clone()
    }

    /// Drop the pair lock once nobody else is waiting on it
    async fn release_answer_lock(&self, player_id: &str, question_id: &str) {
        let mut locks = self.answer_locks.lock().await;
        let key = (player_id.to_string(), question_id.to_string());
        if locks.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&key);
        }
    }
}
