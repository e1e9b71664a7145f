use super::AppState;
use crate::error::{SessionError, SessionResult};
use crate::session::SessionContext;
use crate::types::*;

/// Host input for a new question
#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub round: RoundKind,
    pub text: String,
    pub correct_answer: String,
    pub points: u32,
    pub order_index: u32,
    pub kind: QuestionType,
    pub options: Option<Vec<String>>,
    pub hint: Option<String>,
    pub media_url: Option<String>,
}

impl AppState {
    pub async fn add_question(
        &self,
        ctx: &SessionContext,
        input: NewQuestion,
    ) -> SessionResult<Question> {
        ctx.require_host("add questions")?;

        let game = self.get_game(&ctx.game_id).await?;
        if game.status == GameStatus::Finished {
            return Err(SessionError::precondition("Game has already finished"));
        }
        if input.text.trim().is_empty() {
            return Err(SessionError::InvalidInput(
                "Question text must not be empty".to_string(),
            ));
        }
        if let Some(options) = &input.options {
            if options.len() != MULTIPLE_CHOICE_OPTIONS {
                return Err(SessionError::InvalidInput(format!(
                    "Multiple-choice questions need exactly {} options, got {}",
                    MULTIPLE_CHOICE_OPTIONS,
                    options.len()
                )));
            }
            let expected = input.correct_answer.trim().to_lowercase();
            if !options.iter().any(|o| o.trim().to_lowercase() == expected) {
                return Err(SessionError::InvalidInput(
                    "Correct answer must be one of the options".to_string(),
                ));
            }
        }

        let question = Question {
            id: ulid::Ulid::new().to_string(),
            game_id: ctx.game_id.clone(),
            round: input.round,
            text: input.text,
            correct_answer: input.correct_answer,
            points: input.points,
            order_index: input.order_index,
            kind: input.kind,
            options: input.options,
            hint: input.hint,
            media_url: input.media_url,
        };

        let question = self.store.insert_question(question).await?;
        tracing::info!(
            "Added {} question #{} to game {}",
            question.round,
            question.order_index,
            game.code
        );
        Ok(question)
    }

    pub async fn list_questions(&self, game_id: &str, round: Option<RoundKind>) -> Vec<Question> {
        self.store.list_questions(game_id, round).await
    }
}
