use super::{ChangeOp, Store, Table};
use crate::error::{SessionError, SessionResult};
use crate::types::*;
use std::collections::HashSet;

impl Store {
    pub async fn insert_question(&self, question: Question) -> SessionResult<Question> {
        let mut questions = self.questions.write().await;
        if questions.contains_key(&question.id) {
            return Err(SessionError::conflict(format!(
                "Question {} already exists",
                question.id
            )));
        }
        questions.insert(question.id.clone(), question.clone());
        drop(questions);

        self.notify(
            Table::Question,
            ChangeOp::Insert,
            &question.game_id,
            &question.id,
        );
        Ok(question)
    }

    pub async fn get_question(&self, question_id: &str) -> Option<Question> {
        self.questions.read().await.get(question_id).cloned()
    }

    /// Questions of a game, optionally narrowed to one round, by `order_index`
    pub async fn list_questions(&self, game_id: &str, round: Option<RoundKind>) -> Vec<Question> {
        let mut questions: Vec<Question> = self
            .questions
            .read()
            .await
            .values()
            .filter(|q| q.game_id == game_id && round.map_or(true, |r| q.round == r))
            .cloned()
            .collect();
        questions.sort_by_key(|q| (q.round, q.order_index));
        questions
    }

    pub async fn find_answer(&self, player_id: &str, question_id: &str) -> Option<Answer> {
        self.answers
            .read()
            .await
            .values()
            .find(|a| a.player_id == player_id && a.question_id == question_id)
            .cloned()
    }

    /// Insert an answer. At most one row per (player, question).
    pub async fn insert_answer(&self, game_id: &str, answer: Answer) -> SessionResult<Answer> {
        let mut answers = self.answers.write().await;
        if answers
            .values()
            .any(|a| a.player_id == answer.player_id && a.question_id == answer.question_id)
        {
            return Err(SessionError::conflict(format!(
                "Player {} already answered question {}",
                answer.player_id, answer.question_id
            )));
        }
        answers.insert(answer.id.clone(), answer.clone());
        drop(answers);

        self.notify(Table::Answer, ChangeOp::Insert, game_id, &answer.id);
        Ok(answer)
    }

    /// Overwrite an existing answer row in place
    pub async fn update_answer(&self, game_id: &str, answer: Answer) -> SessionResult<Answer> {
        let mut answers = self.answers.write().await;
        let row = answers
            .get_mut(&answer.id)
            .ok_or_else(|| SessionError::not_found(format!("Answer {}", answer.id)))?;
        if row.player_id != answer.player_id || row.question_id != answer.question_id {
            return Err(SessionError::conflict(format!(
                "Answer {} belongs to another player or question",
                answer.id
            )));
        }
        *row = answer.clone();
        drop(answers);

        self.notify(Table::Answer, ChangeOp::Update, game_id, &answer.id);
        Ok(answer)
    }

    /// All answers given to the listed questions
    pub async fn answers_for_questions(&self, question_ids: &[QuestionId]) -> Vec<Answer> {
        let wanted: HashSet<&QuestionId> = question_ids.iter().collect();
        self.answers
            .read()
            .await
            .values()
            .filter(|a| wanted.contains(&a.question_id))
            .cloned()
            .collect()
    }
}
