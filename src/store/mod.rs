//! In-memory data store
//!
//! Durable-row semantics for games, players, questions and answers with
//! equality lookups, uniqueness constraints checked under the table's write
//! lock, and a change feed filterable by game.

mod content;
mod feed;
mod players;

pub use feed::{ChangeFeed, ChangeOp, RowChange, Table};

use crate::error::{SessionError, SessionResult};
use crate::types::*;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const FEED_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Store {
    games: Arc<RwLock<HashMap<GameId, Game>>>,
    players: Arc<RwLock<HashMap<PlayerId, Player>>>,
    questions: Arc<RwLock<HashMap<QuestionId, Question>>>,
    answers: Arc<RwLock<HashMap<AnswerId, Answer>>>,
    join_seq: Arc<AtomicU64>,
    feed: broadcast::Sender<RowChange>,
}

impl Store {
    pub fn new() -> Self {
        let (feed, _rx) = broadcast::channel(FEED_CAPACITY);
        Self {
            games: Arc::new(RwLock::new(HashMap::new())),
            players: Arc::new(RwLock::new(HashMap::new())),
            questions: Arc::new(RwLock::new(HashMap::new())),
            answers: Arc::new(RwLock::new(HashMap::new())),
            join_seq: Arc::new(AtomicU64::new(0)),
            feed,
        }
    }

    /// Subscribe to row changes of one game
    pub fn subscribe(&self, game_id: &str) -> ChangeFeed {
        ChangeFeed::from_receiver(game_id.to_string(), self.feed.subscribe())
    }

    fn notify(&self, table: Table, op: ChangeOp, game_id: &str, row_id: &str) {
        // No subscribers is fine
        let _ = self.feed.send(RowChange {
            table,
            op,
            game_id: game_id.to_string(),
            row_id: row_id.to_string(),
        });
    }

    /// Insert a game. Codes are unique case-insensitively.
    pub async fn insert_game(&self, mut game: Game) -> SessionResult<Game> {
        game.code = game.code.to_uppercase();
        let mut games = self.games.write().await;
        if games.values().any(|g| g.code == game.code) {
            return Err(SessionError::conflict(format!(
                "Game code {} already in use",
                game.code
            )));
        }
        games.insert(game.id.clone(), game.clone());
        drop(games);

        self.notify(Table::Game, ChangeOp::Insert, &game.id, &game.id);
        Ok(game)
    }

    pub async fn get_game(&self, game_id: &str) -> Option<Game> {
        self.games.read().await.get(game_id).cloned()
    }

    pub async fn find_game_by_code(&self, code: &str) -> Option<Game> {
        let code = code.trim().to_uppercase();
        self.games
            .read()
            .await
            .values()
            .find(|g| g.code == code)
            .cloned()
    }

    /// Check-and-set on a game row.
    ///
    /// `apply` runs under the write lock and may reject the change; on success
    /// the version is bumped and subscribers are notified.
    pub async fn update_game<F>(&self, game_id: &str, apply: F) -> SessionResult<Game>
    where
        F: FnOnce(&mut Game) -> SessionResult<()>,
    {
        let mut games = self.games.write().await;
        let game = games
            .get_mut(game_id)
            .ok_or_else(|| SessionError::not_found(format!("Game {}", game_id)))?;

        let mut draft = game.clone();
        apply(&mut draft)?;
        draft.version += 1;
        draft.updated_at = chrono::Utc::now().to_rfc3339();
        *game = draft.clone();
        drop(games);

        self.notify(Table::Game, ChangeOp::Update, game_id, game_id);
        Ok(draft)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn sample_game(code: &str) -> Game {
        let now = chrono::Utc::now().to_rfc3339();
        Game {
            id: ulid::Ulid::new().to_string(),
            code: code.to_string(),
            version: 1,
            status: GameStatus::Waiting,
            current_round: Some(RoundKind::first()),
            intro_videos: HashMap::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_game_code_unique_case_insensitive() {
        let store = Store::new();
        let game = store.insert_game(sample_game("abc123")).await.unwrap();
        assert_eq!(game.code, "ABC123");

        let result = store.insert_game(sample_game("ABC123")).await;
        assert!(matches!(result, Err(SessionError::Conflict(_))));

        let found = store.find_game_by_code(" abc123 ").await;
        assert_eq!(found.map(|g| g.id), Some(game.id));
    }

    #[tokio::test]
    async fn test_update_game_rejected_leaves_row_untouched() {
        let store = Store::new();
        let game = store.insert_game(sample_game("ZZZZZZ")).await.unwrap();

        let result = store
            .update_game(&game.id, |g| {
                g.status = GameStatus::Finished;
                Err(SessionError::precondition("nope"))
            })
            .await;
        assert!(result.is_err());

        let stored = store.get_game(&game.id).await.unwrap();
        assert_eq!(stored.status, GameStatus::Waiting);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_update_missing_game() {
        let store = Store::new();
        let result = store.update_game("missing", |_| Ok(())).await;
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_feed_filters_by_game() {
        let store = Store::new();
        let game_a = store.insert_game(sample_game("AAAAAA")).await.unwrap();
        let game_b = store.insert_game(sample_game("BBBBBB")).await.unwrap();

        let mut feed = store.subscribe(&game_b.id);
        store
            .update_game(&game_a.id, |g| {
                g.status = GameStatus::Playing;
                Ok(())
            })
            .await
            .unwrap();
        store
            .update_game(&game_b.id, |g| {
                g.status = GameStatus::Playing;
                Ok(())
            })
            .await
            .unwrap();

        let change = feed.recv().await.unwrap();
        assert_eq!(change.game_id, game_b.id);
        assert_eq!(change.table, Table::Game);
        assert_eq!(change.op, ChangeOp::Update);
    }
}
