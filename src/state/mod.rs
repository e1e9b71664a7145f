mod answer;
mod avatar;
mod completion;
mod connection;
mod game;
mod question;
mod score;
mod timer;

pub use answer::SubmitOutcome;
pub use game::JoinRequest;
pub use question::NewQuestion;
pub use timer::TimerWindow;

use crate::bus::BroadcastBus;
use crate::completion::CompletionLatch;
use crate::config::AppConfig;
use crate::protocol::SessionEvent;
use crate::session::channel_key;
use crate::store::Store;
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub bus: BroadcastBus,
    pub config: AppConfig,
    /// Latest countdown window per game
    pub timers: Arc<RwLock<HashMap<GameId, TimerWindow>>>,
    /// Rounds whose round-finished signal has already gone out
    pub finished_rounds: Arc<Mutex<CompletionLatch>>,
    /// One lock per (player, question) so a double submit cannot race the delta
    answer_locks: Arc<Mutex<HashMap<(PlayerId, QuestionId), Arc<Mutex<()>>>>>,
    /// Per-game status gate. Joins and score writes hold it shared, start and finish exclusive.
    game_gates: Arc<Mutex<HashMap<GameId, Arc<RwLock<()>>>>>,
    /// Open connections per player, per game
    presence: Arc<RwLock<HashMap<GameId, HashMap<PlayerId, usize>>>>,
    /// Resume token -> player
    resume_tokens: Arc<RwLock<HashMap<String, PlayerId>>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self {
            store: Store::new(),
            bus: BroadcastBus::new(config.bus_capacity),
            config,
            timers: Arc::new(RwLock::new(HashMap::new())),
            finished_rounds: Arc::new(Mutex::new(CompletionLatch::default())),
            answer_locks: Arc::new(Mutex::new(HashMap::new())),
            game_gates: Arc::new(Mutex::new(HashMap::new())),
            presence: Arc::new(RwLock::new(HashMap::new())),
            resume_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Status gate of one game, created on first use
    async fn game_gate(&self, game_id: &str) -> Arc<RwLock<()>> {
        self.game_gates
            .lock()
            .await
            .entry(game_id.to_string())
            .or_default()
            .clone()
    }

    /// Publish an event on a game's broadcast channel
    pub async fn publish(&self, game_id: &str, event: SessionEvent) -> usize {
        self.bus.publish(&channel_key(game_id), event).await
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
