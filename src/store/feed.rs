use crate::types::GameId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Game,
    Player,
    Question,
    Answer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
}

/// Row-level change notification, keyed by the owning game
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowChange {
    pub table: Table,
    pub op: ChangeOp,
    pub game_id: GameId,
    pub row_id: String,
}

/// Change notifications for one game.
///
/// Rows of other games are skipped. `Lagged` and `Closed` are passed through so
/// the consumer can fall back to a full re-fetch.
pub struct ChangeFeed {
    game_id: GameId,
    rx: broadcast::Receiver<RowChange>,
}

impl ChangeFeed {
    pub fn from_receiver(game_id: GameId, rx: broadcast::Receiver<RowChange>) -> Self {
        Self { game_id, rx }
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub async fn recv(&mut self) -> Result<RowChange, RecvError> {
        loop {
            let change = self.rx.recv().await?;
            if change.game_id == self.game_id {
                return Ok(change);
            }
        }
    }
}
