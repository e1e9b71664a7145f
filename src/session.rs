//! Per-participant session identity
//!
//! Created when a participant joins and passed explicitly to every operation,
//! so nothing reads "who am I" from process-wide state.

use crate::error::{SessionError, SessionResult};
use crate::types::{GameId, Player, PlayerId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionContext {
    pub game_id: GameId,
    pub game_code: String,
    pub player_id: PlayerId,
    pub is_host: bool,
}

impl SessionContext {
    pub fn for_player(player: &Player, game_code: &str) -> Self {
        Self {
            game_id: player.game_id.clone(),
            game_code: game_code.to_string(),
            player_id: player.id.clone(),
            is_host: player.is_host,
        }
    }

    /// Fail with `Unauthorized` unless this participant is the host
    pub fn require_host(&self, action: &str) -> SessionResult<()> {
        if self.is_host {
            Ok(())
        } else {
            Err(SessionError::Unauthorized(format!("Only host can {}", action)))
        }
    }

    /// Broadcast channel key for this participant's game
    pub fn channel(&self) -> String {
        channel_key(&self.game_id)
    }
}

/// Broadcast channel key for a game
pub fn channel_key(game_id: &str) -> String {
    format!("game:{}", game_id)
}
