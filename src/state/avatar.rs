//! Avatar reservation
//!
//! Clients watch the taken set and grey out used avatars, then the server
//! re-reads the set right before writing. Both are best effort; the store's
//! per-game uniqueness check on the write itself is what makes a lost race
//! come back as `Conflict` instead of a double assignment.

use super::AppState;
use crate::error::{SessionError, SessionResult};
use crate::session::SessionContext;
use crate::types::*;

impl AppState {
    /// Avatars currently held in a game
    pub async fn taken_avatars(&self, game_id: &str) -> Vec<AvatarRef> {
        self.store.taken_avatars(game_id).await
    }

    /// Avatars still free in a game, in display order
    pub async fn free_avatars(&self, game_id: &str) -> Vec<AvatarRef> {
        let taken = self.taken_avatars(game_id).await;
        AVATARS
            .iter()
            .filter(|a| !taken.iter().any(|t| t == *a))
            .map(|a| a.to_string())
            .collect()
    }

    /// Re-read the taken set just before a write
    pub(super) async fn ensure_avatar_free(&self, game_id: &str, avatar: &str) -> SessionResult<()> {
        if !is_known_avatar(avatar) {
            return Err(SessionError::InvalidInput(format!("Unknown avatar {}", avatar)));
        }
        if self.taken_avatars(game_id).await.iter().any(|a| a == avatar) {
            return Err(SessionError::conflict(format!(
                "Avatar {} was taken, pick another",
                avatar
            )));
        }
        Ok(())
    }

    /// Reserve an avatar for a contestant who joined without one (or wants to switch)
    pub async fn reserve_avatar(&self, ctx: &SessionContext, avatar: &str) -> SessionResult<Player> {
        if ctx.is_host {
            return Err(SessionError::InvalidInput(
                "The host does not take an avatar".to_string(),
            ));
        }
        let game = self.get_game(&ctx.game_id).await?;
        if game.status != GameStatus::Waiting {
            return Err(SessionError::precondition(
                "Avatars can only be chosen before the game starts",
            ));
        }

        self.ensure_avatar_free(&ctx.game_id, avatar).await?;
        let player = self.store.assign_avatar(&ctx.player_id, avatar).await?;

        tracing::info!(
            "Player {} reserved {} in game {}",
            player.name,
            avatar,
            game.code
        );
        Ok(player)
    }
}
