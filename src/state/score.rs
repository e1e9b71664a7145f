use super::AppState;
use crate::error::{SessionError, SessionResult};
use crate::session::SessionContext;
use crate::types::*;

impl AppState {
    /// Contestants ranked by score, ties broken by join order. The host is not listed.
    pub async fn scoreboard(&self, game_id: &str) -> Vec<ScoreEntry> {
        let mut contestants = self.contestants(game_id).await;
        // list_players is already in join order, so a stable sort keeps ties in it
        contestants.sort_by(|a, b| b.score.cmp(&a.score));
        contestants.iter().map(ScoreEntry::from).collect()
    }

    /// Host adjudication for rounds that are not scored from answer rows
    pub async fn award_points(
        &self,
        ctx: &SessionContext,
        player_id: &str,
        delta: i64,
    ) -> SessionResult<Player> {
        ctx.require_host("award points")?;

        let gate = self.game_gate(&ctx.game_id).await;
        let _status = gate.read().await;
        let game = self.get_game(&ctx.game_id).await?;
        if game.status != GameStatus::Playing {
            return Err(SessionError::precondition(format!(
                "Cannot award points while the game is {:?}",
                game.status
            )));
        }

        let target = self
            .store
            .get_player(player_id)
            .await
            .filter(|p| p.game_id == ctx.game_id && !p.is_host)
            .ok_or_else(|| SessionError::not_found(format!("Player {}", player_id)))?;

        let player = self.store.adjust_score(&target.id, delta).await?;
        tracing::info!(
            "Host awarded {} points to {} in {:?} (score {})",
            delta,
            player.name,
            game.current_round,
            player.score
        );
        Ok(player)
    }
}
