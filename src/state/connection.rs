//! Connection bookkeeping
//!
//! Who currently has a socket open, and how a reconnecting client gets its
//! identity back. A player may hold several connections at once (a second tab,
//! or a reload that opens the new socket before the old one is torn down), so
//! presence counts connections and only announces the 0 <-> 1 transitions.

use super::AppState;
use crate::error::{SessionError, SessionResult};
use crate::protocol::{PresenceEvent, SessionEvent};
use crate::session::SessionContext;
use crate::types::*;
use std::collections::HashMap;

impl AppState {
    /// Token the client presents in `Resume`. Stable for the lifetime of the player.
    pub async fn resume_token(&self, player_id: &str) -> String {
        let mut tokens = self.resume_tokens.write().await;
        if let Some(token) = tokens
            .iter()
            .find(|(_, owner)| owner.as_str() == player_id)
            .map(|(token, _)| token.clone())
        {
            return token;
        }
        let token = ulid::Ulid::new().to_string();
        tokens.insert(token.clone(), player_id.to_string());
        token
    }

    /// Rebuild a session from a resume token
    pub async fn resume(&self, token: &str) -> SessionResult<(SessionContext, Player)> {
        let player_id = self
            .resume_tokens
            .read()
            .await
            .get(token.trim())
            .cloned()
            .ok_or_else(|| SessionError::Unauthorized("Unknown resume token".to_string()))?;

        let player = self
            .store
            .get_player(&player_id)
            .await
            .ok_or_else(|| SessionError::not_found(format!("Player {}", player_id)))?;
        let game = self.get_game(&player.game_id).await?;

        tracing::info!(
            "{} {} resumed in game {}",
            if player.is_host { "Host" } else { "Player" },
            player.name,
            game.code
        );
        Ok((SessionContext::for_player(&player, &game.code), player))
    }

    /// Players of a game with at least one open connection, in join order
    pub async fn connected_players(&self, game_id: &str) -> Vec<PlayerId> {
        let presence = self.presence.read().await;
        self.roster(game_id, presence.get(game_id)).await
    }

    /// Count an open connection for the caller
    pub async fn connect(&self, ctx: &SessionContext) {
        let mut presence = self.presence.write().await;
        let online = presence.entry(ctx.game_id.clone()).or_default();
        let count = online.entry(ctx.player_id.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            return;
        }

        tracing::info!("Player {} is online in game {}", ctx.player_id, ctx.game_code);
        let connected = self.roster(&ctx.game_id, presence.get(&ctx.game_id)).await;
        // Still under the presence lock so rosters go out in the order they changed
        self.publish(&ctx.game_id, SessionEvent::Presence(PresenceEvent { connected }))
            .await;
    }

    /// Release a connection counted by [`AppState::connect`]
    pub async fn disconnect(&self, ctx: &SessionContext) {
        let mut presence = self.presence.write().await;
        let Some(online) = presence.get_mut(&ctx.game_id) else {
            return;
        };
        match online.get_mut(&ctx.player_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                return;
            }
            Some(_) => {
                online.remove(&ctx.player_id);
            }
            None => return,
        }
        if online.is_empty() {
            presence.remove(&ctx.game_id);
        }

        tracing::info!("Player {} went offline in game {}", ctx.player_id, ctx.game_code);
        let connected = self.roster(&ctx.game_id, presence.get(&ctx.game_id)).await;
        self.publish(&ctx.game_id, SessionEvent::Presence(PresenceEvent { connected }))
            .await;
    }

    async fn roster(
        &self,
        game_id: &str,
        online: Option<&HashMap<PlayerId, usize>>,
    ) -> Vec<PlayerId> {
        let Some(online) = online else {
            return Vec::new();
        };
        self.store
            .list_players(game_id)
            .await
            .into_iter()
            .filter(|p| online.contains_key(&p.id))
            .map(|p| p.id)
            .collect()
    }
}
