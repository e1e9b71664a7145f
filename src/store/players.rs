use super::{ChangeOp, Store, Table};
use crate::error::{SessionError, SessionResult};
use crate::types::*;
use std::sync::atomic::Ordering;

impl Store {
    /// Insert a player row.
    ///
    /// Within a game, names are unique (case-sensitive), avatars are unique and
    /// there is at most one host. `precheck` sees the game's current players and
    /// runs under the same write lock, so capacity rules cannot race either.
    pub async fn insert_player<F>(&self, mut player: Player, precheck: F) -> SessionResult<Player>
    where
        F: FnOnce(&[&Player]) -> SessionResult<()>,
    {
        let mut players = self.players.write().await;
        let existing: Vec<&Player> = players
            .values()
            .filter(|p| p.game_id == player.game_id)
            .collect();

        if existing.iter().any(|p| p.name == player.name) {
            return Err(SessionError::conflict(format!(
                "Name {:?} is already taken",
                player.name
            )));
        }
        if let Some(avatar) = &player.avatar {
            if existing.iter().any(|p| p.avatar.as_ref() == Some(avatar)) {
                return Err(SessionError::conflict(format!(
                    "Avatar {} is already taken",
                    avatar
                )));
            }
        }
        if player.is_host && existing.iter().any(|p| p.is_host) {
            return Err(SessionError::conflict("Game already has a host"));
        }
        precheck(&existing)?;

        player.join_seq = self.join_seq.fetch_add(1, Ordering::SeqCst);
        players.insert(player.id.clone(), player.clone());
        drop(players);

        self.notify(Table::Player, ChangeOp::Insert, &player.game_id, &player.id);
        Ok(player)
    }

    pub async fn get_player(&self, player_id: &str) -> Option<Player> {
        self.players.read().await.get(player_id).cloned()
    }

    /// All players of a game in join order
    pub async fn list_players(&self, game_id: &str) -> Vec<Player> {
        let mut players: Vec<Player> = self
            .players
            .read()
            .await
            .values()
            .filter(|p| p.game_id == game_id)
            .cloned()
            .collect();
        players.sort_by_key(|p| p.join_seq);
        players
    }

    /// Avatars already held by a player of the game
    pub async fn taken_avatars(&self, game_id: &str) -> Vec<AvatarRef> {
        self.list_players(game_id)
            .await
            .into_iter()
            .filter_map(|p| p.avatar)
            .collect()
    }

    /// Give an existing player an avatar, unique within the game
    pub async fn assign_avatar(&self, player_id: &str, avatar: &str) -> SessionResult<Player> {
        let mut players = self.players.write().await;
        let game_id = players
            .get(player_id)
            .map(|p| p.game_id.clone())
            .ok_or_else(|| SessionError::not_found(format!("Player {}", player_id)))?;

        let holder = players
            .values()
            .find(|p| p.game_id == game_id && p.avatar.as_deref() == Some(avatar));
        if let Some(holder) = holder {
            if holder.id == player_id {
                return Ok(holder.clone());
            }
            return Err(SessionError::conflict(format!(
                "Avatar {} is already taken",
                avatar
            )));
        }

        let player = players
            .get_mut(player_id)
            .ok_or_else(|| SessionError::not_found(format!("Player {}", player_id)))?;
        player.avatar = Some(avatar.to_string());
        let updated = player.clone();
        drop(players);

        self.notify(Table::Player, ChangeOp::Update, &game_id, player_id);
        Ok(updated)
    }

    /// Add `delta` to a player's score in one step
    pub async fn adjust_score(&self, player_id: &str, delta: i64) -> SessionResult<Player> {
        let mut players = self.players.write().await;
        let player = players
            .get_mut(player_id)
            .ok_or_else(|| SessionError::not_found(format!("Player {}", player_id)))?;
        player.score += delta;
        let updated = player.clone();
        drop(players);

        if delta != 0 {
            self.notify(Table::Player, ChangeOp::Update, &updated.game_id, player_id);
        }
        Ok(updated)
    }

    /// Write final positions for the given players
    pub async fn set_positions(&self, game_id: &str, positions: &[(PlayerId, u32)]) {
        let mut players = self.players.write().await;
        let mut touched = Vec::new();
        for (player_id, position) in positions {
            if let Some(player) = players.get_mut(player_id) {
                if player.game_id == game_id {
                    player.position = Some(*position);
                    touched.push(player_id.clone());
                }
            }
        }
        drop(players);

        for player_id in touched {
            self.notify(Table::Player, ChangeOp::Update, game_id, &player_id);
        }
    }
}
