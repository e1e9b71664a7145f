use super::AppState;
use crate::error::{SessionError, SessionResult};
use crate::protocol::{SessionEvent, TimerEvent};
use crate::session::SessionContext;
use crate::types::*;
use rand::Rng;
use std::collections::HashMap;

/// Safe character set for join codes (excludes 0/O, 1/I/L to avoid confusion)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 6;
const CODE_ATTEMPTS: usize = 32;

fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub code: String,
    pub name: String,
    pub is_host: bool,
    pub avatar: Option<AvatarRef>,
}

impl AppState {
    /// Create a waiting game with a fresh join code
    pub async fn create_game(
        &self,
        intro_videos: HashMap<RoundKind, String>,
    ) -> SessionResult<Game> {
        let now = chrono::Utc::now().to_rfc3339();
        for _ in 0..CODE_ATTEMPTS {
            let game = Game {
                id: ulid::Ulid::new().to_string(),
                code: generate_code(),
                version: 1,
                status: GameStatus::Waiting,
                current_round: Some(RoundKind::first()),
                intro_videos: intro_videos.clone(),
                created_at: now.clone(),
                updated_at: now.clone(),
            };
            match self.store.insert_game(game).await {
                Ok(game) => {
                    tracing::info!("Created game {} with code {}", game.id, game.code);
                    return Ok(game);
                }
                // Code collision, roll again
                Err(SessionError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(SessionError::conflict("Could not allocate a unique game code"))
    }

    pub async fn get_game(&self, game_id: &str) -> SessionResult<Game> {
        self.store
            .get_game(game_id)
            .await
            .ok_or_else(|| SessionError::not_found(format!("Game {}", game_id)))
    }

    /// Join a game by code.
    ///
    /// Contestants may only join while the game is waiting and while fewer than
    /// four contestants are present. The host may join until the game finishes.
    /// Names are stored and compared exactly as entered.
    pub async fn join_player(&self, req: JoinRequest) -> SessionResult<(SessionContext, Player)> {
        if req.name.trim().is_empty() {
            return Err(SessionError::InvalidInput("Name must not be empty".to_string()));
        }
        let name = req.name;

        let found = self
            .store
            .find_game_by_code(&req.code)
            .await
            .ok_or_else(|| SessionError::not_found(format!("Game with code {}", req.code)))?;

        // Held until the row is in, so start cannot slip between check and insert
        let gate = self.game_gate(&found.id).await;
        let _status = gate.read().await;
        let game = self.get_game(&found.id).await?;

        match (req.is_host, game.status) {
            (_, GameStatus::Finished) => {
                return Err(SessionError::precondition("Game has already finished"));
            }
            (false, GameStatus::Playing) => {
                return Err(SessionError::precondition("Game has already started"));
            }
            _ => {}
        }

        if let Some(avatar) = &req.avatar {
            if req.is_host {
                return Err(SessionError::InvalidInput(
                    "The host does not take an avatar".to_string(),
                ));
            }
            self.ensure_avatar_free(&game.id, avatar).await?;
        }

        let player = Player {
            id: ulid::Ulid::new().to_string(),
            game_id: game.id.clone(),
            name,
            score: 0,
            is_host: req.is_host,
            avatar: req.avatar,
            position: None,
            join_seq: 0,
            joined_at: chrono::Utc::now().to_rfc3339(),
        };

        let is_host = player.is_host;
        let player = self
            .store
            .insert_player(player, |existing| {
                let contestants = existing.iter().filter(|p| !p.is_host).count();
                if !is_host && contestants >= MAX_CONTESTANTS {
                    return Err(SessionError::precondition(format!(
                        "Game is full ({} contestants)",
                        MAX_CONTESTANTS
                    )));
                }
                Ok(())
            })
            .await?;

        tracing::info!(
            "{} {} joined game {} (avatar: {:?})",
            if player.is_host { "Host" } else { "Player" },
            player.name,
            game.code,
            player.avatar
        );

        Ok((SessionContext::for_player(&player, &game.code), player))
    }

    /// Contestants of a game (everyone but the host) in join order
    pub async fn contestants(&self, game_id: &str) -> Vec<Player> {
        self.store
            .list_players(game_id)
            .await
            .into_iter()
            .filter(|p| !p.is_host)
            .collect()
    }

    /// waiting -> playing, needs at least two contestants
    pub async fn start_game(&self, ctx: &SessionContext) -> SessionResult<Game> {
        ctx.require_host("start the game")?;

        let gate = self.game_gate(&ctx.game_id).await;
        let _exclusive = gate.write().await;
        let contestants = self.contestants(&ctx.game_id).await.len();
        let game = self
            .store
            .update_game(&ctx.game_id, |g| {
                if g.status != GameStatus::Waiting {
                    return Err(SessionError::precondition(format!(
                        "Cannot start a game that is {:?}",
                        g.status
                    )));
                }
                if contestants < MIN_CONTESTANTS {
                    return Err(SessionError::precondition(format!(
                        "Need at least {} players to start, have {}",
                        MIN_CONTESTANTS, contestants
                    )));
                }
                g.status = GameStatus::Playing;
                g.current_round = Some(RoundKind::first());
                Ok(())
            })
            .await?;

        tracing::info!(
            "Game {} started with {} contestants",
            game.code,
            contestants
        );
        Ok(game)
    }

    /// Move from `from_round` to the next round. `from_round` must be the
    /// current round, so a repeated or delayed request cannot skip a round.
    pub async fn advance_round(
        &self,
        ctx: &SessionContext,
        from_round: RoundKind,
    ) -> SessionResult<Game> {
        ctx.require_host("advance rounds")?;

        let game = self
            .store
            .update_game(&ctx.game_id, |g| {
                if g.status != GameStatus::Playing {
                    return Err(SessionError::precondition(format!(
                        "Cannot advance rounds while the game is {:?}",
                        g.status
                    )));
                }
                if g.current_round != Some(from_round) {
                    return Err(SessionError::precondition(format!(
                        "Current round is {:?}, not {}",
                        g.current_round, from_round
                    )));
                }
                let next = from_round.next().ok_or_else(|| {
                    SessionError::precondition(format!("{} is the final round", from_round))
                })?;
                g.current_round = Some(next);
                Ok(())
            })
            .await?;

        self.close_timer_window(&ctx.game_id).await;

        tracing::info!(
            "Game {} advanced from {} to {:?}",
            game.code,
            from_round,
            game.current_round
        );
        Ok(game)
    }

    /// playing -> finished, assigning positions by score (ties by join order)
    pub async fn finish_game(&self, ctx: &SessionContext) -> SessionResult<Vec<ScoreEntry>> {
        ctx.require_host("finish the game")?;

        let gate = self.game_gate(&ctx.game_id).await;
        let _exclusive = gate.write().await;
        let game = self
            .store
            .update_game(&ctx.game_id, |g| {
                if g.status != GameStatus::Playing {
                    return Err(SessionError::precondition(format!(
                        "Cannot finish a game that is {:?}",
                        g.status
                    )));
                }
                g.status = GameStatus::Finished;
                Ok(())
            })
            .await?;

        self.close_timer_window(&ctx.game_id).await;

        // Score writes wait on the gate and then see a finished game
        let ranked = self.scoreboard(&ctx.game_id).await;
        let positions: Vec<(PlayerId, u32)> = ranked
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.player_id.clone(), idx as u32 + 1))
            .collect();
        self.store.set_positions(&ctx.game_id, &positions).await;

        self.timers.write().await.remove(&ctx.game_id);
        self.finished_rounds.lock().await.forget_game(&ctx.game_id);
        self.game_gates.lock().await.remove(&ctx.game_id);

        tracing::info!("Game {} finished", game.code);
        Ok(self.scoreboard(&ctx.game_id).await)
    }

    /// Set or replace a round's intro video
    pub async fn set_intro_video(
        &self,
        ctx: &SessionContext,
        round: RoundKind,
        url: String,
    ) -> SessionResult<Game> {
        ctx.require_host("set intro videos")?;
        let url = url.trim().to_string();
        if url.is_empty() {
            return Err(SessionError::InvalidInput("Video URL must not be empty".to_string()));
        }

        self.store
            .update_game(&ctx.game_id, |g| {
                if g.status == GameStatus::Finished {
                    return Err(SessionError::precondition("Game has already finished"));
                }
                g.intro_videos.insert(round, url);
                Ok(())
            })
            .await
    }

    /// Cancel any open countdown and tell clients to close their windows
    async fn close_timer_window(&self, game_id: &str) {
        let closed = {
            let mut timers = self.timers.write().await;
            match timers.get_mut(game_id) {
                Some(window) if window.open => {
                    window.open = false;
                    Some(window.event.started_at_epoch_millis)
                }
                _ => None,
            }
        };
        if let Some(signature) = closed {
            self.publish(game_id, SessionEvent::Timer(TimerEvent::stop(signature)))
                .await;
        }
    }
}
