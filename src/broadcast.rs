use crate::state::AppState;
use crate::types::now_millis;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Spawn a background task that closes expired countdown windows and ends
/// auto-completing rounds whose timer ran out
pub fn spawn_completion_watcher(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tick = state.config.tick_interval;
        loop {
            tokio::time::sleep(tick).await;
            sweep_expired_timers(&state, now_millis()).await;
        }
    })
}

/// One watcher pass. Returns how many rounds it finished.
pub async fn sweep_expired_timers(state: &AppState, now_ms: i64) -> usize {
    let mut finished = 0;
    for (game_id, event) in state.take_expired_timers(now_ms).await {
        let game = match state.get_game(&game_id).await {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!("Timer expired for missing game {}: {}", game_id, e);
                continue;
            }
        };

        let Some(round) = game.current_round else {
            continue;
        };
        if !round.auto_completes() {
            tracing::debug!(
                "Timer {} expired in game {} during {}, host decides the round",
                event.started_at_epoch_millis,
                game.code,
                round
            );
            continue;
        }

        match state.finish_round_once(&game_id, round).await {
            Ok(true) => {
                tracing::info!("Round {} in game {} ended on timeout", round, game.code);
                finished += 1;
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("Timeout completion for game {} failed: {}", game.code, e),
        }
    }
    finished
}
