use super::AppState;
use crate::error::{SessionError, SessionResult};
use crate::protocol::{SessionEvent, TimerEvent};
use crate::session::SessionContext;
use crate::types::*;

/// Server-side record of a game's latest countdown
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerWindow {
    pub event: TimerEvent,
    /// Cleared by a stop, a round change, or expiry
    pub open: bool,
}

impl AppState {
    /// Open a countdown window and broadcast it.
    ///
    /// Each start gets a signature strictly greater than the game's previous
    /// one, so clients can tell a new window from a duplicated message.
    pub async fn start_timer(
        &self,
        ctx: &SessionContext,
        duration_seconds: u32,
    ) -> SessionResult<TimerEvent> {
        ctx.require_host("start the timer")?;
        if duration_seconds == 0 {
            return Err(SessionError::InvalidInput(
                "Timer duration must be positive".to_string(),
            ));
        }
        let gate = self.game_gate(&ctx.game_id).await;
        let _status = gate.read().await;
        let game = self.get_game(&ctx.game_id).await?;
        if game.status != GameStatus::Playing {
            return Err(SessionError::precondition(
                "Timers only run while the game is playing",
            ));
        }

        let event = {
            let mut timers = self.timers.write().await;
            let mut signature = now_millis();
            if let Some(previous) = timers.get(&ctx.game_id) {
                signature = signature.max(previous.event.started_at_epoch_millis + 1);
            }
            let event = TimerEvent::start(duration_seconds, signature);
            timers.insert(ctx.game_id.clone(), TimerWindow { event, open: true });
            event
        };

        let receivers = self.publish(&ctx.game_id, SessionEvent::Timer(event)).await;
        tracing::info!(
            "Timer started in game {} for {}s (signature {}, {} receivers)",
            game.code,
            duration_seconds,
            event.started_at_epoch_millis,
            receivers
        );
        Ok(event)
    }

    /// Cancel the open countdown window
    pub async fn stop_timer(&self, ctx: &SessionContext) -> SessionResult<TimerEvent> {
        ctx.require_host("stop the timer")?;

        let signature = {
            let mut timers = self.timers.write().await;
            match timers.get_mut(&ctx.game_id) {
                Some(window) if window.open => {
                    window.open = false;
                    window.event.started_at_epoch_millis
                }
                _ => return Err(SessionError::precondition("No timer is running")),
            }
        };

        let event = TimerEvent::stop(signature);
        self.publish(&ctx.game_id, SessionEvent::Timer(event)).await;
        tracing::info!("Timer {} stopped in game {}", signature, ctx.game_id);
        Ok(event)
    }

    /// The game's open countdown, if any
    pub async fn active_timer(&self, game_id: &str) -> Option<TimerEvent> {
        self.timers
            .read()
            .await
            .get(game_id)
            .filter(|w| w.open)
            .map(|w| w.event)
    }

    /// Close and return every open window whose end has passed
    pub async fn take_expired_timers(&self, now_ms: i64) -> Vec<(GameId, TimerEvent)> {
        let mut timers = self.timers.write().await;
        timers
            .iter_mut()
            .filter(|(_, w)| w.open && w.event.end_at() <= now_ms)
            .map(|(game_id, w)| {
                w.open = false;
                (game_id.clone(), w.event)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TimerKind;
    use crate::state::test_support::{lobby, playing};

    #[tokio::test]
    async fn test_start_and_stop_broadcast() {
        let state = AppState::new();
        let (host, _) = playing(&state, &["A", "B"]).await;
        let mut rx = state.bus.subscribe(&host.channel()).await;

        let start = state.start_timer(&host, 30).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Timer(start));
        assert_eq!(state.active_timer(&host.game_id).await, Some(start));

        let stop = state.stop_timer(&host).await.unwrap();
        assert_eq!(stop.kind, TimerKind::Stop);
        assert_eq!(stop.started_at_epoch_millis, start.started_at_epoch_millis);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Timer(stop));
        assert_eq!(state.active_timer(&host.game_id).await, None);

        let again = state.stop_timer(&host).await;
        assert!(matches!(again, Err(SessionError::PreconditionFailed(_))));
    }

    #[tokio::test]
    async fn test_signatures_strictly_increase() {
        let state = AppState::new();
        let (host, _) = playing(&state, &["A", "B"]).await;

        let mut last = 0;
        for _ in 0..5 {
            let event = state.start_timer(&host, 5).await.unwrap();
            assert!(event.started_at_epoch_millis > last);
            last = event.started_at_epoch_millis;
        }
    }

    #[tokio::test]
    async fn test_timer_rules() {
        let state = AppState::new();
        let (host, players) = lobby(&state, &["A", "B"]).await;

        let result = state.start_timer(&host, 10).await;
        assert!(matches!(result, Err(SessionError::PreconditionFailed(_))));

        state.start_game(&host).await.unwrap();
        let result = state.start_timer(&players[0], 10).await;
        assert!(matches!(result, Err(SessionError::Unauthorized(_))));
        let result = state.start_timer(&host, 0).await;
        assert!(matches!(result, Err(SessionError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_take_expired_timers() {
        let state = AppState::new();
        let (host, _) = playing(&state, &["A", "B"]).await;
        let event = state.start_timer(&host, 10).await.unwrap();

        assert!(state.take_expired_timers(event.end_at() - 1).await.is_empty());

        let expired = state.take_expired_timers(event.end_at()).await;
        assert_eq!(expired, vec![(host.game_id.clone(), event)]);
        // Reported once
        assert!(state.take_expired_timers(event.end_at() + 5000).await.is_empty());
    }

    #[tokio::test]
    async fn test_advance_round_stops_timer() {
        let state = AppState::new();
        let (host, _) = playing(&state, &["A", "B"]).await;
        let mut rx = state.bus.subscribe(&host.channel()).await;

        let start = state.start_timer(&host, 60).await.unwrap();
        state.advance_round(&host, RoundKind::KhoiDong).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Timer(start));
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Timer(TimerEvent::stop(start.started_at_epoch_millis))
        );
        assert_eq!(state.active_timer(&host.game_id).await, None);
    }
}
