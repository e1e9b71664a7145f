//! Reliable views
//!
//! A live change feed can stall or drop without telling anyone, so every view
//! driven by it also re-fetches on a fixed period. A change notification only
//! triggers the re-fetch early; the fetched snapshot is always what gets
//! published, which keeps a late or reordered bus event from overriding a
//! fresher store read.

use crate::error::{SessionError, SessionResult};
use crate::state::AppState;
use crate::store::{ChangeFeed, RowChange};
use crate::types::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Something a view can re-read in full
#[async_trait]
pub trait ViewSource: Send + Sync + 'static {
    type Snapshot: Clone + PartialEq + Send + Sync + 'static;

    async fn fetch(&self) -> SessionResult<Self::Snapshot>;
}

pub struct ReliableView<T> {
    rx: watch::Receiver<Option<T>>,
    degraded: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ReliableView<T> {
    /// Start the refresh task. The first fetch happens immediately.
    pub fn spawn<S>(source: S, feed: ChangeFeed, poll_interval: Duration) -> Self
    where
        S: ViewSource<Snapshot = T>,
    {
        let (tx, rx) = watch::channel(None);
        let degraded = Arc::new(AtomicBool::new(false));
        let flag = degraded.clone();

        let handle = tokio::spawn(async move {
            let game_id = feed.game_id().to_string();
            let mut feed = Some(feed);
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    change = next_change(&mut feed) => match change {
                        Ok(change) => {
                            tracing::trace!("View of {} refreshing on {:?}", game_id, change.table);
                        }
                        Err(RecvError::Lagged(n)) => {
                            let err = SessionError::TransportDegraded(format!(
                                "change feed for {} skipped {} notifications",
                                game_id, n
                            ));
                            tracing::warn!("{}", err);
                        }
                        Err(RecvError::Closed) => {
                            let err = SessionError::TransportDegraded(format!(
                                "change feed for {} closed, polling only",
                                game_id
                            ));
                            tracing::warn!("{}", err);
                            flag.store(true, Ordering::Relaxed);
                            feed = None;
                        }
                    },
                    _ = interval.tick() => {}
                    _ = tx.closed() => break,
                }

                match source.fetch().await {
                    Ok(snapshot) => {
                        tx.send_if_modified(|current| {
                            if current.as_ref() == Some(&snapshot) {
                                false
                            } else {
                                *current = Some(snapshot);
                                true
                            }
                        });
                    }
                    Err(e) => tracing::warn!("View fetch for {} failed: {}", game_id, e),
                }
            }
        });

        Self {
            rx,
            degraded,
            handle,
        }
    }

    /// Receiver that wakes on every changed snapshot
    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.rx.clone()
    }

    pub fn current(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    /// True once the change feed is gone and only polling keeps the view fresh
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }
}

impl<T> Drop for ReliableView<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn next_change(feed: &mut Option<ChangeFeed>) -> Result<RowChange, RecvError> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

/// Lobby and in-game view of one game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub game: Game,
    pub players: Vec<Player>,
    pub taken_avatars: Vec<AvatarRef>,
    /// Players with an open connection, in join order
    pub connected: Vec<PlayerId>,
}

impl AppState {
    pub async fn game_snapshot(&self, game_id: &str) -> SessionResult<GameSnapshot> {
        let game = self.get_game(game_id).await?;
        let players = self.store.list_players(game_id).await;
        let taken_avatars = self.taken_avatars(game_id).await;
        let connected = self.connected_players(game_id).await;
        Ok(GameSnapshot {
            game,
            players,
            taken_avatars,
            connected,
        })
    }

    /// Reliable view of a game, fed by the store's change feed
    pub fn watch_game(&self, game_id: &str) -> ReliableView<GameSnapshot> {
        let source = GameSnapshotSource {
            state: self.clone(),
            game_id: game_id.to_string(),
        };
        ReliableView::spawn(
            source,
            self.store.subscribe(game_id),
            self.config.poll_interval,
        )
    }
}

pub struct GameSnapshotSource {
    state: AppState,
    game_id: GameId,
}

#[async_trait]
impl ViewSource for GameSnapshotSource {
    type Snapshot = GameSnapshot;

    async fn fetch(&self) -> SessionResult<GameSnapshot> {
        self.state.game_snapshot(&self.game_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::lobby;
    use crate::session::SessionContext;
    use crate::state::JoinRequest;
    use tokio::sync::broadcast;
    use tokio::time::Instant;

    async fn join(state: &AppState, code: &str, name: &str) {
        state
            .join_player(JoinRequest {
                code: code.to_string(),
                name: name.to_string(),
                is_host: false,
                avatar: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_feed_refreshes_before_poll() {
        let state = AppState::new();
        let (host, _) = lobby(&state, &["A"]).await;
        let poll = Duration::from_secs(60);
        let source = GameSnapshotSource {
            state: state.clone(),
            game_id: host.game_id.clone(),
        };
        let view = ReliableView::spawn(source, state.store.subscribe(&host.game_id), poll);
        let mut rx = view.subscribe();
        rx.wait_for(|s| s.as_ref().is_some_and(|s| s.players.len() == 2))
            .await
            .unwrap();

        let started = Instant::now();
        join(&state, &host.game_code, "B").await;
        rx.wait_for(|s| s.as_ref().is_some_and(|s| s.players.len() == 3))
            .await
            .unwrap();
        assert!(started.elapsed() < poll);
        assert!(!view.is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_feed_converges_by_polling() {
        let state = AppState::new();
        let (host, _) = lobby(&state, &["A"]).await;

        // A feed whose sender is already gone behaves like a dead subscription
        let (tx, rx) = broadcast::channel(4);
        drop(tx);
        let feed = ChangeFeed::from_receiver(host.game_id.clone(), rx);
        let source = GameSnapshotSource {
            state: state.clone(),
            game_id: host.game_id.clone(),
        };
        let poll = Duration::from_millis(1000);
        let view = ReliableView::spawn(source, feed, poll);
        let mut snapshots = view.subscribe();
        snapshots.wait_for(|s| s.is_some()).await.unwrap();

        join(&state, &host.game_code, "B").await;
        let b = context_for(&state, &host.game_id, "B").await;
        state.reserve_avatar(&b, "avatar_2").await.unwrap();

        let started = Instant::now();
        snapshots
            .wait_for(|s| {
                s.as_ref()
                    .is_some_and(|s| s.taken_avatars == vec!["avatar_2".to_string()])
            })
            .await
            .unwrap();
        assert!(started.elapsed() <= poll);
        assert!(view.is_degraded());
    }

    async fn context_for(
        state: &AppState,
        game_id: &str,
        name: &str,
    ) -> SessionContext {
        let game = state.get_game(game_id).await.unwrap();
        let player = state
            .store
            .list_players(game_id)
            .await
            .into_iter()
            .find(|p| p.name == name)
            .unwrap();
        SessionContext::for_player(&player, &game.code)
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_task_stops_on_drop() {
        let state = AppState::new();
        let (host, _) = lobby(&state, &[]).await;
        let view = state.watch_game(&host.game_id);
        let mut rx = view.subscribe();
        rx.wait_for(|s| s.is_some()).await.unwrap();

        drop(view);
        // Sender side goes away with the aborted task
        while rx.changed().await.is_ok() {}
    }
}
