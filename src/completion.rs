//! Round completion bookkeeping
//!
//! [`CompletionLatch`] guarantees a round-finished signal goes out at most once
//! per game and round. [`RoundTracker`] is the receiving side: it only reacts to
//! signals for the round the participant is actually in.

use crate::protocol::RoundFinishedEvent;
use crate::types::{GameId, RoundKind};
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct CompletionLatch {
    fired: HashSet<(GameId, RoundKind)>,
}

impl CompletionLatch {
    /// Returns true only the first time it is called for a game and round
    pub fn try_fire(&mut self, game_id: &str, round: RoundKind) -> bool {
        self.fired.insert((game_id.to_string(), round))
    }

    pub fn has_fired(&self, game_id: &str, round: RoundKind) -> bool {
        self.fired.contains(&(game_id.to_string(), round))
    }

    /// Drop every entry of a finished game
    pub fn forget_game(&mut self, game_id: &str) {
        self.fired.retain(|(id, _)| id != game_id);
    }

    pub fn len(&self) -> usize {
        self.fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundSignal {
    /// The current round just ended
    Ended,
    /// The current round had already ended; nothing to do
    AlreadyEnded,
    /// The signal is for another round and was ignored
    Stale,
}

#[derive(Debug, Clone, Default)]
pub struct RoundTracker {
    current: Option<RoundKind>,
    ended: bool,
}

impl RoundTracker {
    pub fn new(current: Option<RoundKind>) -> Self {
        Self {
            current,
            ended: false,
        }
    }

    pub fn current(&self) -> Option<RoundKind> {
        self.current
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Move to a round (from a fresh game read); resets the ended flag on change
    pub fn enter(&mut self, round: Option<RoundKind>) {
        if self.current != round {
            self.current = round;
            self.ended = false;
        }
    }

    pub fn on_round_finished(&mut self, event: &RoundFinishedEvent) -> RoundSignal {
        if self.current != Some(event.round) {
            tracing::debug!(
                "Ignoring round-finished for {} while in {:?}",
                event.round,
                self.current
            );
            return RoundSignal::Stale;
        }
        if self.ended {
            return RoundSignal::AlreadyEnded;
        }
        self.ended = true;
        RoundSignal::Ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latch_fires_once() {
        let mut latch = CompletionLatch::default();
        assert!(latch.try_fire("g1", RoundKind::KhoiDong));
        assert!(!latch.try_fire("g1", RoundKind::KhoiDong));
        assert!(latch.try_fire("g1", RoundKind::TangToc));
        assert!(latch.try_fire("g2", RoundKind::KhoiDong));
        assert!(latch.has_fired("g1", RoundKind::KhoiDong));
        assert!(!latch.has_fired("g2", RoundKind::VeDich));
    }

    #[test]
    fn test_forget_game_keeps_other_games() {
        let mut latch = CompletionLatch::default();
        latch.try_fire("g1", RoundKind::KhoiDong);
        latch.try_fire("g1", RoundKind::TangToc);
        latch.try_fire("g2", RoundKind::KhoiDong);

        latch.forget_game("g1");
        assert_eq!(latch.len(), 1);
        assert!(latch.has_fired("g2", RoundKind::KhoiDong));
        assert!(!latch.has_fired("g1", RoundKind::KhoiDong));
    }

    #[test]
    fn test_stale_round_finished_is_ignored() {
        let mut tracker = RoundTracker::new(Some(RoundKind::TangToc));
        let signal = tracker.on_round_finished(&RoundFinishedEvent {
            round: RoundKind::KhoiDong,
        });
        assert_eq!(signal, RoundSignal::Stale);
        assert_eq!(tracker.current(), Some(RoundKind::TangToc));
        assert!(!tracker.is_ended());
    }

    #[test]
    fn test_current_round_finished() {
        let mut tracker = RoundTracker::new(Some(RoundKind::KhoiDong));
        let event = RoundFinishedEvent {
            round: RoundKind::KhoiDong,
        };
        assert_eq!(tracker.on_round_finished(&event), RoundSignal::Ended);
        assert_eq!(tracker.on_round_finished(&event), RoundSignal::AlreadyEnded);

        tracker.enter(Some(RoundKind::VuotChuongNgaiVat));
        assert!(!tracker.is_ended());
        assert_eq!(tracker.on_round_finished(&event), RoundSignal::Stale);
    }
}
