//! Round intro gate
//!
//! Each participant runtime shows a round's intro once. The set of introduced
//! rounds lives only in memory: a reconnecting client starts with an empty set
//! and may see the intro again.

use crate::types::{Game, GameStatus, RoundKind};
use serde::Serialize;
use std::collections::HashSet;

/// Seconds of the countdown shown when a round has no intro video
pub const FALLBACK_COUNTDOWN_SECS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intro {
    Video { url: String },
    Countdown { seconds: u32 },
}

#[derive(Debug, Default)]
pub struct IntroGate {
    introduced: HashSet<RoundKind>,
}

impl IntroGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// The intro to play for `game`'s current round, or `None` when it was
    /// already shown here or no round is in play
    pub fn take(&mut self, game: &Game) -> Option<Intro> {
        if game.status != GameStatus::Playing {
            return None;
        }
        let round = game.current_round?;
        if !self.introduced.insert(round) {
            return None;
        }

        let intro = match game.intro_videos.get(&round) {
            Some(url) if !url.trim().is_empty() => Intro::Video { url: url.clone() },
            _ => Intro::Countdown {
                seconds: FALLBACK_COUNTDOWN_SECS,
            },
        };
        tracing::debug!("Showing {:?} for {}", intro, round);
        Some(intro)
    }

    pub fn was_introduced(&self, round: RoundKind) -> bool {
        self.introduced.contains(&round)
    }
}
