//! Client-side countdown reconstruction
//!
//! A participant never receives ticks from the server, only the start and stop
//! events. [`Countdown`] rebuilds the remaining time locally from the start
//! signature and keeps the per-window answer state (selection and in-flight
//! guard) that a new window must reset and a duplicated start must not.

use crate::bus::BusSubscription;
use crate::protocol::{SessionEvent, TimerEvent, TimerKind};
use crate::types::now_millis;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Answer state scoped to a single countdown window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowState {
    pub selected_answer: Option<String>,
    pub in_flight: bool,
    pub submitted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerUpdate {
    /// A new window opened
    Started { end_at: i64 },
    /// Start for the window already running, ignored
    Duplicate,
    /// The running window was cancelled
    Stopped,
    /// Stop for an older window, or a start older than the current one
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct Countdown {
    signature: Option<i64>,
    end_at: i64,
    stopped: bool,
    last_remaining: Option<i64>,
    window: WindowState,
}

impl Countdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &TimerEvent) -> TimerUpdate {
        let signature = event.started_at_epoch_millis;
        match event.kind {
            TimerKind::Start => match self.signature {
                Some(current) if current == signature => TimerUpdate::Duplicate,
                Some(current) if current > signature => TimerUpdate::Ignored,
                _ => {
                    self.signature = Some(signature);
                    self.end_at = event.end_at();
                    self.stopped = false;
                    self.last_remaining = None;
                    self.window = WindowState::default();
                    TimerUpdate::Started {
                        end_at: self.end_at,
                    }
                }
            },
            TimerKind::Stop => match self.signature {
                Some(current) if signature >= current && !self.stopped => {
                    self.stopped = true;
                    self.last_remaining = Some(0);
                    TimerUpdate::Stopped
                }
                _ => TimerUpdate::Ignored,
            },
        }
    }

    /// Milliseconds left at `now_ms`; never increases within a window and never goes below zero
    pub fn remaining_ms(&mut self, now_ms: i64) -> i64 {
        if self.signature.is_none() || self.stopped {
            return 0;
        }
        let mut remaining = (self.end_at - now_ms).max(0);
        if let Some(last) = self.last_remaining {
            remaining = remaining.min(last);
        }
        self.last_remaining = Some(remaining);
        remaining
    }

    pub fn is_open(&mut self, now_ms: i64) -> bool {
        self.remaining_ms(now_ms) > 0
    }

    pub fn signature(&self) -> Option<i64> {
        self.signature
    }

    pub fn window(&self) -> &WindowState {
        &self.window
    }

    /// Record the participant's current choice; refused once the window is closed or submitted
    pub fn select(&mut self, answer: impl Into<String>, now_ms: i64) -> bool {
        if !self.is_open(now_ms) || self.window.submitted || self.window.in_flight {
            return false;
        }
        self.window.selected_answer = Some(answer.into());
        true
    }

    /// Take the in-flight guard; false when a submission for this window is pending or done
    pub fn begin_submit(&mut self) -> bool {
        if self.window.in_flight || self.window.submitted {
            return false;
        }
        self.window.in_flight = true;
        true
    }

    /// Release the guard. Only `signature` (the window the submission started in) is updated.
    pub fn finish_submit(&mut self, signature: Option<i64>, accepted: bool) {
        if signature != self.signature {
            return;
        }
        self.window.in_flight = false;
        self.window.submitted |= accepted;
    }
}

/// Value published on every countdown tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerTick {
    pub signature: Option<i64>,
    pub remaining_ms: i64,
}

impl TimerTick {
    pub fn is_closed(&self) -> bool {
        self.remaining_ms == 0
    }
}

/// Drive a [`Countdown`] from a game's bus subscription.
///
/// The task ends when the channel closes or every tick receiver is dropped.
pub fn spawn_countdown(
    mut sub: BusSubscription,
    tick: Duration,
) -> (watch::Receiver<TimerTick>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(TimerTick::default());

    let handle = tokio::spawn(async move {
        let mut countdown = Countdown::new();
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = sub.recv() => match event {
                    Ok(SessionEvent::Timer(timer)) => {
                        let update = countdown.apply(&timer);
                        tracing::debug!("Timer event {:?}: {:?}", timer, update);
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("Countdown lagged {} events behind", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = interval.tick() => {}
                _ = tx.closed() => break,
            }

            let next = TimerTick {
                signature: countdown.signature(),
                remaining_ms: countdown.remaining_ms(now_millis()),
            };
            tx.send_if_modified(|current| {
                if *current == next {
                    false
                } else {
                    *current = next;
                    true
                }
            });
        }
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BroadcastBus;

    const T: i64 = 1_700_000_000_000;

    #[test]
    fn test_remaining_is_monotonic_and_hits_zero() {
        let mut countdown = Countdown::new();
        assert_eq!(
            countdown.apply(&TimerEvent::start(10, T)),
            TimerUpdate::Started { end_at: T + 10_000 }
        );

        let mut last = i64::MAX;
        for now in (T - 500..=T + 12_000).step_by(137) {
            let remaining = countdown.remaining_ms(now);
            assert!(remaining <= last);
            assert!(remaining >= 0);
            last = remaining;
        }
        assert_eq!(countdown.remaining_ms(T + 10_000), 0);
        assert_eq!(countdown.remaining_ms(T + 60_000), 0);
    }

    #[test]
    fn test_clock_step_back_does_not_raise_remaining() {
        let mut countdown = Countdown::new();
        countdown.apply(&TimerEvent::start(10, T));
        assert_eq!(countdown.remaining_ms(T + 4000), 6000);
        assert_eq!(countdown.remaining_ms(T + 1000), 6000);
    }

    #[test]
    fn test_stop_closes_window_immediately() {
        let mut countdown = Countdown::new();
        countdown.apply(&TimerEvent::start(30, T));
        assert_eq!(countdown.apply(&TimerEvent::stop(T)), TimerUpdate::Stopped);
        assert_eq!(countdown.remaining_ms(T + 1), 0);
        assert_eq!(countdown.apply(&TimerEvent::stop(T)), TimerUpdate::Ignored);
    }

    #[test]
    fn test_stop_for_older_window_ignored() {
        let mut countdown = Countdown::new();
        countdown.apply(&TimerEvent::start(30, T + 5000));
        assert_eq!(countdown.apply(&TimerEvent::stop(T)), TimerUpdate::Ignored);
        assert_eq!(countdown.remaining_ms(T + 6000), 29_000);
    }

    #[test]
    fn test_duplicate_start_keeps_submission() {
        let mut countdown = Countdown::new();
        countdown.apply(&TimerEvent::start(10, T));
        assert!(countdown.select("B", T + 1000));
        assert!(countdown.begin_submit());
        countdown.finish_submit(Some(T), true);

        assert_eq!(countdown.apply(&TimerEvent::start(10, T)), TimerUpdate::Duplicate);
        assert!(countdown.window().submitted);
        assert_eq!(countdown.window().selected_answer.as_deref(), Some("B"));

        // A genuinely new window resets it
        countdown.apply(&TimerEvent::start(10, T + 20_000));
        assert_eq!(countdown.window(), &WindowState::default());
    }

    #[test]
    fn test_in_flight_guard() {
        let mut countdown = Countdown::new();
        countdown.apply(&TimerEvent::start(10, T));
        assert!(countdown.begin_submit());
        assert!(!countdown.begin_submit());

        countdown.finish_submit(Some(T), false);
        assert!(countdown.begin_submit());
        countdown.finish_submit(Some(T), true);
        assert!(!countdown.begin_submit());
    }

    #[test]
    fn test_late_response_from_old_window_ignored() {
        let mut countdown = Countdown::new();
        countdown.apply(&TimerEvent::start(10, T));
        assert!(countdown.begin_submit());

        countdown.apply(&TimerEvent::start(10, T + 20_000));
        countdown.finish_submit(Some(T), true);
        assert!(!countdown.window().submitted);
    }

    #[test]
    fn test_select_refused_after_close() {
        let mut countdown = Countdown::new();
        assert!(!countdown.select("A", T));
        countdown.apply(&TimerEvent::start(5, T));
        assert!(!countdown.select("A", T + 5000));
    }

    #[tokio::test]
    async fn test_spawned_countdown_follows_bus() {
        let bus = BroadcastBus::default();
        let sub = bus.subscribe("game:g1").await;
        let (mut rx, handle) = spawn_countdown(sub, Duration::from_millis(20));

        let start = TimerEvent::start(60, now_millis());
        bus.publish("game:g1", SessionEvent::Timer(start)).await;
        let tick = *rx
            .wait_for(|t| t.signature == Some(start.started_at_epoch_millis))
            .await
            .unwrap();
        assert!(tick.remaining_ms > 50_000);

        bus.publish(
            "game:g1",
            SessionEvent::Timer(TimerEvent::stop(start.started_at_epoch_millis)),
        )
        .await;
        rx.wait_for(|t| t.is_closed()).await.unwrap();

        drop(rx);
        handle.await.unwrap();
    }
}
