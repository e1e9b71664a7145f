//! Ephemeral, channel-keyed publish/subscribe
//!
//! Fire-and-forget: a message reaches only the subscribers present when it is
//! published, in publish order per subscriber. Nothing is replayed.

use crate::protocol::SessionEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

pub type BusSubscription = broadcast::Receiver<SessionEvent>;

#[derive(Clone)]
pub struct BroadcastBus {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<SessionEvent>>>>,
    capacity: usize,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Publish to a channel, returning how many subscribers received it
    pub async fn publish(&self, channel: &str, event: SessionEvent) -> usize {
        let channels = self.channels.read().await;
        match channels.get(channel) {
            // A send error only means nobody is listening
            Some(tx) => tx.send(event).unwrap_or(0),
            None => {
                tracing::debug!("Dropping event for channel {} with no subscribers", channel);
                0
            }
        }
    }

    pub async fn subscribe(&self, channel: &str) -> BusSubscription {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MicStatusEvent, RoundFinishedEvent, TimerEvent};
    use crate::types::RoundKind;

    #[tokio::test]
    async fn test_publish_in_order() {
        let bus = BroadcastBus::new(16);
        let mut rx = bus.subscribe("game:1").await;

        bus.publish("game:1", SessionEvent::Timer(TimerEvent::start(10, 1)))
            .await;
        bus.publish("game:1", SessionEvent::Timer(TimerEvent::stop(1)))
            .await;

        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Timer(TimerEvent::start(10, 1))
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Timer(TimerEvent::stop(1))
        );
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_messages() {
        let bus = BroadcastBus::new(16);
        let _early = bus.subscribe("game:1").await;
        let delivered = bus
            .publish(
                "game:1",
                SessionEvent::RoundFinished(RoundFinishedEvent {
                    round: RoundKind::KhoiDong,
                }),
            )
            .await;
        assert_eq!(delivered, 1);

        let mut late = bus.subscribe("game:1").await;
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = BroadcastBus::new(16);
        let mut rx_a = bus.subscribe("game:a").await;
        let mut rx_b = bus.subscribe("game:b").await;

        let event = SessionEvent::MicStatus(MicStatusEvent {
            player_id: "p1".to_string(),
            is_on: true,
        });
        bus.publish("game:a", event.clone()).await;

        assert_eq!(rx_a.recv().await.unwrap(), event);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = BroadcastBus::new(16);
        let delivered = bus
            .publish("game:none", SessionEvent::Timer(TimerEvent::stop(5)))
            .await;
        assert_eq!(delivered, 0);
        assert_eq!(bus.subscriber_count("game:none").await, 0);
    }
}
