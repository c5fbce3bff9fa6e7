use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use parley_types::events::PresenceEvent;

/// Per-topic buffer. A subscriber that falls this far behind sees
/// `RecvError::Lagged` and skips ahead; nothing is ever replayed.
const TOPIC_CAPACITY: usize = 256;

/// Topic-based fan-out connecting server-side state changes to every
/// live connection. At-most-once per subscriber per publish, no
/// persistence: a disconnected subscriber misses events, full stop.
#[derive(Clone, Default)]
pub struct Bus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<PresenceEvent>>>>,
}

/// Live subscription to one topic. Dropping the handle unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<PresenceEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Result<PresenceEvent, broadcast::error::RecvError> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<PresenceEvent, broadcast::error::TryRecvError> {
        self.rx.try_recv()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `event` to every current subscriber of `topic`. Returns the
    /// number of subscribers reached; delivery to each happens on that
    /// subscriber's own task, so a slow client never blocks the publisher.
    pub fn publish(&self, topic: &str, event: PresenceEvent) -> usize {
        let topics = self.topics.read().expect("bus lock poisoned");
        match topics.get(topic) {
            // send only errors when nobody is listening
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to `topic`, creating it on first use. Events published
    /// before this call are not replayed.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let mut topics = self.topics.write().expect("bus lock poisoned");
        let tx = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        Subscription { rx: tx.subscribe() }
    }

    /// Current subscriber count for a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().expect("bus lock poisoned");
        topics.get(topic).map_or(0, |tx| tx.receiver_count())
    }
}
