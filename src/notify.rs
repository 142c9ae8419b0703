use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for change notifications: one channel per court plus one
/// carrying every event.
pub struct NotifyHub {
    courts: DashMap<Ulid, broadcast::Sender<Event>>,
    all: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            courts: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to changes on one court. Creates the channel if needed.
    pub fn subscribe(&self, court_id: Ulid) -> broadcast::Receiver<Event> {
        self.courts
            .entry(court_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Subscribe to every event, challenges included.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Publish a court event. No-op for channels nobody listens to.
    pub fn send(&self, court_id: Ulid, event: &Event) {
        if let Some(sender) = self.courts.get(&court_id) {
            let _ = sender.send(event.clone());
        }
        self.broadcast(event);
    }

    /// Publish an event that belongs to no court.
    pub fn broadcast(&self, event: &Event) {
        let _ = self.all.send(event.clone());
    }

    /// Drop court channels whose subscribers are all gone.
    pub fn prune(&self) -> usize {
        let before = self.courts.len();
        self.courts.retain(|_, sender| sender.receiver_count() > 0);
        before - self.courts.len()
    }
}
