//! A topic-typed event feed. Subscribers register a bounded channel under a
//! unique id; delivery is non-blocking and full channels drop the event.

use std::collections::HashMap;
use std::sync::Mutex;
use std::{error::Error, fmt};
use tokio::sync::mpsc;
use tracing::warn;

/// Signals that a block at `height` was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockReceived {
    pub height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    DuplicateSubscriber(String),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::DuplicateSubscriber(id) => {
                write!(f, "subscriber {:?} already registered", id)
            }
        }
    }
}

impl Error for EventError {}

pub struct EventFeed<T> {
    subs: Mutex<HashMap<String, mpsc::Sender<T>>>,
}

impl<T> Default for EventFeed<T> {
    fn default() -> Self {
        Self {
            subs: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> EventFeed<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, id: &str, sender: mpsc::Sender<T>) -> Result<(), EventError> {
        let mut subs = self.subs.lock().unwrap();
        if subs.contains_key(id) {
            return Err(EventError::DuplicateSubscriber(id.to_string()));
        }
        subs.insert(id.to_string(), sender);
        Ok(())
    }

    pub fn unsubscribe(&self, id: &str) {
        self.subs.lock().unwrap().remove(id);
    }

    /// Deliver `event` to every subscriber without blocking. A full or closed
    /// channel drops the event for that subscriber.
    pub fn send(&self, event: T) {
        let subs = self.subs.lock().unwrap();
        for (id, sender) in subs.iter() {
            if sender.try_send(event.clone()).is_err() {
                warn!(subscriber = %id, "event channel full or closed, dropping event");
            }
        }
    }
}

/// The node-wide event topics. Only the block feed exists today; the miner
/// subscribes to it for preemption.
#[derive(Default)]
pub struct EventBus {
    block_feed: EventFeed<BlockReceived>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_feed(&self) -> &EventFeed<BlockReceived> {
        &self.block_feed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_to_subscriber() {
        let feed = EventFeed::new();
        let (tx, mut rx) = mpsc::channel(1);
        feed.subscribe("miner", tx).unwrap();
        feed.send(BlockReceived { height: 3 });
        assert_eq!(rx.try_recv().unwrap(), BlockReceived { height: 3 });
    }

    #[test]
    fn duplicate_subscriber_is_rejected() {
        let feed: EventFeed<BlockReceived> = EventFeed::new();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        feed.subscribe("miner", tx1).unwrap();
        assert_eq!(
            feed.subscribe("miner", tx2),
            Err(EventError::DuplicateSubscriber("miner".into()))
        );
    }

    #[test]
    fn full_channel_drops_event() {
        let feed = EventFeed::new();
        let (tx, mut rx) = mpsc::channel(1);
        feed.subscribe("miner", tx).unwrap();
        feed.send(BlockReceived { height: 1 });
        feed.send(BlockReceived { height: 2 });
        assert_eq!(rx.try_recv().unwrap(), BlockReceived { height: 1 });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unsubscribed_channel_stops_receiving() {
        let feed = EventFeed::new();
        let (tx, mut rx) = mpsc::channel(1);
        feed.subscribe("miner", tx).unwrap();
        feed.unsubscribe("miner");
        feed.send(BlockReceived { height: 1 });
        assert!(rx.try_recv().is_err());
    }
}
