//! # Subscriber Registry
//!
//! Fan-out point between the relay and every connected dashboard.
//!
//! ## Core Design Principles:
//!
//! 1.  **Serialize once, share everywhere**: a broadcast builds one [`Frame`]
//!     (payload plus its JSON wire text) and hands each subscriber an `Arc`
//!     to it.
//!
//! 2.  **Snapshot then send**: the subscriber list is copied under the lock and
//!     the lock is released before any send. Registrations that land during a
//!     broadcast do not see the in-flight frame, and unregistrations cannot
//!     invalidate the iteration.
//!
//! Fan-outs themselves are serialized, so the frames of one
//! [`SubscriberRegistry::broadcast_frames`] call reach each subscriber back to
//! back, with no other broadcast between them.
//!
//! 3.  **Never block the producer**: each subscriber owns a bounded queue and
//!     broadcasts use `try_send`. A subscriber whose queue is full or closed
//!     has failed delivery; it is dropped from the registry and the broadcast
//!     carries on with the others.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::model::{ControlDecision, Frame, Topic};

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1024;

/// Opaque subscriber handle.
pub type SubscriberId = u64;

/// Lifecycle of a subscriber. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Registered and eligible for broadcasts.
    Connected,
    /// Unregistered, explicitly or after a failed send.
    Disconnected,
}

/// Outcome of one broadcast call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the frame was queued for.
    pub delivered: usize,
    /// Subscribers dropped because their queue was full or closed.
    pub dropped: usize,
}

/// Registry-side record of a subscriber.
struct SubscriberEntry {
    id: SubscriberId,
    label: String,
    sender: mpsc::Sender<Arc<Frame>>,
    connected: Arc<AtomicBool>,
}

/// The receiving half handed to the connection task.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Arc<Frame>>,
    connected: Arc<AtomicBool>,
}

impl Subscription {
    /// This subscriber's id.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next frame, or `None` once the registry dropped this subscriber and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<Frame>> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<Arc<Frame>> {
        self.receiver.try_recv().ok()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriberState {
        if self.connected.load(Ordering::Acquire) {
            SubscriberState::Connected
        } else {
            SubscriberState::Disconnected
        }
    }
}

/// Tracks live subscribers and fans frames out to them.
pub struct SubscriberRegistry {
    subscribers: Mutex<Vec<SubscriberEntry>>,
    fanout: Mutex<()>,
    next_id: AtomicU64,
    buffer: usize,
}

impl SubscriberRegistry {
    /// A registry whose subscribers each buffer up to `buffer` frames.
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            fanout: Mutex::new(()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<SubscriberEntry>> {
        self.subscribers.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// # Register
    ///
    /// Adds a subscriber and queues a `connected` acknowledgement for it alone.
    pub fn register(&self, label: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.buffer);
        let connected = Arc::new(AtomicBool::new(true));

        let hello = ControlDecision::connected(Utc::now());
        match serde_json::to_value(&hello) {
            Ok(payload) => {
                // Fresh queue with capacity >= 1, so this cannot fail.
                let _ = sender.try_send(Arc::new(Frame::new(Topic::RsuDecision, payload)));
            }
            Err(e) => log::warn!("Could not encode connection acknowledgement: {}", e),
        }

        self.entries().push(SubscriberEntry {
            id,
            label: label.to_string(),
            sender,
            connected: Arc::clone(&connected),
        });
        log::info!("Subscriber {} ('{}') registered", id, label);

        Subscription { id, receiver, connected }
    }

    /// Removes a subscriber. Returns `false` if it was already gone.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = {
            let mut entries = self.entries();
            entries
                .iter()
                .position(|e| e.id == id)
                .map(|idx| entries.swap_remove(idx))
        };
        match removed {
            Some(entry) => {
                entry.connected.store(false, Ordering::Release);
                log::info!("Subscriber {} ('{}') unregistered", entry.id, entry.label);
                true
            }
            None => false,
        }
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no subscriber is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` is currently registered.
    pub fn is_connected(&self, id: SubscriberId) -> bool {
        self.entries().iter().any(|e| e.id == id)
    }

    /// # Broadcast
    ///
    /// Serializes `payload` once and queues it for every subscriber in a
    /// snapshot of the registry. Failed sends unregister the subscriber.
    pub fn broadcast<T: Serialize>(&self, topic: Topic, payload: &T) -> BroadcastReport {
        match Self::encode(topic, payload) {
            Some(frame) => self.broadcast_frame(frame),
            None => BroadcastReport::default(),
        }
    }

    /// Builds a shareable frame, or logs and returns `None` if `payload` does
    /// not serialize.
    pub fn encode<T: Serialize>(topic: Topic, payload: &T) -> Option<Arc<Frame>> {
        match serde_json::to_value(payload) {
            Ok(v) => Some(Arc::new(Frame::new(topic, v))),
            Err(e) => {
                log::error!("Dropping {} broadcast, payload did not serialize: {}", topic.as_str(), e);
                None
            }
        }
    }

    /// Fans out an already built frame.
    pub fn broadcast_frame(&self, frame: Arc<Frame>) -> BroadcastReport {
        self.broadcast_frames(std::slice::from_ref(&frame))
    }

    /// Fans out `frames` in order. Each subscriber receives them contiguously;
    /// one that fails any of them is dropped and counted once.
    pub fn broadcast_frames(&self, frames: &[Arc<Frame>]) -> BroadcastReport {
        let _fanout = self.fanout.lock().unwrap_or_else(|p| p.into_inner());
        let snapshot: Vec<(SubscriberId, mpsc::Sender<Arc<Frame>>)> = self
            .entries()
            .iter()
            .filter(|e| e.connected.load(Ordering::Acquire))
            .map(|e| (e.id, e.sender.clone()))
            .collect();

        let mut report = BroadcastReport::default();
        for (id, sender) in snapshot {
            let sent = frames.iter().try_for_each(|frame| sender.try_send(Arc::clone(frame)));
            match sent {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    log::warn!("Subscriber {} is not keeping up; dropping it", id);
                    self.unregister(id);
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    log::info!("Subscriber {} went away; removing it", id);
                    self.unregister(id);
                    report.dropped += 1;
                }
            }
        }
        report
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Action;
    use serde_json::json;

    fn decision_of(frame: &Frame) -> ControlDecision {
        serde_json::from_value(frame.payload.clone()).unwrap()
    }

    #[tokio::test]
    async fn register_acknowledges_only_the_newcomer() {
        let registry = SubscriberRegistry::default();
        let mut first = registry.register("first");
        let hello = first.recv().await.unwrap();
        assert_eq!(hello.topic, Topic::RsuDecision);
        assert_eq!(decision_of(&hello).action, Action::Connected);

        let _second = registry.register("second");
        assert!(first.try_recv().is_none());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber_once() {
        let registry = SubscriberRegistry::default();
        let mut subs: Vec<_> = (0..5).map(|i| registry.register(&format!("s{i}"))).collect();
        for s in subs.iter_mut() {
            s.recv().await.unwrap();
        }

        let report = registry.broadcast(Topic::EvEvent, &json!({"ev_id": "ev1"}));
        assert_eq!(report, BroadcastReport { delivered: 5, dropped: 0 });
        for s in subs.iter_mut() {
            let frame = s.recv().await.unwrap();
            assert_eq!(frame.topic, Topic::EvEvent);
            assert!(s.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn closed_subscriber_is_dropped_lazily() {
        let registry = SubscriberRegistry::default();
        let gone = registry.register("gone");
        let gone_id = gone.id();
        let mut alive = registry.register("alive");
        alive.recv().await.unwrap();
        drop(gone);

        let report = registry.broadcast(Topic::EvEvent, &json!({}));
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert!(!registry.is_connected(gone_id));
        assert_eq!(registry.len(), 1);
        assert!(alive.recv().await.is_some());
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_without_blocking() {
        let registry = SubscriberRegistry::new(2);
        let slow = registry.register("slow");
        // Queue holds the ack plus one frame; the next broadcast overflows it.
        registry.broadcast(Topic::EvEvent, &json!(1));
        let report = registry.broadcast(Topic::EvEvent, &json!(2));
        assert_eq!(report.dropped, 1);
        assert_eq!(slow.state(), SubscriberState::Disconnected);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unregister_is_terminal() {
        let registry = SubscriberRegistry::default();
        let mut sub = registry.register("x");
        assert_eq!(sub.state(), SubscriberState::Connected);
        assert!(registry.unregister(sub.id()));
        assert!(!registry.unregister(sub.id()));
        assert_eq!(sub.state(), SubscriberState::Disconnected);

        registry.broadcast(Topic::EvEvent, &json!({}));
        sub.recv().await.unwrap(); // the ack
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn multi_frame_broadcasts_do_not_interleave() {
        let registry = Arc::new(SubscriberRegistry::new(8192));
        let mut sub = registry.register("watcher");
        sub.try_recv().unwrap();

        let threads: Vec<_> = (0..4)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let frames = [
                            SubscriberRegistry::encode(Topic::EvEvent, &json!({"t": t, "i": i})).unwrap(),
                            SubscriberRegistry::encode(Topic::RsuDecision, &json!({"t": t, "i": i})).unwrap(),
                        ];
                        registry.broadcast_frames(&frames);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let mut frames = Vec::new();
        while let Some(f) = sub.try_recv() {
            frames.push(f);
        }
        assert_eq!(frames.len(), 4 * 200 * 2);
        for pair in frames.chunks(2) {
            assert_eq!((pair[0].topic, pair[1].topic), (Topic::EvEvent, Topic::RsuDecision));
            assert_eq!(pair[0].payload, pair[1].payload);
        }
    }

    #[tokio::test]
    async fn partial_delivery_drops_the_subscriber_once() {
        let registry = SubscriberRegistry::new(2);
        let mut sub = registry.register("tight");
        sub.recv().await.unwrap();
        let frames = [
            SubscriberRegistry::encode(Topic::EvEvent, &json!(1)).unwrap(),
            SubscriberRegistry::encode(Topic::RsuDecision, &json!(2)).unwrap(),
            SubscriberRegistry::encode(Topic::EvEvent, &json!(3)).unwrap(),
        ];
        let report = registry.broadcast_frames(&frames);
        assert_eq!(report, BroadcastReport { delivered: 0, dropped: 1 });
        assert_eq!(sub.state(), SubscriberState::Disconnected);
    }

    #[test]
    fn concurrent_register_and_broadcast() {
        let registry = Arc::new(SubscriberRegistry::new(4096));
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let sub = registry.register(&format!("t{t}-{i}"));
                        registry.broadcast(Topic::EvEvent, &json!({"t": t, "i": i}));
                        if i % 2 == 0 {
                            registry.unregister(sub.id());
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        // Every subscription went out of scope inside its loop, so any
        // survivor has a closed receiver and the next broadcast prunes it.
        registry.broadcast(Topic::EvEvent, &json!({}));
        assert!(registry.is_empty());
    }
}
