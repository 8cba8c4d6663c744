//! Process-local, typed publish/subscribe hub.
//!
//! The source system used a single "any"-typed payload per topic; per the
//! design notes this is replaced with one bounded broadcast channel per
//! topic, each carrying its own concrete event type. Subscribers destructure
//! a concrete struct instead of attempting a runtime type cast.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use crate::models::{CollectorInfo, DetectorInfo, DiscoveryInfo};

/// Per-subscriber channel capacity. A publish to a subscriber whose buffer
/// is full drops the message for that subscriber only; this never blocks
/// the publisher or any other subscriber.
const SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct DiscoveryEvent(pub DiscoveryInfo);

#[derive(Debug, Clone)]
pub struct CollectorEvent(pub CollectorInfo);

#[derive(Debug, Clone)]
pub struct DetectorEvent(pub DetectorInfo);

/// A single typed topic: a list of subscriber senders plus a drop counter.
struct Topic<T> {
    subscribers: std::sync::RwLock<Vec<mpsc::Sender<T>>>,
    dropped: AtomicU64,
}

impl<T: Clone> Topic<T> {
    fn new() -> Self {
        Self {
            subscribers: std::sync::RwLock::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    fn subscribe(&self) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers.write().expect("topic lock poisoned").push(tx);
        rx
    }

    fn publish(&self, event: T) {
        let subscribers = self.subscribers.read().expect("topic lock poisoned");
        for sub in subscribers.iter() {
            match sub.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!("subscriber buffer full, dropping event for this subscriber only");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Subscriber gone; nothing to do, it stays registered but
                    // every future send will also report closed.
                }
            }
        }
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The three topics the pipeline core uses: `discovery`, `collector`,
/// `detector`. Subscription is permanent for the subscriber's lifetime;
/// there is no unsubscribe, matching the spec's stated contract.
pub struct EventBus {
    discovery: Topic<DiscoveryEvent>,
    collector: Topic<CollectorEvent>,
    detector: Topic<DetectorEvent>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            discovery: Topic::new(),
            collector: Topic::new(),
            detector: Topic::new(),
        })
    }

    pub fn subscribe_discovery(&self) -> mpsc::Receiver<DiscoveryEvent> {
        self.discovery.subscribe()
    }

    pub fn subscribe_collector(&self) -> mpsc::Receiver<CollectorEvent> {
        self.collector.subscribe()
    }

    pub fn subscribe_detector(&self) -> mpsc::Receiver<DetectorEvent> {
        self.detector.subscribe()
    }

    pub fn publish_discovery(&self, info: DiscoveryInfo) {
        self.discovery.publish(DiscoveryEvent(info));
    }

    pub fn publish_collector(&self, info: CollectorInfo) {
        self.collector.publish(CollectorEvent(info));
    }

    pub fn publish_detector(&self, info: DetectorInfo) {
        self.detector.publish(DetectorEvent(info));
    }

    /// Total events dropped across all topics due to a full subscriber
    /// buffer. Exposed for the metrics layer.
    pub fn dropped_total(&self) -> u64 {
        self.discovery.dropped_count() + self.collector.dropped_count() + self.detector.dropped_count()
    }
}
