use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Kinds of lifecycle notifications emitted by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureEventType {
    Registered,
    Started,
    Stopped,
    Disabled,
    Failed,
    Recovered,
    Degraded,
    CriticalFailure,
}

impl FeatureEventType {
    /// Get the event type as a string for filtering
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureEventType::Registered => "registered",
            FeatureEventType::Started => "started",
            FeatureEventType::Stopped => "stopped",
            FeatureEventType::Disabled => "disabled",
            FeatureEventType::Failed => "failed",
            FeatureEventType::Recovered => "recovered",
            FeatureEventType::Degraded => "degraded",
            FeatureEventType::CriticalFailure => "critical_failure",
        }
    }
}

impl fmt::Display for FeatureEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable notification about a single feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEvent {
    pub feature_id: String,
    pub event_type: FeatureEventType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl FeatureEvent {
    pub fn new<I: Into<String>, M: Into<String>>(
        feature_id: I,
        event_type: FeatureEventType,
        message: M,
    ) -> Self {
        Self {
            feature_id: feature_id.into(),
            event_type,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        format!("[{}] {}: {}", self.feature_id, self.event_type, self.message)
    }
}

/// Handle returned by [`FeatureEventBus::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

pub type EventListener = Arc<dyn Fn(&FeatureEvent) + Send + Sync>;

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<FeatureEventType>),
    Features(Vec<String>),
}

impl EventFilter {
    pub fn matches(&self, event: &FeatureEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type),
            EventFilter::Features(ids) => ids.iter().any(|id| id == &event.feature_id),
        }
    }
}

/// Fan-out of feature events to synchronous listeners and async subscribers.
///
/// Listeners are stored as a copy-on-write snapshot: `publish` clones the
/// current `Arc` and iterates it without holding the lock, so a listener may
/// register or remove listeners while being called.
pub struct FeatureEventBus {
    sender: broadcast::Sender<FeatureEvent>,
    listeners: RwLock<Arc<Vec<(ListenerId, EventListener)>>>,
}

impl FeatureEventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&FeatureEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(Uuid::new_v4());
        let mut guard = self.listeners.write();
        let mut next: Vec<(ListenerId, EventListener)> = guard.as_ref().clone();
        next.push((id, Arc::new(listener)));
        *guard = Arc::new(next);
        id
    }

    /// Register a listener that only sees events matching `filter`
    pub fn add_filtered_listener<F>(&self, filter: EventFilter, listener: F) -> ListenerId
    where
        F: Fn(&FeatureEvent) + Send + Sync + 'static,
    {
        self.add_listener(move |event| {
            if filter.matches(event) {
                listener(event);
            }
        })
    }

    /// Returns true if the listener was registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut guard = self.listeners.write();
        if !guard.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next: Vec<(ListenerId, EventListener)> = guard
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *guard = Arc::new(next);
        true
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<FeatureEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Deliver an event to every listener and subscriber
    pub fn publish(&self, event: FeatureEvent) {
        match event.event_type {
            FeatureEventType::CriticalFailure => error!("{}", event.description()),
            FeatureEventType::Failed | FeatureEventType::Disabled => {
                warn!("{}", event.description())
            }
            FeatureEventType::Degraded => warn!("{}", event.description()),
            FeatureEventType::Started | FeatureEventType::Recovered => {
                info!("{}", event.description())
            }
            _ => debug!("{}", event.description()),
        }

        let snapshot: Arc<Vec<(ListenerId, EventListener)>> = self.listeners.read().clone();
        for (id, listener) in snapshot.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!(
                    listener = ?id,
                    feature = %event.feature_id,
                    "Event listener panicked while handling {}",
                    event.event_type
                );
            }
        }

        // No subscribers is not an error for a purely observational stream
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::time::{timeout, Duration};

    fn event(id: &str, event_type: FeatureEventType) -> FeatureEvent {
        FeatureEvent::new(id, event_type, "test")
    }

    #[test]
    fn test_listeners_receive_events_in_order() {
        let bus = FeatureEventBus::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        bus.add_listener(move |e| sink.lock().push(e.event_type));

        bus.publish(event("map", FeatureEventType::Registered));
        bus.publish(event("map", FeatureEventType::Started));

        assert_eq!(
            *seen.lock(),
            vec![FeatureEventType::Registered, FeatureEventType::Started]
        );
    }

    #[test]
    fn test_remove_listener() {
        let bus = FeatureEventBus::new(16);
        let count = Arc::new(Mutex::new(0));

        let sink = Arc::clone(&count);
        let id = bus.add_listener(move |_| *sink.lock() += 1);
        bus.publish(event("chat", FeatureEventType::Started));

        assert!(bus.remove_listener(id));
        assert!(!bus.remove_listener(id));
        bus.publish(event("chat", FeatureEventType::Stopped));

        assert_eq!(*count.lock(), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_listener_can_register_during_dispatch() {
        let bus = Arc::new(FeatureEventBus::new(16));
        let calls = Arc::new(Mutex::new(0));

        let bus_ref = Arc::clone(&bus);
        let sink = Arc::clone(&calls);
        bus.add_listener(move |_| {
            *sink.lock() += 1;
            bus_ref.add_listener(|_| {});
        });

        bus.publish(event("ui", FeatureEventType::Started));
        assert_eq!(*calls.lock(), 1);
        assert_eq!(bus.listener_count(), 2);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let bus = FeatureEventBus::new(16);
        let reached = Arc::new(Mutex::new(false));

        bus.add_listener(|_| panic!("listener failure"));
        let sink = Arc::clone(&reached);
        bus.add_listener(move |_| *sink.lock() = true);

        bus.publish(event("economy", FeatureEventType::Failed));
        assert!(*reached.lock());
    }

    #[tokio::test]
    async fn test_subscribers_receive_broadcast() {
        let bus = FeatureEventBus::new(16);
        let mut receiver = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(event("teleport", FeatureEventType::Disabled));

        let received = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.feature_id, "teleport");
        assert_eq!(received.event_type, FeatureEventType::Disabled);
    }

    #[test]
    fn test_event_filter() {
        let started = event("map", FeatureEventType::Started);
        let failed = event("chat", FeatureEventType::Failed);

        assert!(EventFilter::All.matches(&started));

        let by_type = EventFilter::EventTypes(vec![FeatureEventType::Failed]);
        assert!(!by_type.matches(&started));
        assert!(by_type.matches(&failed));

        let by_feature = EventFilter::Features(vec!["map".to_string()]);
        assert!(by_feature.matches(&started));
        assert!(!by_feature.matches(&failed));
    }

    #[test]
    fn test_filtered_listener_only_sees_matching_events() {
        let bus = FeatureEventBus::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        bus.add_filtered_listener(
            EventFilter::EventTypes(vec![FeatureEventType::Disabled, FeatureEventType::Recovered]),
            move |e| sink.lock().push((e.feature_id.clone(), e.event_type)),
        );

        bus.publish(event("chat", FeatureEventType::Started));
        bus.publish(event("chat", FeatureEventType::Disabled));
        bus.publish(event("map", FeatureEventType::Degraded));
        bus.publish(event("chat", FeatureEventType::Recovered));

        assert_eq!(
            *seen.lock(),
            vec![
                ("chat".to_string(), FeatureEventType::Disabled),
                ("chat".to_string(), FeatureEventType::Recovered),
            ]
        );
    }
}
