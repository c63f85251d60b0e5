//! Event bus

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use super::events::{AppEvent, EventCategory};
use crate::data::RunId;

const CHANNEL_CAPACITY: usize = 256;

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Which events a handler wants
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    #[default]
    All,
    /// Any of these categories
    Categories(Vec<EventCategory>),
    /// Protocol events of one run
    Run(RunId),
}

impl EventFilter {
    pub fn matches(&self, event: &AppEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Categories(categories) => categories.contains(&event.category()),
            EventFilter::Run(run_id) => event.run_id() == Some(*run_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EventBusError {
    /// Neither a handler nor a receiver is attached
    #[error("No active subscribers")]
    NoSubscribers,
}

struct Subscriber {
    id: SubscriptionId,
    filter: EventFilter,
    handler: Box<dyn Fn(AppEvent) + Send + Sync>,
}

/// Fan-out point between the session layer and its observers
///
/// Handlers registered with [`subscribe`](Self::subscribe) run synchronously
/// on the publishing task, in registration order. Async consumers take a
/// broadcast [`receiver`](Self::receiver) instead. A bus built with
/// [`with_history`](Self::with_history) also keeps the most recent events.
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    history: Option<Mutex<VecDeque<AppEvent>>>,
    history_limit: usize,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            history: None,
            history_limit: 0,
        }
    }

    /// Bus that remembers the last `limit` events
    pub fn with_history(limit: usize) -> Self {
        Self {
            history: Some(Mutex::new(VecDeque::with_capacity(limit))),
            history_limit: limit,
            ..Self::new()
        }
    }

    /// Deliver an event to every matching handler and receiver
    ///
    /// Returns how many handlers and receivers saw it.
    pub fn publish(&self, event: AppEvent) -> Result<usize, EventBusError> {
        if let Some(history) = &self.history {
            let mut history = history.lock();
            if history.len() == self.history_limit {
                history.pop_front();
            }
            if self.history_limit > 0 {
                history.push_back(event.clone());
            }
        }

        let subscribers = self.subscribers.read();
        let mut delivered = 0;
        for subscriber in subscribers.iter().filter(|s| s.filter.matches(&event)) {
            (subscriber.handler)(event.clone());
            delivered += 1;
        }
        let attached = !subscribers.is_empty();
        drop(subscribers);

        match self.sender.send(event) {
            Ok(receivers) => Ok(delivered + receivers),
            Err(_) if attached => Ok(delivered),
            Err(_) => Err(EventBusError::NoSubscribers),
        }
    }

    /// Register a synchronous handler
    ///
    /// Handlers run on the publishing task, which may be a protocol run.
    /// They must not block.
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(AppEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber {
            id,
            filter,
            handler: Box::new(handler),
        });
        tracing::debug!("Subscription {} added", id);
        id
    }

    /// Remove a handler; false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    /// Broadcast receiver for async consumers
    pub fn receiver(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Remembered events, oldest first; empty without history
    pub fn history(&self) -> Vec<AppEvent> {
        self.history
            .as_ref()
            .map(|history| history.lock().iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("history_limit", &self.history_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DeviceEvent, RunOutcome};
    use crate::event_bus::events::{ConnectionEvent, ProtocolEvent};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn connected() -> AppEvent {
        AppEvent::Connection(ConnectionEvent::Connected {
            port: "/dev/ttyACM0".to_string(),
        })
    }

    fn counter(bus: &EventBus, filter: EventFilter) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe(filter, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let first = bus.subscribe(EventFilter::All, |_| {});
        let second = bus.subscribe(EventFilter::All, |_| {});
        assert_ne!(first, second);

        assert!(bus.unsubscribe(first));
        assert!(!bus.unsubscribe(first));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(connected()), Err(EventBusError::NoSubscribers));

        // a handler that filters the event out still counts as attached
        bus.subscribe(EventFilter::Categories(vec![EventCategory::Error]), |_| {});
        assert_eq!(bus.publish(connected()), Ok(0));
    }

    #[test]
    fn test_category_filter() {
        let bus = EventBus::new();
        let connection = counter(&bus, EventFilter::Categories(vec![EventCategory::Connection]));
        let device = counter(&bus, EventFilter::Categories(vec![EventCategory::Device]));

        bus.publish(connected()).ok();
        bus.publish(AppEvent::Device(DeviceEvent::Ready)).ok();
        bus.publish(AppEvent::Device(DeviceEvent::Done)).ok();

        assert_eq!(connection.load(Ordering::SeqCst), 1);
        assert_eq!(device.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_run_filter() {
        let bus = EventBus::new();
        let mine = RunId::new();
        let count = counter(&bus, EventFilter::Run(mine));

        for run_id in [mine, RunId::new(), mine] {
            bus.publish(AppEvent::Protocol(ProtocolEvent::Completed {
                run_id,
                protocol: "A".to_string(),
                outcome: RunOutcome::Completed,
            }))
            .ok();
        }
        bus.publish(AppEvent::Device(DeviceEvent::Done)).ok();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_history_keeps_latest() {
        let bus = EventBus::with_history(3);
        for i in 0..5 {
            bus.publish(AppEvent::Device(DeviceEvent::PressureReport { value: i as f64 }))
                .ok();
        }

        let values: Vec<f64> = bus
            .history()
            .into_iter()
            .filter_map(|event| match event {
                AppEvent::Device(DeviceEvent::PressureReport { value }) => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert!(EventBus::new().history().is_empty());
    }

    #[tokio::test]
    async fn test_async_receiver() {
        let bus = EventBus::new();
        let mut receiver = bus.receiver();

        assert_eq!(bus.publish(connected()), Ok(1));
        match receiver.recv().await {
            Ok(AppEvent::Connection(ConnectionEvent::Connected { port })) => {
                assert_eq!(port, "/dev/ttyACM0");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
