use model::events::Event;
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone)]
pub struct Subscription {
    event_type_id: TypeId,
    subscriber_id: u64,
}

type Senders = HashMap<u64, Box<dyn Any + Send + Sync>>;

/// Typed fan-out of progress events. Publishing never blocks: a subscriber
/// whose channel is full misses the event.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<TypeId, Senders>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a channel of `capacity` events of type `E`.
    pub async fn subscribe<E>(&self, capacity: usize) -> (Subscription, mpsc::Receiver<Arc<E>>)
    where
        E: Event + Clone,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let event_type_id = TypeId::of::<E>();
        let subscriber_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .write()
            .await
            .entry(event_type_id)
            .or_default()
            .insert(subscriber_id, Box::new(tx));

        debug!(
            event_type = std::any::type_name::<E>(),
            subscriber_id, "Subscribed to event"
        );

        (
            Subscription {
                event_type_id,
                subscriber_id,
            },
            rx,
        )
    }

    pub async fn publish<E>(&self, event: E)
    where
        E: Event + Clone,
    {
        let subscribers = self.subscribers.read().await;
        let Some(type_subscribers) = subscribers.get(&TypeId::of::<E>()) else {
            return;
        };

        let event = Arc::new(event);
        for (subscriber_id, boxed) in type_subscribers {
            let Some(sender) = boxed.downcast_ref::<mpsc::Sender<Arc<E>>>() else {
                continue;
            };
            if let Err(e) = sender.try_send(event.clone()) {
                warn!(
                    event_type = event.event_type(),
                    subscriber_id,
                    error = %e,
                    "Dropped event for slow or closed subscriber"
                );
            }
        }
    }

    pub async fn unsubscribe(&self, subscription: Subscription) {
        let mut subscribers = self.subscribers.write().await;

        if let Some(type_subscribers) = subscribers.get_mut(&subscription.event_type_id) {
            type_subscribers.remove(&subscription.subscriber_id);
            if type_subscribers.is_empty() {
                subscribers.remove(&subscription.event_type_id);
            }
        }
    }

    pub async fn subscriber_count<E>(&self) -> usize
    where
        E: Event,
    {
        self.subscribers
            .read()
            .await
            .get(&TypeId::of::<E>())
            .map_or(0, |subs| subs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use model::events::migration::MigrationEvent;

    fn aborted(endpoint: &str) -> MigrationEvent {
        MigrationEvent::RunAborted {
            endpoint: endpoint.into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let bus = EventBus::new();
        let (_a, mut rx_a) = bus.subscribe::<MigrationEvent>(4).await;
        let (_b, mut rx_b) = bus.subscribe::<MigrationEvent>(4).await;

        bus.publish(aborted("Sales")).await;

        assert_eq!(rx_a.recv().await.unwrap().endpoint(), "Sales");
        assert_eq!(rx_b.recv().await.unwrap().endpoint(), "Sales");
    }

    #[tokio::test]
    async fn unsubscribe_removes_subscriber() {
        let bus = EventBus::new();
        let (sub, _rx) = bus.subscribe::<MigrationEvent>(1).await;
        assert_eq!(bus.subscriber_count::<MigrationEvent>().await, 1);

        bus.unsubscribe(sub).await;
        assert_eq!(bus.subscriber_count::<MigrationEvent>().await, 0);
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let bus = EventBus::new();
        let (_sub, mut rx) = bus.subscribe::<MigrationEvent>(1).await;

        bus.publish(aborted("first")).await;
        bus.publish(aborted("second")).await;

        assert_eq!(rx.recv().await.unwrap().endpoint(), "first");
        assert!(rx.try_recv().is_err());
    }
}
