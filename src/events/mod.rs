//! Domain events and the in-process change feed.
//!
//! Services emit [`Event`]s on an mpsc channel. [`process_events`] logs each
//! one and republishes it on the [`ChangeFeed`], which fans notifications
//! out to subscribers keyed by `(store_id, table)`.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::OrderStatus;

/// Per-key broadcast buffer; enough to absorb a burst of checkouts
pub const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Table a change notification refers to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeTable {
    Orders,
    Products,
    Categories,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        store_id: Uuid,
        order_number: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        store_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    ProductChanged {
        product_id: Uuid,
        store_id: Uuid,
    },
    CategoryChanged {
        category_id: Uuid,
        store_id: Uuid,
    },
}

impl Event {
    pub fn store_id(&self) -> Uuid {
        match self {
            Event::OrderPlaced { store_id, .. }
            | Event::OrderStatusChanged { store_id, .. }
            | Event::ProductChanged { store_id, .. }
            | Event::CategoryChanged { store_id, .. } => *store_id,
        }
    }

    pub fn table(&self) -> ChangeTable {
        match self {
            Event::OrderPlaced { .. } | Event::OrderStatusChanged { .. } => ChangeTable::Orders,
            Event::ProductChanged { .. } => ChangeTable::Products,
            Event::CategoryChanged { .. } => ChangeTable::Categories,
        }
    }
}

/// "Something changed in this table for this store; reload."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub store_id: Uuid,
    pub table: ChangeTable,
    /// Set when the subscriber fell behind and notifications were dropped
    #[serde(default)]
    pub lagged: bool,
}

type FeedKey = (Uuid, ChangeTable);

/// Fan-out of change notifications, one broadcast channel per key
#[derive(Clone, Default)]
pub struct ChangeFeed {
    channels: Arc<DashMap<FeedKey, broadcast::Sender<ChangeNotification>>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `(store_id, table)`. Dropping the returned
    /// subscription releases it.
    pub fn subscribe(&self, store_id: Uuid, table: ChangeTable) -> Subscription {
        let key = (store_id, table);
        let receiver = self
            .channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .subscribe();
        debug!(%store_id, %table, "change feed subscription opened");
        Subscription {
            key,
            receiver,
            channels: Arc::clone(&self.channels),
        }
    }

    /// Publishes a notification and returns how many subscribers received it.
    pub fn publish(&self, store_id: Uuid, table: ChangeTable) -> usize {
        let Some(tx) = self.channels.get(&(store_id, table)) else {
            return 0;
        };
        // No receivers is not an error
        tx.send(ChangeNotification {
            store_id,
            table,
            lagged: false,
        })
        .unwrap_or(0)
    }

    pub fn subscriber_count(&self, store_id: Uuid, table: ChangeTable) -> usize {
        self.channels
            .get(&(store_id, table))
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of keys with live channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// A live interest in one `(store_id, table)` key
pub struct Subscription {
    key: FeedKey,
    receiver: broadcast::Receiver<ChangeNotification>,
    channels: Arc<DashMap<FeedKey, broadcast::Sender<ChangeNotification>>>,
}

impl Subscription {
    pub fn store_id(&self) -> Uuid {
        self.key.0
    }

    pub fn table(&self) -> ChangeTable {
        self.key.1
    }

    /// Waits for the next notification. A lagging subscriber gets a single
    /// notification with `lagged` set instead of an error. Returns `None`
    /// once the feed is gone.
    pub async fn recv(&mut self) -> Option<ChangeNotification> {
        match self.receiver.recv().await {
            Ok(notification) => Some(notification),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    store_id = %self.key.0,
                    table = %self.key.1,
                    skipped,
                    "change feed subscriber lagged"
                );
                Some(ChangeNotification {
                    store_id: self.key.0,
                    table: self.key.1,
                    lagged: true,
                })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Our own receiver is still alive here, hence `<= 1`
        self.channels
            .remove_if(&self.key, |_, tx| tx.receiver_count() <= 1);
        debug!(store_id = %self.key.0, table = %self.key.1, "change feed subscription released");
    }
}

/// Logs every domain event and republishes it on the change feed.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, feed: ChangeFeed) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPlaced {
                order_id,
                store_id,
                order_number,
            } => {
                info!(%order_id, %store_id, %order_number, "order placed");
            }
            Event::OrderStatusChanged {
                order_id,
                store_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %store_id, %old_status, %new_status, "order status changed");
            }
            Event::ProductChanged {
                product_id,
                store_id,
            } => {
                debug!(%product_id, %store_id, "product changed");
            }
            Event::CategoryChanged {
                category_id,
                store_id,
            } => {
                debug!(%category_id, %store_id, "category changed");
            }
        }

        let delivered = feed.publish(event.store_id(), event.table());
        debug!(delivered, table = %event.table(), "change published");
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn notifications_are_scoped_by_store_and_table() {
        let feed = ChangeFeed::new();
        let store_a = Uuid::new_v4();
        let store_b = Uuid::new_v4();
        let mut orders_a = feed.subscribe(store_a, ChangeTable::Orders);
        let mut products_a = feed.subscribe(store_a, ChangeTable::Products);

        assert_eq!(feed.publish(store_b, ChangeTable::Orders), 0);
        assert_eq!(feed.publish(store_a, ChangeTable::Orders), 1);

        let got = orders_a.recv().await.unwrap();
        assert_eq!(got.store_id, store_a);
        assert_eq!(got.table, ChangeTable::Orders);
        assert!(!got.lagged);

        let nothing = timeout(Duration::from_millis(20), products_a.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn dropping_last_subscription_prunes_the_key() {
        let feed = ChangeFeed::new();
        let store = Uuid::new_v4();
        let first = feed.subscribe(store, ChangeTable::Orders);
        let second = feed.subscribe(store, ChangeTable::Orders);
        assert_eq!(feed.subscriber_count(store, ChangeTable::Orders), 2);

        drop(first);
        assert_eq!(feed.channel_count(), 1);
        assert_eq!(feed.subscriber_count(store, ChangeTable::Orders), 1);

        drop(second);
        assert_eq!(feed.channel_count(), 0);
        assert_eq!(feed.publish(store, ChangeTable::Orders), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_to_reload() {
        let feed = ChangeFeed::new();
        let store = Uuid::new_v4();
        let mut sub = feed.subscribe(store, ChangeTable::Orders);
        for _ in 0..(BROADCAST_CAPACITY + 10) {
            feed.publish(store, ChangeTable::Orders);
        }
        let first = sub.recv().await.unwrap();
        assert!(first.lagged);
        let next = sub.recv().await.unwrap();
        assert!(!next.lagged);
    }

    #[tokio::test]
    async fn process_events_fans_out_to_feed() {
        let feed = ChangeFeed::new();
        let store = Uuid::new_v4();
        let mut sub = feed.subscribe(store, ChangeTable::Orders);

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(process_events(rx, feed.clone()));
        let sender = EventSender::new(tx);
        sender
            .send(Event::OrderStatusChanged {
                order_id: Uuid::new_v4(),
                store_id: store,
                old_status: OrderStatus::Pending,
                new_status: OrderStatus::Preparing,
            })
            .await
            .unwrap();

        let got = timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("notification in time")
            .unwrap();
        assert_eq!(got.table, ChangeTable::Orders);

        drop(sender);
        handle.await.unwrap();
    }

    #[test]
    fn events_map_to_tables() {
        let store_id = Uuid::new_v4();
        let event = Event::CategoryChanged {
            category_id: Uuid::new_v4(),
            store_id,
        };
        assert_eq!(event.table(), ChangeTable::Categories);
        assert_eq!(event.store_id(), store_id);
        assert_eq!(ChangeTable::Orders.to_string(), "orders");
    }
}
