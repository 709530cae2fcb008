//! In-process fan-out of change and session notifications.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use parley_shared::{ChangeEvent, ChangeFilter, Subscription};
use tokio::sync::mpsc;

/// Decides whether a subscriber receives an item.
pub trait Interest<T>: Send + Sync + 'static {
    fn wants(&self, item: &T) -> bool;
}

impl Interest<ChangeEvent> for ChangeFilter {
    fn wants(&self, item: &ChangeEvent) -> bool {
        self.matches(item)
    }
}

/// Subscribes to every item.
#[derive(Debug, Clone, Copy, Default)]
pub struct Everything;

impl<T> Interest<T> for Everything {
    fn wants(&self, _item: &T) -> bool {
        true
    }
}

struct Registry<T, I> {
    next_id: u64,
    entries: HashMap<u64, (I, mpsc::UnboundedSender<T>)>,
}

/// A set of subscribers, each with its own interest and unbounded queue.
pub struct Fanout<T, I> {
    inner: Arc<Mutex<Registry<T, I>>>,
}

impl<T, I> Default for Fanout<T, I> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 1,
                entries: HashMap::new(),
            })),
        }
    }
}

impl<T, I> Fanout<T, I>
where
    T: Clone + Send + 'static,
    I: Interest<T>,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Dropping the returned [`Subscription`] removes it.
    pub fn subscribe(&self, interest: I) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.insert(id, (interest, tx));
            id
        };

        let registry: Weak<Mutex<Registry<T, I>>> = Arc::downgrade(&self.inner);
        Subscription::new(id, rx, move || {
            if let Some(registry) = registry.upgrade() {
                registry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entries
                    .remove(&id);
                tracing::trace!(subscription = id, "subscriber released");
            }
        })
    }

    /// Deliver `item` to every interested subscriber. Returns how many
    /// subscribers received it.
    pub fn publish(&self, item: &T) -> usize {
        let mut registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        registry.entries.retain(|_, (interest, tx)| {
            if !interest.wants(item) {
                return true;
            }
            match tx.send(item.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    /// Number of live subscribers whose interest satisfies `pred`.
    pub fn count_where(&self, pred: impl Fn(&I) -> bool) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .values()
            .filter(|(interest, _)| pred(interest))
            .count()
    }

    pub fn len(&self) -> usize {
        self.count_where(|_| true)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::{ChangeKind, Table};
    use serde_json::json;

    fn insert(table: Table, chat_id: &str) -> ChangeEvent {
        ChangeEvent {
            table,
            kind: ChangeKind::Insert,
            new: Some(json!({ "id": "x", "chat_id": chat_id })),
            old: None,
        }
    }

    #[tokio::test]
    async fn publish_respects_interest() {
        let feed: Fanout<ChangeEvent, ChangeFilter> = Fanout::new();
        let mut c1 = feed.subscribe(ChangeFilter::new("chat:c1", Table::Messages).scope("chat_id", "c1"));
        let mut c2 = feed.subscribe(ChangeFilter::new("chat:c2", Table::Messages).scope("chat_id", "c2"));

        assert_eq!(feed.publish(&insert(Table::Messages, "c1")), 1);
        assert!(c1.recv().await.is_some());
        assert!(c2.try_recv().is_none());
    }

    #[test]
    fn dropping_a_subscription_unregisters_it() {
        let feed: Fanout<u32, Everything> = Fanout::new();
        let a = feed.subscribe(Everything);
        let _b = feed.subscribe(Everything);
        assert_eq!(feed.len(), 2);

        drop(a);
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.publish(&5), 1);
    }

    #[test]
    fn count_where_filters_by_interest() {
        let feed: Fanout<ChangeEvent, ChangeFilter> = Fanout::new();
        let _m = feed.subscribe(ChangeFilter::new("m", Table::Messages));
        let _c = feed.subscribe(ChangeFilter::new("c", Table::Chats));

        assert_eq!(feed.count_where(|f| f.table == Table::Messages), 1);
        assert!(!feed.is_empty());
    }
}
