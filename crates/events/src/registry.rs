//! Subscription registry: who wants which topics.

use std::sync::Arc;

use bizdesk_core::SubscriptionId;
use tokio::sync::mpsc::UnboundedSender;

use crate::{Event, TopicPattern};

/// Callback invoked once per matching event.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

/// Where a subscription's events go.
#[derive(Clone)]
pub enum Sink {
    /// Invoked inline on the ingestion path.
    Callback(EventCallback),
    /// Queued to a [`crate::Subscription`] receiver.
    Channel(UnboundedSender<Event>),
}

impl Sink {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Sink::Callback(Arc::new(f))
    }
}

impl core::fmt::Debug for Sink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Sink::Callback(_) => f.write_str("Sink::Callback"),
            Sink::Channel(tx) => f
                .debug_struct("Sink::Channel")
                .field("closed", &tx.is_closed())
                .finish(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    id: SubscriptionId,
    pattern: TopicPattern,
    sink: Sink,
    active: bool,
}

/// Active topic subscriptions, in registration order.
///
/// The registry is plain data; callers hold it behind a lock and take a
/// [`SubscriptionRegistry::targets_for`] snapshot before delivering, so sinks
/// never run while the registry is borrowed.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Entry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pattern: TopicPattern, sink: Sink) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.entries.push(Entry {
            id,
            pattern,
            sink,
            active: true,
        });
        id
    }

    /// Remove an entry. Unknown ids are a no-op (returns `false`).
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Soft-unsubscribe (or resume) without removing the entry.
    pub fn set_active(&mut self, id: SubscriptionId, active: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.active = active;
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, id: SubscriptionId) -> Option<bool> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.active)
    }

    /// Sinks of every active entry whose pattern matches `topic`.
    pub fn targets_for(&self, topic: &str) -> Vec<(SubscriptionId, Sink)> {
        self.entries
            .iter()
            .filter(|e| e.active && e.pattern.matches(topic))
            .map(|e| (e.id, e.sink.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
