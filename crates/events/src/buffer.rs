//! Bounded window of recently observed events.

use std::collections::{HashSet, VecDeque};

use crate::{Event, TopicPattern};

/// Default number of events kept for late subscribers and snapshot reads.
pub const DEFAULT_CAPACITY: usize = 100;

/// Bounded, newest-first store of recent events.
///
/// - **Bounded**: never holds more than `capacity` events; the oldest are
///   evicted first.
/// - **Arrival order**: the front is the most recently pushed event, whatever
///   its `timestamp` says.
/// - **Unique ids**: pushing an id that is already present is a no-op.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    events: VecDeque<Event>,
    ids: HashSet<String>,
    capacity: usize,
}

impl EventBuffer {
    /// A capacity of zero is raised to one. Storage grows on demand, so a
    /// large capacity costs nothing until events arrive.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let initial = capacity.min(DEFAULT_CAPACITY);
        Self {
            events: VecDeque::with_capacity(initial),
            ids: HashSet::with_capacity(initial),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Insert at the front. Returns `false` if the id was already buffered.
    pub fn push(&mut self, event: Event) -> bool {
        if self.ids.contains(event.id()) {
            return false;
        }

        self.ids.insert(event.id().to_string());
        self.events.push_front(event);

        while self.events.len() > self.capacity {
            if let Some(evicted) = self.events.pop_back() {
                self.ids.remove(evicted.id());
            }
        }
        true
    }

    /// Up to `limit` events matching `filter`, newest first.
    ///
    /// The buffer is not touched; every call materializes a fresh sequence.
    pub fn snapshot(&self, filter: Option<&TopicPattern>, limit: Option<usize>) -> Vec<Event> {
        self.events
            .iter()
            .filter(|event| filter.is_none_or(|pattern| pattern.matches(event.event_type())))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.ids.clear();
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
