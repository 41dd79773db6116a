//! The single ingestion path: dedup, buffer, dispatch.
//!
//! Every producer (the live stream connector, the fallback poller) sends into
//! one [`ingest_queue`]. Exactly one task drains it with [`run_ingestion`], so
//! for any given event buffer insertion and dispatch complete before the next
//! event is looked at.
//!
//! ```text
//! stream connector ─┐
//!                   ├─► IngestSender ─► run_ingestion ─► EventPipeline::accept
//! fallback poller ──┘                                     ├─ cancelled producer? drop
//!                                                         ├─ id already buffered? drop
//!                                                         ├─ EventBuffer::push
//!                                                         └─ dispatch to registry snapshot
//! ```
//!
//! Each message carries its producer's [`CancellationToken`], checked under the
//! buffer lock. A message whose producer was cancelled (disconnect, poll stop)
//! before that check is dropped unbuffered. A cancel that lands while an event
//! is already being dispatched lets that one pass finish; the next message
//! from the producer is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bizdesk_core::SubscriptionId;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{Delivery, deliver};
use crate::registry::{Sink, SubscriptionRegistry};
use crate::{Event, EventBuffer, Subscription, TopicPattern};

/// Which delivery path produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    Stream,
    Poll,
    Local,
}

impl core::fmt::Display for EventOrigin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            EventOrigin::Stream => "stream",
            EventOrigin::Poll => "poll",
            EventOrigin::Local => "local",
        })
    }
}

/// What happened to one ingested event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Buffered and dispatched.
    Accepted(Delivery),
    /// Id already in the buffer; nothing dispatched.
    Duplicate,
    /// Producer was cancelled before the event was ingested.
    Cancelled,
}

/// Counters over the lifetime of a pipeline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub accepted: u64,
    pub duplicates: u64,
    pub cancelled: u64,
    pub callback_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    duplicates: AtomicU64,
    cancelled: AtomicU64,
    callback_failures: AtomicU64,
}

/// Buffer + registry + dispatcher behind one serialized ingestion path.
///
/// Locks are never held while sinks run, so a callback may call
/// `subscribe`/`unsubscribe` on the same pipeline.
#[derive(Debug)]
pub struct EventPipeline {
    buffer: Mutex<EventBuffer>,
    registry: Mutex<SubscriptionRegistry>,
    counters: Counters,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventPipeline {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(EventBuffer::new(capacity)),
            registry: Mutex::new(SubscriptionRegistry::new()),
            counters: Counters::default(),
        }
    }

    /// Register a callback. With `replay`, the callback is first invoked once
    /// per buffered matching event (newest first) before this returns.
    ///
    /// Registration and the replay snapshot are taken under the buffer lock,
    /// so every event reaches the new subscriber exactly once: either through
    /// replay or through live dispatch.
    pub fn subscribe<F>(&self, pattern: TopicPattern, callback: F, replay: bool) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let sink = Sink::callback(callback);

        let (id, backlog) = {
            let buffer = lock(&self.buffer);
            let id = lock(&self.registry).register(pattern.clone(), sink.clone());
            let backlog = if replay {
                buffer.snapshot(Some(&pattern), None)
            } else {
                Vec::new()
            };
            (id, backlog)
        };

        if !backlog.is_empty() {
            tracing::debug!(subscription_id = %id, %pattern, replayed = backlog.len(), "replaying buffered events");
            let target = [(id, sink)];
            for event in &backlog {
                let out = deliver(&target, event);
                self.record_failures(&out);
            }
        }

        id
    }

    /// Register a channel subscription. Replayed events are queued before
    /// any live event.
    pub fn subscribe_channel(&self, pattern: TopicPattern, replay: bool) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();

        let buffer = lock(&self.buffer);
        let id = lock(&self.registry).register(pattern.clone(), Sink::Channel(tx.clone()));
        if replay {
            for event in buffer.snapshot(Some(&pattern), None) {
                // The receiver is still in our hands; this cannot fail.
                let _ = tx.send(event);
            }
        }
        drop(buffer);

        Subscription::new(id, rx)
    }

    /// Remove a subscription. Unknown or already-removed ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.registry).remove(id)
    }

    pub fn set_active(&self, id: SubscriptionId, active: bool) -> bool {
        lock(&self.registry).set_active(id, active)
    }

    pub fn snapshot(&self, filter: Option<&TopicPattern>, limit: Option<usize>) -> Vec<Event> {
        lock(&self.buffer).snapshot(filter, limit)
    }

    pub fn contains(&self, event_id: &str) -> bool {
        lock(&self.buffer).contains(event_id)
    }

    pub fn buffered(&self) -> usize {
        lock(&self.buffer).len()
    }

    pub fn subscriptions(&self) -> usize {
        lock(&self.registry).len()
    }

    /// Dedup against the buffer, insert, then dispatch.
    pub fn ingest(&self, event: Event, origin: EventOrigin) -> IngestOutcome {
        self.ingest_from(event, origin, None)
    }

    /// `token` is checked under the buffer lock, so an event from a producer
    /// cancelled before that point is neither buffered nor dispatched.
    fn ingest_from(
        &self,
        event: Event,
        origin: EventOrigin,
        token: Option<&CancellationToken>,
    ) -> IngestOutcome {
        let targets = {
            let mut buffer = lock(&self.buffer);
            if token.is_some_and(CancellationToken::is_cancelled) {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    event_id = event.id(),
                    %origin,
                    "producer cancelled; in-flight event ignored"
                );
                return IngestOutcome::Cancelled;
            }
            if !buffer.push(event.clone()) {
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(event_id = event.id(), %origin, "duplicate event dropped");
                return IngestOutcome::Duplicate;
            }
            lock(&self.registry).targets_for(event.event_type())
        };

        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            event_id = event.id(),
            event_type = event.event_type(),
            %origin,
            subscribers = targets.len(),
            "event ingested"
        );

        IngestOutcome::Accepted(self.deliver_to(&targets, &event))
    }

    /// Deliver to every active matching subscription without buffering.
    ///
    /// The set of subscriptions is fixed when the call starts; subscriptions
    /// added or removed by callbacks take effect from the next event.
    pub fn dispatch(&self, event: &Event) -> Delivery {
        let targets = lock(&self.registry).targets_for(event.event_type());
        self.deliver_to(&targets, event)
    }

    /// Ingest one queued message, honouring its producer's cancellation.
    pub fn accept(&self, message: IngestMessage) -> IngestOutcome {
        let IngestMessage {
            event,
            origin,
            token,
        } = message;
        self.ingest_from(event, origin, Some(&token))
    }

    pub fn clear_buffer(&self) {
        lock(&self.buffer).clear();
    }

    /// Drop every buffered event and every subscription.
    pub fn clear(&self) {
        lock(&self.buffer).clear();
        lock(&self.registry).clear();
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            callback_failures: self.counters.callback_failures.load(Ordering::Relaxed),
        }
    }

    fn deliver_to(&self, targets: &[(SubscriptionId, Sink)], event: &Event) -> Delivery {
        let out = deliver(targets, event);
        self.record_failures(&out);

        if !out.closed.is_empty() {
            let mut registry = lock(&self.registry);
            for id in &out.closed {
                registry.remove(*id);
                tracing::debug!(subscription_id = %id, "channel subscription dropped by consumer");
            }
        }
        out
    }

    fn record_failures(&self, out: &Delivery) {
        if out.failed > 0 {
            self.counters
                .callback_failures
                .fetch_add(out.failed as u64, Ordering::Relaxed);
        }
    }
}

/// One event on its way into the pipeline.
#[derive(Debug)]
pub struct IngestMessage {
    event: Event,
    origin: EventOrigin,
    token: CancellationToken,
}

/// Producer-side handle bound to one origin and one cancellation token.
#[derive(Debug, Clone)]
pub struct Producer {
    tx: mpsc::UnboundedSender<IngestMessage>,
    origin: EventOrigin,
    token: CancellationToken,
}

impl Producer {
    /// Queue an event. Returns `false` if the producer was cancelled or the
    /// ingestion task is gone.
    pub fn send(&self, event: Event) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.tx
            .send(IngestMessage {
                event,
                origin: self.origin,
                token: self.token.clone(),
            })
            .is_ok()
    }

    pub fn origin(&self) -> EventOrigin {
        self.origin
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Cloneable entry point of the ingestion queue.
#[derive(Debug, Clone)]
pub struct IngestSender {
    tx: mpsc::UnboundedSender<IngestMessage>,
}

impl IngestSender {
    pub fn producer(&self, origin: EventOrigin, token: CancellationToken) -> Producer {
        Producer {
            tx: self.tx.clone(),
            origin,
            token,
        }
    }
}

/// Consumer end of the ingestion queue; owned by [`run_ingestion`].
#[derive(Debug)]
pub struct IngestReceiver {
    rx: mpsc::UnboundedReceiver<IngestMessage>,
}

pub fn ingest_queue() -> (IngestSender, IngestReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (IngestSender { tx }, IngestReceiver { rx })
}

/// Drain the ingestion queue until `shutdown` fires or every sender is gone.
pub async fn run_ingestion(
    pipeline: Arc<EventPipeline>,
    mut queue: IngestReceiver,
    shutdown: CancellationToken,
) {
    tracing::debug!("ingestion task started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            message = queue.rx.recv() => match message {
                Some(message) => {
                    pipeline.accept(message);
                }
                None => break,
            },
        }
    }
    tracing::debug!("ingestion task stopped");
}
