//! Channel-backed subscriptions.
//!
//! A [`Subscription`] is the message-passing alternative to registering a
//! callback: the pipeline queues each matching event onto the subscription's
//! own channel and the consumer pulls at its own pace.
//!
//! ## Usage Pattern
//!
//! ```ignore
//! let mut orders = hub.subscribe_channel("order.*", false)?;
//!
//! while let Some(event) = orders.recv().await {
//!     refresh_order_table(&event);
//! }
//! ```
//!
//! ## Lifecycle
//!
//! Dropping the subscription closes its channel; the pipeline removes the
//! entry the next time an event would have been delivered to it. Call
//! `unsubscribe(subscription.id())` to remove it eagerly.
//!
//! ## Backpressure
//!
//! Channels are unbounded: the producer side never waits on a slow consumer.
//! The buffer window, not the channel, is what bounds memory for late readers.

use bizdesk_core::SubscriptionId;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

use crate::Event;

#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: UnboundedReceiver<Event>,
}

impl Subscription {
    pub fn new(id: SubscriptionId, receiver: UnboundedReceiver<Event>) -> Self {
        Self { id, receiver }
    }

    /// Registry key, for `unsubscribe`.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. `None` once the subscription was removed and
    /// every queued event has been drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            out.push(event);
        }
        out
    }
}
