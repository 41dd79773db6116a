//! Fan-out of one event to a snapshot of matching sinks.

use std::panic::{AssertUnwindSafe, catch_unwind};

use bizdesk_core::SubscriptionId;

use crate::Event;
use crate::registry::Sink;

/// Outcome of delivering one event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Sinks that accepted the event (callbacks that returned normally,
    /// channels that queued it).
    pub delivered: usize,
    /// Callbacks that panicked.
    pub failed: usize,
    /// Channel subscriptions whose receiver is gone.
    pub closed: Vec<SubscriptionId>,
}

/// Deliver `event` to every target, in order.
///
/// Each callback runs in isolation: a panic is caught and logged, and the
/// remaining targets still run.
pub fn deliver(targets: &[(SubscriptionId, Sink)], event: &Event) -> Delivery {
    let mut out = Delivery::default();

    for (id, sink) in targets {
        match sink {
            Sink::Callback(callback) => {
                match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                    Ok(()) => out.delivered += 1,
                    Err(panic) => {
                        out.failed += 1;
                        tracing::error!(
                            subscription_id = %id,
                            event_id = event.id(),
                            event_type = event.event_type(),
                            panic = panic_message(panic.as_ref()),
                            "subscriber callback panicked"
                        );
                    }
                }
            }
            Sink::Channel(tx) => {
                if tx.send(event.clone()).is_ok() {
                    out.delivered += 1;
                } else {
                    out.closed.push(*id);
                }
            }
        }
    }

    out
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
