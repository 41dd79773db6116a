//! Periodic pull of the recent-events snapshot.

use std::time::Duration;

use bizdesk_events::{EventOrigin, IngestSender, Producer};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::EventApiClient;
use crate::connection::{ConnectionState, ConnectionStatus};

/// Shortest cadence accepted; smaller intervals are raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Longest cadence accepted; larger intervals are lowered to this.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// When a running poller actually fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollMode {
    /// Every tick, alongside the live stream.
    #[default]
    Always,
    /// Only while the live stream is not `Connected`.
    WhenDisconnected,
}

/// Stops a running poller. Dropping the handle stops it too.
#[derive(Debug)]
#[must_use = "dropping a PollHandle stops the poller"]
pub struct PollHandle {
    token: CancellationToken,
}

impl PollHandle {
    /// No further fetches start, and a response still in flight is discarded.
    /// Idempotent.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
            tracing::debug!("poller stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawns pollers that share the hub's client and ingestion queue.
#[derive(Debug, Clone)]
pub struct FallbackPoller {
    client: EventApiClient,
    ingest: IngestSender,
    status: watch::Receiver<ConnectionStatus>,
    parent: CancellationToken,
    runtime: Handle,
}

impl FallbackPoller {
    pub fn new(
        client: EventApiClient,
        ingest: IngestSender,
        status: watch::Receiver<ConnectionStatus>,
        parent: CancellationToken,
        runtime: Handle,
    ) -> Self {
        Self {
            client,
            ingest,
            status,
            parent,
            runtime,
        }
    }

    pub fn start(&self, interval: Duration, mode: PollMode) -> PollHandle {
        let interval = interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        let token = self.parent.child_token();
        let producer = self.ingest.producer(EventOrigin::Poll, token.clone());

        tracing::info!(?interval, ?mode, "starting fallback poller");
        self.runtime.spawn(run_poller(
            self.client.clone(),
            producer,
            self.status.clone(),
            interval,
            mode,
        ));

        PollHandle { token }
    }
}

async fn run_poller(
    client: EventApiClient,
    producer: Producer,
    status: watch::Receiver<ConnectionStatus>,
    interval: Duration,
    mode: PollMode,
) {
    let token = producer.token().clone();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if mode == PollMode::WhenDisconnected
            && status.borrow().state == ConnectionState::Connected
        {
            tracing::trace!("skipping poll; live stream connected");
            continue;
        }

        let batch = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            batch = client.fetch_recent() => batch,
        };

        match batch {
            Ok(events) => {
                tracing::debug!(fetched = events.len(), "poll cycle complete");
                // Served newest first; ingest oldest first so the buffer ends newest first.
                for event in events.into_iter().rev() {
                    if !producer.send(event) && token.is_cancelled() {
                        break;
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "poll cycle failed; retrying next tick"),
        }
    }

    tracing::debug!("poller task exited");
}
