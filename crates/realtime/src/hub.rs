//! The consumer-facing entry point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bizdesk_core::{DomainResult, SubscriptionId};
use bizdesk_events::{
    Event, EventPipeline, IngestStats, Subscription, TopicPattern, ingest_queue, run_ingestion,
};
use serde_json::Value as JsonValue;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::{EventApiClient, EventStats};
use crate::config::RealtimeConfig;
use crate::connection::{ConnectionState, ConnectionStatus};
use crate::connector::TransportConnector;
use crate::error::{HubError, PollError, PublishError};
use crate::poller::{FallbackPoller, PollHandle, PollMode};
use crate::publisher::Publisher;

/// Real-time event layer for one UI session.
///
/// This is the single point of construction and teardown: build one per
/// session, share it (`Arc<RealtimeHub>`) with every screen that needs live
/// events, and call [`RealtimeHub::shutdown`] (or drop it) when the session
/// ends.
///
/// ## Architecture
///
/// ```text
/// TransportConnector ─┐
///                     ├─► ingestion queue ─► EventPipeline (dedup → buffer → dispatch)
/// FallbackPoller ─────┘                                         │
///                                                               ├─► callbacks
///                                                               └─► channel subscriptions
/// Publisher ─► POST /api/events/publish/   (never touches the pipeline)
/// ```
///
/// Must be created inside a Tokio runtime; background tasks are spawned on
/// that runtime.
#[derive(Debug)]
pub struct RealtimeHub {
    pipeline: Arc<EventPipeline>,
    connector: TransportConnector,
    poller: FallbackPoller,
    publisher: Publisher,
    client: EventApiClient,
    poll_interval: Duration,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl RealtimeHub {
    pub fn new(config: RealtimeConfig) -> Result<Self, HubError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| HubError::NoRuntime)?;
        let client = EventApiClient::new(&config)?;

        let pipeline = Arc::new(EventPipeline::new(config.buffer_capacity));
        let shutdown = CancellationToken::new();
        let (ingest, queue) = ingest_queue();
        runtime.spawn(run_ingestion(pipeline.clone(), queue, shutdown.clone()));

        let connector = TransportConnector::new(
            client.clone(),
            ingest.clone(),
            config.reconnect,
            shutdown.child_token(),
            runtime.clone(),
        );
        let poller = FallbackPoller::new(
            client.clone(),
            ingest,
            connector.watch(),
            shutdown.child_token(),
            runtime,
        );

        tracing::info!(
            api_url = %config.api_url,
            buffer_capacity = config.buffer_capacity,
            reconnect = ?config.reconnect,
            "realtime hub created"
        );

        Ok(Self {
            pipeline,
            connector,
            poller,
            publisher: Publisher::new(client.clone()),
            client,
            poll_interval: config.poll_interval,
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    // ── connection ────────────────────────────────────────────────────────

    /// Open the live stream. No-op while connecting or connected, and after
    /// shutdown.
    pub fn connect(&self) {
        if self.is_shut_down() {
            tracing::warn!("connect called after shutdown; ignored");
            return;
        }
        self.connector.connect();
    }

    /// Close the live stream. Buffered events and subscriptions are kept.
    pub fn disconnect(&self) {
        self.connector.disconnect();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connector.state()
    }

    pub fn last_error(&self) -> Option<String> {
        self.connector.last_error()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connector.status()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionStatus> {
        self.connector.watch()
    }

    // ── subscriptions ─────────────────────────────────────────────────────

    /// Register `callback` for events whose type matches `pattern`.
    ///
    /// With `replay`, buffered matching events are delivered (newest first)
    /// before this returns.
    pub fn subscribe<F>(&self, pattern: &str, callback: F, replay: bool) -> DomainResult<SubscriptionId>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let pattern = TopicPattern::parse(pattern)?;
        Ok(self.pipeline.subscribe(pattern, callback, replay))
    }

    /// Channel flavour of [`RealtimeHub::subscribe`].
    pub fn subscribe_channel(&self, pattern: &str, replay: bool) -> DomainResult<Subscription> {
        let pattern = TopicPattern::parse(pattern)?;
        Ok(self.pipeline.subscribe_channel(pattern, replay))
    }

    /// Idempotent; unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.pipeline.unsubscribe(id)
    }

    /// Pause (`false`) or resume (`true`) a subscription without removing it.
    pub fn set_active(&self, id: SubscriptionId, active: bool) -> bool {
        self.pipeline.set_active(id, active)
    }

    // ── buffer ────────────────────────────────────────────────────────────

    /// Buffered events, newest first, optionally filtered by a topic pattern.
    pub fn snapshot(&self, filter: Option<&str>, limit: Option<usize>) -> DomainResult<Vec<Event>> {
        let filter = filter.map(TopicPattern::parse).transpose()?;
        Ok(self.pipeline.snapshot(filter.as_ref(), limit))
    }

    /// Clear the buffer without touching subscriptions or the connection.
    pub fn reset_buffer(&self) {
        self.pipeline.clear_buffer();
    }

    pub fn stats(&self) -> IngestStats {
        self.pipeline.stats()
    }

    // ── polling ───────────────────────────────────────────────────────────

    pub fn start_polling(&self, interval: Duration) -> PollHandle {
        self.start_polling_with(interval, PollMode::Always)
    }

    pub fn start_polling_with(&self, interval: Duration, mode: PollMode) -> PollHandle {
        self.poller.start(interval, mode)
    }

    /// Poll at the configured interval, only while the stream is down.
    pub fn start_fallback_polling(&self) -> PollHandle {
        self.poller.start(self.poll_interval, PollMode::WhenDisconnected)
    }

    // ── backend calls ─────────────────────────────────────────────────────

    /// Send an event to the backend. The local buffer is not touched.
    pub async fn publish(&self, event_type: &str, data: JsonValue) -> Result<(), PublishError> {
        self.publisher.publish(event_type, data).await
    }

    pub async fn fetch_stats(&self) -> Result<EventStats, PollError> {
        self.client.fetch_stats().await
    }

    // ── teardown ──────────────────────────────────────────────────────────

    /// Close the stream, stop every poller and the ingestion task, and drop
    /// all buffered events and subscriptions. Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connector.disconnect();
        self.shutdown.cancel();
        self.pipeline.clear();
        tracing::info!("realtime hub shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for RealtimeHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}
